//! Regex `pattern` → matching string generator
//!
//! Walks the high-level IR produced by `regex-syntax` and emits one string
//! per draw. Look-around assertions emit nothing, so every draw is checked
//! against the compiled regex by the caller.

use rand::Rng;
use regex::Regex;
use regex_syntax::hir::{Class, Hir, HirKind};

use super::UnsatisfiableSchema;

/// Extra repetitions drawn for unbounded quantifiers (`*`, `+`, `{n,}`).
const UNBOUNDED_REPEAT: u32 = 8;

/// Upper cap on repetitions drawn above a quantifier's minimum.
const MAX_EXTRA_REPEAT: u32 = 64;

/// Printable ASCII, preferred when a class allows it.
const PRINTABLE: (u32, u32) = (0x20, 0x7e);

#[derive(Debug, Clone)]
pub(crate) struct Pattern {
    source: String,
    hir: Hir,
    regex: Regex,
}

impl Pattern {
    pub(crate) fn compile(source: &str) -> Result<Self, UnsatisfiableSchema> {
        let regex = Regex::new(source)
            .map_err(|e| UnsatisfiableSchema::new(format!("invalid pattern {source:?}: {e}")))?;
        let hir = regex_syntax::Parser::new()
            .parse(source)
            .map_err(|e| UnsatisfiableSchema::new(format!("invalid pattern {source:?}: {e}")))?;
        if !satisfiable(&hir) {
            return Err(UnsatisfiableSchema::new(format!(
                "pattern {source:?} matches no string"
            )));
        }
        Ok(Self {
            source: source.to_string(),
            hir,
            regex,
        })
    }

    pub(crate) fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn is_match(&self, s: &str) -> bool {
        self.regex.is_match(s)
    }

    /// One random string built from the pattern structure.
    pub(crate) fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let mut out = String::new();
        emit(&self.hir, rng, &mut out);
        out
    }

    /// Shortest structural string: minimum repetitions, first branch, first
    /// printable character of each class.
    pub(crate) fn simplest(&self) -> String {
        let mut out = String::new();
        emit_simplest(&self.hir, &mut out);
        out
    }
}

fn satisfiable(hir: &Hir) -> bool {
    match hir.kind() {
        HirKind::Empty | HirKind::Literal(_) | HirKind::Look(_) => true,
        HirKind::Class(Class::Unicode(cls)) => !cls.ranges().is_empty(),
        HirKind::Class(Class::Bytes(cls)) => !cls.ranges().is_empty(),
        HirKind::Repetition(rep) => rep.min == 0 || satisfiable(&rep.sub),
        HirKind::Capture(cap) => satisfiable(&cap.sub),
        HirKind::Concat(subs) => subs.iter().all(satisfiable),
        HirKind::Alternation(subs) => subs.iter().any(satisfiable),
    }
}

fn repeat_bounds(min: u32, max: Option<u32>) -> (u32, u32) {
    let cap = min.saturating_add(MAX_EXTRA_REPEAT);
    let max = max.unwrap_or_else(|| min.saturating_add(UNBOUNDED_REPEAT));
    (min, max.min(cap).max(min))
}

fn emit<R: Rng + ?Sized>(hir: &Hir, rng: &mut R, out: &mut String) {
    match hir.kind() {
        HirKind::Empty | HirKind::Look(_) => {}
        HirKind::Literal(lit) => out.push_str(&String::from_utf8_lossy(&lit.0)),
        HirKind::Class(class) => {
            if let Some(c) = pick_char(class, rng) {
                out.push(c);
            }
        }
        HirKind::Repetition(rep) => {
            if !satisfiable(&rep.sub) {
                return;
            }
            let (min, max) = repeat_bounds(rep.min, rep.max);
            let count = rng.gen_range(min..=max);
            for _ in 0..count {
                emit(&rep.sub, rng, out);
            }
        }
        HirKind::Capture(cap) => emit(&cap.sub, rng, out),
        HirKind::Concat(subs) => {
            for sub in subs {
                emit(sub, rng, out);
            }
        }
        HirKind::Alternation(subs) => {
            let live: Vec<&Hir> = subs.iter().filter(|s| satisfiable(s)).collect();
            if !live.is_empty() {
                emit(live[rng.gen_range(0..live.len())], rng, out);
            }
        }
    }
}

fn emit_simplest(hir: &Hir, out: &mut String) {
    match hir.kind() {
        HirKind::Empty | HirKind::Look(_) => {}
        HirKind::Literal(lit) => out.push_str(&String::from_utf8_lossy(&lit.0)),
        HirKind::Class(class) => {
            if let Some(c) = first_char(class) {
                out.push(c);
            }
        }
        HirKind::Repetition(rep) => {
            for _ in 0..rep.min {
                emit_simplest(&rep.sub, out);
            }
        }
        HirKind::Capture(cap) => emit_simplest(&cap.sub, out),
        HirKind::Concat(subs) => {
            for sub in subs {
                emit_simplest(sub, out);
            }
        }
        HirKind::Alternation(subs) => {
            if let Some(first) = subs.iter().find(|s| satisfiable(s)) {
                emit_simplest(first, out);
            }
        }
    }
}

fn class_ranges(class: &Class) -> Vec<(u32, u32)> {
    match class {
        Class::Unicode(cls) => cls
            .ranges()
            .iter()
            .map(|r| (u32::from(r.start()), u32::from(r.end())))
            .collect(),
        Class::Bytes(cls) => cls
            .ranges()
            .iter()
            .map(|r| (u32::from(r.start()), u32::from(r.end())))
            .collect(),
    }
}

fn printable_part(ranges: &[(u32, u32)]) -> Vec<(u32, u32)> {
    ranges
        .iter()
        .filter_map(|&(s, e)| {
            let s = s.max(PRINTABLE.0);
            let e = e.min(PRINTABLE.1);
            (s <= e).then_some((s, e))
        })
        .collect()
}

fn to_char(class: &Class, code: u32) -> Option<char> {
    match class {
        Class::Unicode(_) => char::from_u32(code),
        Class::Bytes(_) => u8::try_from(code).ok().map(char::from),
    }
}

fn pick_char<R: Rng + ?Sized>(class: &Class, rng: &mut R) -> Option<char> {
    let ranges = class_ranges(class);
    let printable = printable_part(&ranges);
    let pool = if !printable.is_empty() && rng.gen_bool(0.9) {
        &printable
    } else {
        &ranges
    };

    let total: u64 = pool.iter().map(|&(s, e)| u64::from(e - s) + 1).sum();
    if total == 0 {
        return None;
    }
    let mut pick = rng.gen_range(0..total);
    for &(s, e) in pool {
        let size = u64::from(e - s) + 1;
        if pick < size {
            let code = s + u32::try_from(pick).ok()?;
            // Surrogate gaps inside wide ranges fall back to the range start
            return to_char(class, code).or_else(|| to_char(class, s));
        }
        pick -= size;
    }
    None
}

fn first_char(class: &Class) -> Option<char> {
    let ranges = class_ranges(class);
    let code = printable_part(&ranges)
        .first()
        .or_else(|| ranges.first())
        .map(|&(s, _)| s)?;
    to_char(class, code)
}
