//! Parameter schema → value strategies
//!
//! [`Strategy::build`] compiles a [`ParameterSchema`] once. Drawing values,
//! validity checks and shrink candidates then work on the compiled tree, so
//! constraints are enforced by construction and contradictions surface at
//! build time as [`UnsatisfiableSchema`].

mod format;
mod merge;
mod pattern;
mod shrink;

use rand::Rng;
use schemafuzz_core::schema::{ObjectConstraints, ParameterSchema, StringConstraints};
use serde_json::{Map, Value};

use format::Format;
use pattern::Pattern;

/// Draws attempted before a pattern or format string with length bounds
/// is reported as a generation failure.
pub const PATTERN_ATTEMPTS: u32 = 64;

/// Probability of drawing a boundary value instead of a uniform one.
pub const DEFAULT_BOUNDARY_BIAS: f64 = 0.2;

/// Inclusion probability of each optional object property.
const OPTIONAL_FIELD_PROBABILITY: f64 = 0.5;

/// Half-width of the drawing window on unbounded numeric sides.
const UNBOUNDED_SPAN: i128 = 1000;

const DEFAULT_EXTRA_LENGTH: u64 = 20;
const DEFAULT_EXTRA_ITEMS: u64 = 3;

/// Longest generated string. A larger `minLength` is unsatisfiable.
const MAX_STRING_LEN: u64 = 10_000;

/// Largest generated array. A larger `minItems` is unsatisfiable.
const MAX_ITEMS: u64 = 1_000;

/// Relative slack when checking a float `multipleOf`.
const MULTIPLE_TOLERANCE: f64 = 1e-12;

/// The schema admits no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct UnsatisfiableSchema {
    pub reason: String,
}

impl UnsatisfiableSchema {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A single draw could not produce a valid value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no valid {what} value after {attempts} attempts")]
pub struct GenerationError {
    pub what: String,
    pub attempts: u32,
}

/// Compiled generator for one parameter schema.
#[derive(Debug, Clone)]
pub struct Strategy {
    node: Node,
    boundary_bias: f64,
}

impl Strategy {
    /// Compile a schema.
    ///
    /// # Errors
    ///
    /// Returns [`UnsatisfiableSchema`] when the constraints contradict each
    /// other: conflicting `allOf` types, `minimum > maximum`, empty `enum` or
    /// `oneOf`, no `multipleOf` inside the bounds, an undeclared required
    /// property with additional properties forbidden, or a pattern that
    /// matches nothing. A `minLength` or `minItems` above the generation
    /// limits is rejected the same way.
    pub fn build(schema: &ParameterSchema) -> Result<Self, UnsatisfiableSchema> {
        Ok(Self {
            node: build_node(schema)?,
            boundary_bias: DEFAULT_BOUNDARY_BIAS,
        })
    }

    /// Override the boundary bias. Values outside `[0, 1]` keep the default.
    #[must_use]
    pub fn with_boundary_bias(mut self, bias: f64) -> Self {
        if (0.0..=1.0).contains(&bias) {
            self.boundary_bias = bias;
        }
        self
    }

    /// Draw one valid value.
    ///
    /// # Errors
    ///
    /// Fails when a pattern or format string cannot meet its length bounds
    /// within [`PATTERN_ATTEMPTS`] draws, or when no draw matches exactly
    /// one `oneOf` variant within as many attempts.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Value, GenerationError> {
        self.node.draw(rng, self.boundary_bias)
    }

    /// Whether `value` satisfies the schema.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        self.node.accepts(value)
    }

    /// Valid candidates one step simpler than `value`, most aggressive first.
    #[must_use]
    pub fn shrink(&self, value: &Value) -> Vec<Value> {
        self.node.shrink(value)
    }

    /// The simplest valid value, when one can be built without drawing.
    #[must_use]
    pub fn simplest(&self) -> Option<Value> {
        self.node.simplest()
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Any,
    Null,
    Boolean,
    Integer(IntRange),
    Number(FloatRange),
    String(Box<StringNode>),
    Array(Box<ArrayNode>),
    Object(ObjectNode),
    Enum(Vec<Value>),
    /// Exactly one variant matches
    OneOf(Vec<Node>),
    /// At least one variant matches
    AnyOf(Vec<Node>),
}

pub(crate) fn build_node(schema: &ParameterSchema) -> Result<Node, UnsatisfiableSchema> {
    match schema {
        ParameterSchema::Any => Ok(Node::Any),
        ParameterSchema::Null => Ok(Node::Null),
        ParameterSchema::Boolean => Ok(Node::Boolean),
        ParameterSchema::Integer(c) => {
            let lower_lost = c.minimum.is_some() && c.lower().is_none();
            let upper_lost = c.maximum.is_some() && c.upper().is_none();
            if lower_lost || upper_lost {
                return Err(UnsatisfiableSchema::new(
                    "exclusive bound leaves no representable integer",
                ));
            }
            IntRange::new(c.lower(), c.upper(), c.multiple_of).map(Node::Integer)
        }
        ParameterSchema::Number(c) => FloatRange::new(
            c.minimum,
            c.maximum,
            c.exclusive_minimum,
            c.exclusive_maximum,
            c.multiple_of,
        )
        .map(Node::Number),
        ParameterSchema::String(c) => build_string(c).map(|s| Node::String(Box::new(s))),
        ParameterSchema::Array(c) => {
            let items = match build_node(&c.items) {
                Ok(node) => Some(node),
                Err(e) if c.min_items > 0 => {
                    return Err(UnsatisfiableSchema::new(format!("array items: {e}")));
                }
                Err(_) => None,
            };
            ArrayNode::new(items, c.min_items, c.max_items).map(|a| Node::Array(Box::new(a)))
        }
        ParameterSchema::Object(c) => build_object(c).map(Node::Object),
        ParameterSchema::Enum { values } => {
            if values.is_empty() {
                return Err(UnsatisfiableSchema::new("enum has no values"));
            }
            Ok(Node::Enum(values.clone()))
        }
        ParameterSchema::OneOf { variants } => build_variants(variants, "oneOf").map(Node::OneOf),
        ParameterSchema::AnyOf { variants } => build_variants(variants, "anyOf").map(Node::AnyOf),
        ParameterSchema::AllOf { schemas } => merge::all_of(schemas),
    }
}

/// Satisfiable variants. Unsatisfiable ones match nothing and are dropped.
fn build_variants(
    variants: &[ParameterSchema],
    keyword: &str,
) -> Result<Vec<Node>, UnsatisfiableSchema> {
    let mut last_error = None;
    let mut nodes = Vec::new();
    for variant in variants {
        match build_node(variant) {
            Ok(node) => nodes.push(node),
            Err(e) => last_error = Some(e),
        }
    }
    if nodes.is_empty() {
        return Err(last_error
            .unwrap_or_else(|| UnsatisfiableSchema::new(format!("{keyword} has no variants"))));
    }
    Ok(nodes)
}

fn build_string(c: &StringConstraints) -> Result<StringNode, UnsatisfiableSchema> {
    let pattern = c.pattern.as_deref().map(Pattern::compile).transpose()?;
    let format = c.format.as_deref().and_then(Format::parse);
    StringNode::new(c.min_length, c.max_length, format, pattern, Vec::new())
}

fn build_object(c: &ObjectConstraints) -> Result<ObjectNode, UnsatisfiableSchema> {
    let mut props = Vec::with_capacity(c.properties.len());
    for property in &c.properties {
        let required = c.is_required(&property.name);
        let node = match build_node(&property.schema) {
            Ok(node) => Some(node),
            Err(e) if required => {
                return Err(UnsatisfiableSchema::new(format!(
                    "required property {:?}: {e}",
                    property.name
                )));
            }
            Err(_) => None,
        };
        props.push(PropNode {
            name: property.name.clone(),
            node,
            required,
        });
    }

    for name in &c.required {
        if props.iter().any(|p| &p.name == name) {
            continue;
        }
        if !c.additional_properties {
            return Err(UnsatisfiableSchema::new(format!(
                "required property {name:?} is not declared and additional properties are forbidden"
            )));
        }
        props.push(PropNode {
            name: name.clone(),
            node: Some(Node::Any),
            required: true,
        });
    }

    Ok(ObjectNode {
        props,
        additional: c.additional_properties,
    })
}

impl Node {
    pub(crate) const fn type_name(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Integer(_) => "integer",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Enum(_) => "enum",
            Self::OneOf(_) => "oneOf",
            Self::AnyOf(_) => "anyOf",
        }
    }

    pub(crate) fn draw<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        bias: f64,
    ) -> Result<Value, GenerationError> {
        let value = match self {
            Self::Any => match rng.gen_range(0..4_u8) {
                0 => Value::Null,
                1 => Value::Bool(rng.gen_bool(0.5)),
                2 => Value::from(rng.gen_range(-100..=100_i64)),
                _ => {
                    let len = rng.gen_range(0..=8);
                    Value::String(random_alnum(rng, len))
                }
            },
            Self::Null => Value::Null,
            Self::Boolean => Value::Bool(rng.gen_bool(0.5)),
            Self::Integer(range) => Value::from(range.draw(rng, bias)),
            Self::Number(range) => Value::from(range.draw(rng, bias)),
            Self::String(node) => Value::String(node.draw(rng, bias)?),
            Self::Array(node) => node.draw(rng, bias)?,
            Self::Object(node) => node.draw(rng, bias)?,
            Self::Enum(values) => values[rng.gen_range(0..values.len())].clone(),
            Self::OneOf(variants) => {
                for _ in 0..PATTERN_ATTEMPTS {
                    let value = variants[rng.gen_range(0..variants.len())].draw(rng, bias)?;
                    if exactly_one(variants, &value) {
                        return Ok(value);
                    }
                }
                return Err(GenerationError {
                    what: "oneOf".into(),
                    attempts: PATTERN_ATTEMPTS,
                });
            }
            Self::AnyOf(variants) => variants[rng.gen_range(0..variants.len())].draw(rng, bias)?,
        };
        Ok(value)
    }

    pub(crate) fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Null => value.is_null(),
            Self::Boolean => value.is_boolean(),
            Self::Integer(range) => as_integer(value).is_some_and(|v| range.contains(v)),
            Self::Number(range) => value.as_f64().is_some_and(|v| range.contains(v)),
            Self::String(node) => value.as_str().is_some_and(|s| node.accepts(s)),
            Self::Array(node) => node.accepts(value),
            Self::Object(node) => node.accepts(value),
            Self::Enum(values) => values.contains(value),
            Self::OneOf(variants) => exactly_one(variants, value),
            Self::AnyOf(variants) => variants.iter().any(|v| v.accepts(value)),
        }
    }
}

fn exactly_one(variants: &[Node], value: &Value) -> bool {
    variants.iter().filter(|v| v.accepts(value)).take(2).count() == 1
}

/// Integer value of a JSON number, counting floats with no fraction.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn as_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

/// Integer range with effective inclusive bounds and a positive step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IntRange {
    min: Option<i64>,
    max: Option<i64>,
    step: i64,
    /// Smallest valid value
    first: i64,
    /// Largest valid value
    last: i64,
}

fn floor_div(a: i128, b: i128) -> i128 {
    a.div_euclid(b)
}

fn ceil_div(a: i128, b: i128) -> i128 {
    -(-a).div_euclid(b)
}

impl IntRange {
    pub(crate) fn new(
        min: Option<i64>,
        max: Option<i64>,
        multiple_of: Option<i64>,
    ) -> Result<Self, UnsatisfiableSchema> {
        let step = multiple_of.unwrap_or(1);
        if step <= 0 {
            return Err(UnsatisfiableSchema::new(format!(
                "multipleOf must be positive, got {step}"
            )));
        }
        let lo = min.unwrap_or(i64::MIN);
        let hi = max.unwrap_or(i64::MAX);
        if lo > hi {
            return Err(UnsatisfiableSchema::new(format!(
                "minimum {lo} is greater than maximum {hi}"
            )));
        }

        let s = i128::from(step);
        let first = ceil_div(i128::from(lo), s) * s;
        let last = floor_div(i128::from(hi), s) * s;
        let (Ok(first), Ok(last)) = (i64::try_from(first), i64::try_from(last)) else {
            return Err(UnsatisfiableSchema::new(format!(
                "no multiple of {step} between {lo} and {hi}"
            )));
        };
        if first > last {
            return Err(UnsatisfiableSchema::new(format!(
                "no multiple of {step} between {lo} and {hi}"
            )));
        }

        Ok(Self {
            min,
            max,
            step,
            first,
            last,
        })
    }

    pub(crate) fn contains(&self, v: i64) -> bool {
        v >= self.first && v <= self.last && v.rem_euclid(self.step) == 0
    }

    /// Drawing window: the bounds, or a window around the bounded side.
    fn window(&self) -> (i128, i128) {
        let s = i128::from(self.step);
        let first = i128::from(self.first);
        let last = i128::from(self.last);
        match (self.min, self.max) {
            (Some(_), Some(_)) => (first, last),
            (Some(_), None) => (first, (first + 2 * UNBOUNDED_SPAN * s).min(last)),
            (None, Some(_)) => ((last - 2 * UNBOUNDED_SPAN * s).max(first), last),
            (None, None) => ((-UNBOUNDED_SPAN * s).max(first), (UNBOUNDED_SPAN * s).min(last)),
        }
    }

    /// Bounds, zero and the smallest steps around it, when valid.
    pub(crate) fn boundaries(&self) -> Vec<i64> {
        let mut values = Vec::new();
        for v in [self.first, self.last, 0, self.step, -self.step] {
            if self.contains(v) && !values.contains(&v) {
                values.push(v);
            }
        }
        values
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R, bias: f64) -> i64 {
        if rng.gen_bool(bias) {
            let edges = self.boundaries();
            return edges[rng.gen_range(0..edges.len())];
        }
        let s = i128::from(self.step);
        let (lo, hi) = self.window();
        let k = rng.gen_range(ceil_div(lo, s)..=floor_div(hi, s));
        i64::try_from(k * s).unwrap_or(self.first)
    }

    /// Value shrinking converges to: zero, or the bound nearest to it.
    pub(crate) fn target(&self) -> i64 {
        if self.contains(0) {
            0
        } else if self.first > 0 {
            self.first
        } else {
            self.last
        }
    }
}

/// Floating point range with an optional `multipleOf`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct FloatRange {
    min: Option<f64>,
    max: Option<f64>,
    exclusive_min: bool,
    exclusive_max: bool,
    multiple_of: Option<f64>,
    /// Smallest valid value
    first: Option<f64>,
    /// Largest valid value
    last: Option<f64>,
}

/// Smallest float above a finite `x`.
fn next_up(x: f64) -> f64 {
    if x == 0.0 {
        return f64::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

fn next_down(x: f64) -> f64 {
    -next_up(-x)
}

/// Rounds `q` to the nearest integer when it is one up to float error.
fn snap(q: f64) -> f64 {
    let r = q.round();
    if (q - r).abs() <= MULTIPLE_TOLERANCE * q.abs().max(1.0) {
        r
    } else {
        q
    }
}

pub(crate) fn is_multiple(v: f64, m: f64) -> bool {
    if v == 0.0 {
        return true;
    }
    let q = v / m;
    if q.is_finite() {
        snap(q).fract() == 0.0
    } else {
        v.fract() == 0.0
    }
}

/// `lo..=hi` at `t` in `[0, 1)`, without overflowing on wide spans.
fn lerp(lo: f64, hi: f64, t: f64) -> f64 {
    (lo * (1.0 - t) + hi * t).clamp(lo, hi)
}

impl FloatRange {
    pub(crate) fn new(
        min: Option<f64>,
        max: Option<f64>,
        exclusive_min: bool,
        exclusive_max: bool,
        multiple_of: Option<f64>,
    ) -> Result<Self, UnsatisfiableSchema> {
        if let Some(m) = multiple_of {
            if !(m.is_finite() && m > 0.0) {
                return Err(UnsatisfiableSchema::new(format!(
                    "multipleOf must be positive, got {m}"
                )));
            }
        }
        let first = min.map(|m| if exclusive_min { next_up(m) } else { m });
        let last = max.map(|m| if exclusive_max { next_down(m) } else { m });
        let describe = || {
            let lo = min.map_or_else(|| "-inf".to_string(), |v| v.to_string());
            let hi = max.map_or_else(|| "inf".to_string(), |v| v.to_string());
            format!("between {lo} and {hi}")
        };
        if first.is_some_and(|v| !v.is_finite()) || last.is_some_and(|v| !v.is_finite()) {
            return Err(UnsatisfiableSchema::new(format!(
                "no finite number {}",
                describe()
            )));
        }
        if let (Some(lo), Some(hi)) = (first, last) {
            if lo > hi {
                return Err(UnsatisfiableSchema::new(format!("no number {}", describe())));
            }
        }
        let range = Self {
            min,
            max,
            exclusive_min: exclusive_min && min.is_some(),
            exclusive_max: exclusive_max && max.is_some(),
            multiple_of,
            first,
            last,
        };
        if let Some(m) = multiple_of {
            let (a, b) = range.multipliers(m);
            if a > b {
                return Err(UnsatisfiableSchema::new(format!(
                    "no multiple of {m} {}",
                    describe()
                )));
            }
        }
        Ok(range)
    }

    pub(crate) fn contains(&self, v: f64) -> bool {
        v.is_finite()
            && self.first.is_none_or(|f| v >= f)
            && self.last.is_none_or(|l| v <= l)
            && self.multiple_of.is_none_or(|m| is_multiple(v, m))
    }

    fn clamp_to_bounds(&self, v: f64) -> f64 {
        let v = self.first.map_or(v, |f| v.max(f));
        self.last.map_or(v, |l| v.min(l))
    }

    /// Integer multipliers of `m` inside the bounds; infinite when unbounded.
    fn multipliers(&self, m: f64) -> (f64, f64) {
        let a = self.first.map_or(f64::NEG_INFINITY, |f| snap(f / m).ceil());
        let b = self.last.map_or(f64::INFINITY, |l| snap(l / m).floor());
        (a, b)
    }

    /// Drawing window: the bounds, or a window around the bounded side.
    fn window(&self) -> (f64, f64) {
        let span = 2.0 * UNBOUNDED_SPAN as f64;
        match (self.first, self.last) {
            (Some(lo), Some(hi)) => (lo, hi),
            (Some(lo), None) => (lo, (lo + span).min(f64::MAX)),
            (None, Some(hi)) => ((hi - span).max(f64::MIN), hi),
            (None, None) => (-span / 2.0, span / 2.0),
        }
    }

    /// Same as [`Self::window`], counted in multipliers of `m`.
    fn multiplier_window(&self, m: f64) -> (f64, f64) {
        let span = 2.0 * UNBOUNDED_SPAN as f64;
        let (a, b) = self.multipliers(m);
        match (a.is_finite(), b.is_finite()) {
            (true, true) => (a, b),
            (true, false) => (a, a + span),
            (false, true) => (b - span, b),
            (false, false) => (-span / 2.0, span / 2.0),
        }
    }

    /// Bounds, zero and the outermost multiples, when valid.
    fn boundaries(&self) -> Vec<f64> {
        let mut values: Vec<f64> = self.first.into_iter().chain(self.last).collect();
        values.push(0.0);
        if let Some(m) = self.multiple_of {
            let (a, b) = self.multipliers(m);
            values.extend([a * m, b * m]);
        }
        let mut edges = Vec::new();
        for v in values {
            if self.contains(v) && !edges.contains(&v) {
                edges.push(v);
            }
        }
        edges
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R, bias: f64) -> f64 {
        if rng.gen_bool(bias) {
            let edges = self.boundaries();
            if !edges.is_empty() {
                return edges[rng.gen_range(0..edges.len())];
            }
        }
        let t: f64 = rng.r#gen();
        let v = match self.multiple_of {
            None => {
                let (lo, hi) = self.window();
                lerp(lo, hi, t)
            }
            Some(m) => {
                let (a, b) = self.multiplier_window(m);
                self.clamp_to_bounds(lerp(a, b, t).round() * m)
            }
        };
        if self.contains(v) { v } else { self.simplest() }
    }

    /// Zero when allowed, otherwise a valid value near it, preferring
    /// whole numbers.
    pub(crate) fn simplest(&self) -> f64 {
        let zero = self.clamp_to_bounds(0.0);
        let candidates = match self.multiple_of {
            Some(m) => {
                let (a, b) = self.multipliers(m);
                let k = 0.0_f64.clamp(a, b);
                [k * m, self.clamp_to_bounds(k * m), zero]
            }
            None => [zero.trunc(), zero.trunc() + zero.signum(), zero],
        };
        candidates
            .into_iter()
            .find(|v| self.contains(*v))
            .unwrap_or(zero)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StringNode {
    min_len: u64,
    max_len: Option<u64>,
    format: Option<Format>,
    /// Pattern used to generate values
    pattern: Option<Pattern>,
    /// Further patterns the value must also match (from `allOf`)
    extra_patterns: Vec<Pattern>,
}

impl StringNode {
    pub(crate) fn new(
        min_len: u64,
        max_len: Option<u64>,
        format: Option<Format>,
        pattern: Option<Pattern>,
        extra_patterns: Vec<Pattern>,
    ) -> Result<Self, UnsatisfiableSchema> {
        if let Some(max) = max_len {
            if min_len > max {
                return Err(UnsatisfiableSchema::new(format!(
                    "minLength {min_len} is greater than maxLength {max}"
                )));
            }
        }
        if min_len > MAX_STRING_LEN {
            return Err(UnsatisfiableSchema::new(format!(
                "minLength {min_len} exceeds the generation limit of {MAX_STRING_LEN}"
            )));
        }
        Ok(Self {
            min_len,
            max_len,
            format,
            pattern,
            extra_patterns,
        })
    }

    fn fits_length(&self, s: &str) -> bool {
        let len = s.chars().count() as u64;
        len >= self.min_len && self.max_len.is_none_or(|max| len <= max)
    }

    pub(crate) fn accepts(&self, s: &str) -> bool {
        // A pattern takes precedence over the format
        let shaped = match (&self.pattern, self.format) {
            (Some(p), _) => p.is_match(s),
            (None, Some(f)) => f.matches(s),
            (None, None) => true,
        };
        shaped && self.fits_length(s) && self.extra_patterns.iter().all(|p| p.is_match(s))
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R, bias: f64) -> Result<String, GenerationError> {
        if let Some(pattern) = &self.pattern {
            return self.retry(rng, format!("pattern {:?}", pattern.source()), |rng| {
                pattern.generate(rng)
            });
        }
        if let Some(format) = self.format {
            return self.retry(rng, format.name().to_string(), |rng| format.generate(rng));
        }

        let min = self.min_len;
        let hi = self
            .max_len
            .unwrap_or(min.saturating_add(DEFAULT_EXTRA_LENGTH))
            .min(MAX_STRING_LEN);
        let len = if rng.gen_bool(bias) {
            if rng.gen_bool(0.5) { min } else { hi }
        } else {
            rng.gen_range(min..=hi)
        };
        Ok(random_alnum(rng, usize::try_from(len).unwrap_or(usize::MAX)))
    }

    fn retry<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        what: String,
        mut generate: impl FnMut(&mut R) -> String,
    ) -> Result<String, GenerationError> {
        for _ in 0..PATTERN_ATTEMPTS {
            let s = generate(rng);
            if self.accepts(&s) {
                return Ok(s);
            }
        }
        Err(GenerationError {
            what,
            attempts: PATTERN_ATTEMPTS,
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ArrayNode {
    /// `None` when the item schema is unsatisfiable: only `[]` is valid
    items: Option<Node>,
    min: u64,
    max: Option<u64>,
}

impl ArrayNode {
    pub(crate) fn new(
        items: Option<Node>,
        min: u64,
        max: Option<u64>,
    ) -> Result<Self, UnsatisfiableSchema> {
        if let Some(max) = max {
            if min > max {
                return Err(UnsatisfiableSchema::new(format!(
                    "minItems {min} is greater than maxItems {max}"
                )));
            }
        }
        if items.is_none() && min > 0 {
            return Err(UnsatisfiableSchema::new(
                "array requires items but the item schema is unsatisfiable",
            ));
        }
        if min > MAX_ITEMS {
            return Err(UnsatisfiableSchema::new(format!(
                "minItems {min} exceeds the generation limit of {MAX_ITEMS}"
            )));
        }
        let max = if items.is_none() { Some(0) } else { max };
        Ok(Self { items, min, max })
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R, bias: f64) -> Result<Value, GenerationError> {
        let Some(items) = &self.items else {
            return Ok(Value::Array(Vec::new()));
        };
        let hi = self
            .max
            .unwrap_or(self.min.saturating_add(DEFAULT_EXTRA_ITEMS))
            .min(MAX_ITEMS);
        let count = if rng.gen_bool(bias) {
            if rng.gen_bool(0.5) { self.min } else { hi }
        } else {
            rng.gen_range(self.min..=hi)
        };
        (0..count)
            .map(|_| items.draw(rng, bias))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }

    fn accepts(&self, value: &Value) -> bool {
        let Value::Array(values) = value else {
            return false;
        };
        let len = values.len() as u64;
        len >= self.min
            && self.max.is_none_or(|max| len <= max)
            && values
                .iter()
                .all(|v| self.items.as_ref().is_some_and(|items| items.accepts(v)))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PropNode {
    name: String,
    /// `None` when the property schema is unsatisfiable: never generated
    node: Option<Node>,
    required: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct ObjectNode {
    props: Vec<PropNode>,
    additional: bool,
}

impl ObjectNode {
    fn draw<R: Rng + ?Sized>(&self, rng: &mut R, bias: f64) -> Result<Value, GenerationError> {
        let mut obj = Map::new();
        for prop in &self.props {
            let Some(node) = &prop.node else {
                continue;
            };
            if prop.required || rng.gen_bool(OPTIONAL_FIELD_PROBABILITY) {
                obj.insert(prop.name.clone(), node.draw(rng, bias)?);
            }
        }
        Ok(Value::Object(obj))
    }

    fn prop(&self, name: &str) -> Option<&PropNode> {
        self.props.iter().find(|p| p.name == name)
    }

    fn accepts(&self, value: &Value) -> bool {
        let Value::Object(obj) = value else {
            return false;
        };
        let declared_ok = self.props.iter().all(|prop| match obj.get(&prop.name) {
            None => !prop.required,
            Some(v) => prop.node.as_ref().is_some_and(|node| node.accepts(v)),
        });
        declared_ok && (self.additional || obj.keys().all(|k| self.prop(k).is_some()))
    }
}

pub(crate) fn random_alnum<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    (0..len)
        .map(|_| char::from(CHARSET[rng.gen_range(0..CHARSET.len())]))
        .collect()
}
