//! Per-value shrink candidates
//!
//! Every candidate is valid for the node and one transformation step
//! simpler than the input: closer to the numeric target, shorter, fewer
//! elements or optional fields, or an earlier alternative.

use serde_json::Value;

use super::{ArrayNode, FloatRange, IntRange, Node, ObjectNode, StringNode};

impl Node {
    pub(crate) fn shrink(&self, value: &Value) -> Vec<Value> {
        let candidates = match self {
            Self::Any => {
                if value.is_null() {
                    Vec::new()
                } else {
                    vec![Value::Null]
                }
            }
            Self::Null => Vec::new(),
            Self::Boolean => {
                if value == &Value::Bool(true) {
                    vec![Value::Bool(false)]
                } else {
                    Vec::new()
                }
            }
            Self::Integer(range) => value
                .as_i64()
                .map(|v| range.shrink(v).into_iter().map(Value::from).collect())
                .unwrap_or_default(),
            Self::Number(range) => value
                .as_f64()
                .map(|v| range.shrink(v).into_iter().map(Value::from).collect())
                .unwrap_or_default(),
            Self::String(node) => value
                .as_str()
                .map(|s| node.shrink(s).into_iter().map(Value::String).collect())
                .unwrap_or_default(),
            Self::Array(node) => node.shrink(value),
            Self::Object(node) => node.shrink(value),
            Self::Enum(values) => values
                .iter()
                .position(|v| v == value)
                .map(|idx| values[..idx].to_vec())
                .unwrap_or_default(),
            Self::OneOf(variants) | Self::AnyOf(variants) => {
                let Some(idx) = variants.iter().position(|v| v.accepts(value)) else {
                    return Vec::new();
                };
                let mut out: Vec<Value> = variants[..idx]
                    .iter()
                    .filter_map(Self::simplest)
                    .collect();
                out.extend(variants[idx].shrink(value));
                // A candidate may also match another oneOf variant
                out.retain(|c| self.accepts(c));
                out
            }
        };
        distinct(candidates, value)
    }

    pub(crate) fn simplest(&self) -> Option<Value> {
        match self {
            Self::Any | Self::Null => Some(Value::Null),
            Self::Boolean => Some(Value::Bool(false)),
            Self::Integer(range) => Some(Value::from(range.target())),
            Self::Number(range) => Some(Value::from(range.simplest())),
            Self::String(node) => node.simplest().map(Value::String),
            Self::Array(node) => {
                let count = usize::try_from(node.min).ok()?;
                if count == 0 {
                    return Some(Value::Array(Vec::new()));
                }
                let item = node.items.as_ref()?.simplest()?;
                Some(Value::Array(vec![item; count]))
            }
            Self::Object(node) => {
                let mut obj = serde_json::Map::new();
                for prop in node.props.iter().filter(|p| p.required) {
                    obj.insert(prop.name.clone(), prop.node.as_ref()?.simplest()?);
                }
                Some(Value::Object(obj))
            }
            Self::Enum(values) => values.first().cloned(),
            Self::OneOf(variants) => variants
                .iter()
                .filter_map(Self::simplest)
                .find(|v| self.accepts(v)),
            Self::AnyOf(variants) => variants.iter().find_map(Self::simplest),
        }
    }
}

/// Unique candidates, excluding the original value.
fn distinct(candidates: Vec<Value>, original: &Value) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if &candidate != original && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

impl IntRange {
    /// Target, midpoint toward it, and one step toward it.
    pub(crate) fn shrink(&self, v: i64) -> Vec<i64> {
        let target = self.target();
        if v == target || !self.contains(v) {
            return Vec::new();
        }
        let t = i128::from(target);
        let s = i128::from(self.step);
        let k = (i128::from(v) - t) / s;

        let mut out = vec![t];
        if k.abs() > 1 {
            out.push(t + (k / 2) * s);
            out.push(i128::from(v) - k.signum() * s);
        }
        out.into_iter()
            .filter_map(|c| i64::try_from(c).ok())
            .filter(|c| self.contains(*c))
            .collect()
    }
}

impl FloatRange {
    pub(crate) fn shrink(&self, v: f64) -> Vec<f64> {
        let target = self.simplest();
        let distance = (v - target).abs();
        if distance == 0.0 || !self.contains(v) {
            return Vec::new();
        }
        let mut candidates = vec![target, v.trunc()];
        if distance >= 1.0 {
            candidates.push(target + (v - target) / 2.0);
        }
        if let Some(m) = self.multiple_of {
            // Snap all but the target onto the grid
            for c in candidates.iter_mut().skip(1) {
                *c = (*c / m).round() * m;
            }
            candidates.push(v - (v - target).signum() * m);
        }
        candidates
            .into_iter()
            .filter(|c| self.contains(*c) && (c - target).abs() < distance)
            .collect()
    }
}

impl StringNode {
    fn simplest(&self) -> Option<String> {
        let candidate = match (&self.pattern, self.format) {
            (Some(pattern), _) => pattern.simplest(),
            (None, Some(_)) => return None,
            (None, None) => "a".repeat(usize::try_from(self.min_len).ok()?),
        };
        self.accepts(&candidate).then_some(candidate)
    }

    /// Shorter strings; formatted values are left alone.
    fn shrink(&self, s: &str) -> Vec<String> {
        if self.pattern.is_none() && self.format.is_some() {
            return Vec::new();
        }
        let chars: Vec<char> = s.chars().collect();
        let n = chars.len();
        if n == 0 {
            return Vec::new();
        }
        let min = usize::try_from(self.min_len).unwrap_or(usize::MAX).min(n);

        let mut out: Vec<String> = Vec::new();
        if let Some(simplest) = self.simplest() {
            out.push(simplest);
        }
        out.push(chars[..min].iter().collect());
        out.push(chars[..(n / 2).max(min)].iter().collect());
        out.push(chars[..n - 1].iter().collect());
        out.push(chars[1..].iter().collect());

        let mut kept: Vec<String> = Vec::new();
        for candidate in out {
            if candidate.chars().count() < n && self.accepts(&candidate) && !kept.contains(&candidate)
            {
                kept.push(candidate);
            }
        }
        kept
    }
}

impl ArrayNode {
    fn shrink(&self, value: &Value) -> Vec<Value> {
        let Value::Array(items) = value else {
            return Vec::new();
        };
        let min = usize::try_from(self.min).unwrap_or(usize::MAX);
        let mut out = Vec::new();

        if items.len() > min {
            out.push(Value::Array(items[..min].to_vec()));
            for i in 0..items.len() {
                let mut fewer = items.clone();
                fewer.remove(i);
                out.push(Value::Array(fewer));
            }
        }
        if let Some(node) = &self.items {
            for (i, item) in items.iter().enumerate() {
                for candidate in node.shrink(item) {
                    let mut simpler = items.clone();
                    simpler[i] = candidate;
                    out.push(Value::Array(simpler));
                }
            }
        }
        out
    }
}

impl ObjectNode {
    fn shrink(&self, value: &Value) -> Vec<Value> {
        let Value::Object(obj) = value else {
            return Vec::new();
        };
        let mut out = Vec::new();

        // Drop optional declared fields, then undeclared extras
        for key in obj.keys() {
            let droppable = self.prop(key).is_none_or(|p| !p.required);
            if droppable {
                let mut fewer = obj.clone();
                fewer.remove(key);
                out.push(Value::Object(fewer));
            }
        }
        for (key, field) in obj {
            let Some(node) = self.prop(key).and_then(|p| p.node.as_ref()) else {
                continue;
            };
            for candidate in node.shrink(field) {
                let mut simpler = obj.clone();
                simpler.insert(key.clone(), candidate);
                out.push(Value::Object(simpler));
            }
        }
        out
    }
}
