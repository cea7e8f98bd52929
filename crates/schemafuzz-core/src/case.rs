//! Generated cases and their request representation

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One concrete, generated request for an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Case {
    /// Operation label: "GET /users/{user_id}"
    pub operation: String,
    pub method: String,
    /// Path template
    pub path: String,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub path_parameters: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Status codes the operation declares (used by conformance checks)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub declared_statuses: Vec<u16>,
    /// Iteration seed this case was drawn from, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Case {
    /// Empty case for the given operation coordinates.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let method = method.into();
        let path = path.into();
        Self {
            operation: format!("{method} {path}"),
            method,
            path,
            base_url: base_url.into(),
            path_parameters: BTreeMap::new(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
            declared_statuses: Vec::new(),
            seed: None,
        }
    }

    /// Path with `{name}` placeholders substituted and percent-encoded.
    #[must_use]
    pub fn formatted_path(&self) -> String {
        let mut path = self.path.clone();
        for (name, value) in &self.path_parameters {
            let encoded = encode_path_segment(&value_to_param_string(value));
            path = path.replace(&format!("{{{name}}}"), &encoded);
        }
        path
    }

    /// Full request URL without the query string.
    #[must_use]
    pub fn url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.formatted_path()
        )
    }

    /// Query pairs in key order. Arrays repeat the key once per item.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (name, value) in &self.query {
            match value {
                Value::Array(items) => {
                    for item in items {
                        pairs.push((name.clone(), value_to_param_string(item)));
                    }
                }
                other => pairs.push((name.clone(), value_to_param_string(other))),
            }
        }
        pairs
    }

    #[must_use]
    pub fn header_pairs(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(k, v)| (k.clone(), value_to_param_string(v)))
            .collect()
    }

    /// Same request input, ignoring the seed it was drawn from.
    #[must_use]
    pub fn same_input(&self, other: &Self) -> bool {
        self.operation == other.operation
            && self.path_parameters == other.path_parameters
            && self.query == other.query
            && self.headers == other.headers
            && self.body == other.body
    }

    /// Request snapshot for reporting and reproduction.
    #[must_use]
    pub fn to_request(&self) -> RequestSnapshot {
        let mut url = self.url();
        let query = self.query_pairs();
        if !query.is_empty() {
            let encoded: Vec<String> = query
                .iter()
                .map(|(k, v)| format!("{}={}", encode_query_component(k), encode_query_component(v)))
                .collect();
            url.push('?');
            url.push_str(&encoded.join("&"));
        }
        RequestSnapshot {
            method: self.method.clone(),
            url,
            headers: self.header_pairs().into_iter().collect(),
            body: self.body.as_ref().map(Value::to_string),
        }
    }
}

/// Snapshot of an HTTP request for reproduction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Render a JSON value the way it travels in a path, query or header.
#[must_use]
pub fn value_to_param_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn encode_path_segment(raw: &str) -> String {
    percent_encode(raw, |b| b.is_ascii_alphanumeric() || b"-._~".contains(&b))
}

fn encode_query_component(raw: &str) -> String {
    percent_encode(raw, |b| {
        b.is_ascii_alphanumeric() || b"-._~!$'()*,;:@/?".contains(&b)
    })
}

fn percent_encode(raw: &str, keep: impl Fn(u8) -> bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if keep(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}
