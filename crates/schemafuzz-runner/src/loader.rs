//! OpenAPI / Swagger document loading and operation extraction
//!
//! Parameter schemas are lowered from JSON Schema into [`ParameterSchema`]
//! here, once. A schema that cannot be understood does not abort loading:
//! the operation keeps a `schema_error` and is reported as errored.

use std::path::Path;

use regex::Regex;
use schemafuzz_core::config::FilterConfig;
use schemafuzz_core::schema::{
    ArrayConstraints, IntegerConstraints, NumberConstraints, ObjectConstraints, Operation,
    Parameter, ParameterLocation, ParameterSchema, Property, StringConstraints,
};
use serde_json::{Map, Value};
use tracing::debug;

/// Maximum nesting depth while lowering a schema.
const MAX_DEPTH: u32 = 20;

const METHODS: [&str; 7] = ["get", "put", "post", "delete", "options", "head", "patch"];

/// Keys that never constrain a value.
const ANNOTATIONS: [&str; 6] = [
    "title",
    "description",
    "example",
    "examples",
    "deprecated",
    "externalDocs",
];

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Cannot read {path}: {message}")]
    Io { path: String, message: String },
    #[error("Schema was not found at {0}")]
    NotFound(String),
    #[error("Failed to load schema, code {code} was returned from {url}")]
    Status { code: u16, url: String },
    #[error("Failed to fetch schema from {url}: {message}")]
    Fetch { url: String, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid {what} filter {pattern:?}: {message}")]
    Filter {
        what: &'static str,
        pattern: String,
        message: String,
    },
}

/// A JSON Schema fragment the lowering does not support.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SchemaError(String);

impl SchemaError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Read a document from disk or fetch it over HTTP(S).
///
/// # Errors
///
/// Returns [`LoadError`] when the document cannot be read, fetched or parsed.
pub fn load_document(location: &str) -> Result<Value, LoadError> {
    let content = if is_url(location) {
        fetch(location)?
    } else {
        std::fs::read_to_string(location).map_err(|e| LoadError::Io {
            path: location.to_string(),
            message: e.to_string(),
        })?
    };
    parse_document(Path::new(location), &content)
}

fn fetch(url: &str) -> Result<String, LoadError> {
    let fetch_error = |e: reqwest::Error| LoadError::Fetch {
        url: url.to_string(),
        message: e.to_string(),
    };
    let response = reqwest::blocking::get(url).map_err(fetch_error)?;
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(LoadError::NotFound(url.to_string()));
    }
    if !status.is_success() {
        return Err(LoadError::Status {
            code: status.as_u16(),
            url: url.to_string(),
        });
    }
    response.text().map_err(fetch_error)
}

/// Parse JSON or YAML.
///
/// Detection strategy: try extension first (`.yaml`/`.yml`/`.json`), then
/// fall back to content sniffing (leading `{` → JSON, otherwise YAML).
///
/// # Errors
///
/// Returns [`LoadError::Parse`] on malformed content.
pub fn parse_document(path: &Path, content: &str) -> Result<Value, LoadError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let as_json = |content: &str| {
        serde_json::from_str(content).map_err(|e| LoadError::Parse(format!("Invalid JSON: {e}")))
    };
    let as_yaml = |content: &str| {
        serde_yml::from_str(content).map_err(|e| LoadError::Parse(format!("Invalid YAML: {e}")))
    };

    match ext.as_str() {
        "yaml" | "yml" => as_yaml(content),
        "json" => as_json(content),
        _ if content.trim_start().starts_with('{') => as_json(content),
        _ => as_yaml(content),
    }
}

/// Base URL declared by the document: the first OpenAPI `servers` entry, or
/// Swagger `schemes`/`host`/`basePath`. A relative server URL is resolved
/// against `location` when that is a URL. A document fetched from a URL that
/// declares neither falls back to the origin it was fetched from.
#[must_use]
pub fn declared_base_url(document: &Value, location: &str) -> Option<String> {
    if let Some(server) = document
        .pointer("/servers/0/url")
        .and_then(Value::as_str)
    {
        if is_url(server) {
            return Some(server.trim_end_matches('/').to_string());
        }
        let origin = origin_of(location)?;
        return Some(format!("{origin}/{}", server.trim_matches('/')).trim_end_matches('/').to_string());
    }

    let Some(host) = document.get("host").and_then(Value::as_str) else {
        return origin_of(location);
    };
    let scheme = document
        .get("schemes")
        .and_then(Value::as_array)
        .and_then(|schemes| {
            let schemes: Vec<&str> = schemes.iter().filter_map(Value::as_str).collect();
            schemes
                .iter()
                .find(|s| **s == "https")
                .or_else(|| schemes.first())
                .map(|s| (*s).to_string())
        })
        .unwrap_or_else(|| "http".to_string());
    let base_path = document
        .get("basePath")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim_end_matches('/');
    Some(format!("{scheme}://{host}{base_path}"))
}

/// `https://host:port` part of a URL.
fn origin_of(location: &str) -> Option<String> {
    if !is_url(location) {
        return None;
    }
    let (scheme, rest) = location.split_once("://")?;
    let authority = rest.split('/').next().unwrap_or(rest);
    Some(format!("{scheme}://{authority}"))
}

/// Every operation of the document, in path then method order.
#[must_use]
pub fn extract_operations(document: &Value, base_url: &str) -> Vec<Operation> {
    let mut operations = Vec::new();
    let Some(paths) = document.get("paths").and_then(Value::as_object) else {
        return operations;
    };

    for (path, path_item) in paths {
        let path_item = resolve(path_item, document).unwrap_or(path_item);
        for method in METHODS {
            let Some(raw) = path_item.get(method) else {
                continue;
            };
            operations.push(extract_operation(document, base_url, path, method, path_item, raw));
        }
    }
    operations
}

fn extract_operation(
    document: &Value,
    base_url: &str,
    path: &str,
    method: &str,
    path_item: &Value,
    raw: &Value,
) -> Operation {
    let mut operation = Operation::new(method, path, base_url);
    operation.tags = raw
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| tags.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    if let Some(responses) = raw.get("responses").and_then(Value::as_object) {
        for status in responses.keys().filter_map(|k| k.parse::<u16>().ok()) {
            if !operation.declared_statuses.contains(&status) {
                operation.declared_statuses.push(status);
            }
        }
    }

    // Operation-level parameters override path-level ones with the same name and location
    let mut raw_params: Vec<&Value> = Vec::new();
    for source in [path_item.get("parameters"), raw.get("parameters")]
        .into_iter()
        .flatten()
        .filter_map(Value::as_array)
    {
        for param in source {
            let param = resolve(param, document).unwrap_or(param);
            let key = (param.get("name"), param.get("in"));
            raw_params.retain(|p| (p.get("name"), p.get("in")) != key);
            raw_params.push(param);
        }
    }

    let mut errors = Vec::new();
    for param in raw_params {
        match lower_parameter(param, document) {
            Ok(Some(parameter)) => operation.parameters.push(parameter),
            Ok(None) => {}
            Err(e) => errors.push(e),
        }
    }
    if let Some(body) = raw.get("requestBody") {
        match lower_request_body(body, document) {
            Ok(Some(parameter)) => operation.parameters.push(parameter),
            Ok(None) => debug!(operation = %operation.label(), "request body has no JSON content, skipped"),
            Err(e) => errors.push(e),
        }
    }
    if !errors.is_empty() {
        operation.schema_error = Some(errors.join("; "));
    }
    operation
}

fn lower_parameter(param: &Value, document: &Value) -> Result<Option<Parameter>, String> {
    let Some(name) = param.get("name").and_then(Value::as_str) else {
        return Ok(None);
    };
    let location = match param.get("in").and_then(Value::as_str) {
        Some("path") => ParameterLocation::Path,
        Some("query") => ParameterLocation::Query,
        Some("header") => ParameterLocation::Header,
        Some("body") => ParameterLocation::Body,
        other => {
            debug!(parameter = name, location = ?other, "unsupported parameter location, skipped");
            return Ok(None);
        }
    };
    let required = param.get("required").and_then(Value::as_bool).unwrap_or(false);

    // OpenAPI 3 and Swagger body parameters carry a `schema`; other Swagger
    // parameters inline their constraints
    let schema_source = match param.get("schema") {
        Some(schema) => schema.clone(),
        None => {
            let mut inline = param.as_object().cloned().unwrap_or_default();
            for key in ["name", "in", "required", "allowEmptyValue", "collectionFormat"] {
                inline.remove(key);
            }
            Value::Object(inline)
        }
    };
    let schema = lower(&schema_source, document)
        .map_err(|e| format!("{location} parameter {name:?}: {e}"))?;

    let mut parameter = Parameter::new(
        if location == ParameterLocation::Body { "body" } else { name },
        location,
        required,
        schema,
    );
    if let Some(example) = example_of(param).or_else(|| example_of(&schema_source)) {
        parameter = parameter.with_example(example);
    }
    Ok(Some(parameter))
}

fn lower_request_body(body: &Value, document: &Value) -> Result<Option<Parameter>, String> {
    let body = resolve(body, document).unwrap_or(body);
    let Some(content) = body.get("content").and_then(Value::as_object) else {
        return Ok(None);
    };
    let media = content.get("application/json").or_else(|| {
        content
            .iter()
            .find(|(media_type, _)| media_type.ends_with("+json"))
            .map(|(_, media)| media)
    });
    let Some(media) = media else {
        return Ok(None);
    };
    let schema_source = media.get("schema").cloned().unwrap_or(Value::Bool(true));
    let schema = lower(&schema_source, document).map_err(|e| format!("request body: {e}"))?;
    let required = body.get("required").and_then(Value::as_bool).unwrap_or(false);
    let mut parameter = Parameter::new("body", ParameterLocation::Body, required, schema);
    if let Some(example) = example_of(media).or_else(|| example_of(&schema_source)) {
        parameter = parameter.with_example(example);
    }
    Ok(Some(parameter))
}

/// `example`, or the first value of an OpenAPI `examples` map.
fn example_of(value: &Value) -> Option<Value> {
    if let Some(example) = value.get("example") {
        return Some(example.clone());
    }
    value
        .get("examples")
        .and_then(Value::as_object)
        .and_then(|examples| examples.values().next())
        .and_then(|example| example.get("value"))
        .cloned()
}

/// Follow a local `$ref`, if any. `None` for anything else.
fn resolve<'a>(value: &'a Value, document: &'a Value) -> Option<&'a Value> {
    let reference = value.get("$ref")?.as_str()?;
    let mut target = document.pointer(reference.strip_prefix('#')?)?;
    // Chains of references
    for _ in 0..MAX_DEPTH {
        match target.get("$ref").and_then(Value::as_str) {
            Some(next) => target = document.pointer(next.strip_prefix('#')?)?,
            None => return Some(target),
        }
    }
    None
}

/// Lower a JSON Schema into a [`ParameterSchema`].
///
/// # Errors
///
/// Returns [`SchemaError`] for unknown types, non-local or dangling
/// references and unsupported keywords.
pub fn lower(schema: &Value, document: &Value) -> Result<ParameterSchema, SchemaError> {
    Lowering {
        document,
        stack: Vec::new(),
    }
    .lower(schema, 0)
}

struct Lowering<'a> {
    document: &'a Value,
    /// References being expanded; a repeat is a cycle
    stack: Vec<String>,
}

impl Lowering<'_> {
    fn lower(&mut self, schema: &Value, depth: u32) -> Result<ParameterSchema, SchemaError> {
        if depth > MAX_DEPTH {
            return Ok(ParameterSchema::Any);
        }
        let obj = match schema {
            Value::Bool(true) => return Ok(ParameterSchema::Any),
            Value::Bool(false) => {
                return Ok(ParameterSchema::Enum { values: Vec::new() });
            }
            Value::Object(obj) => obj,
            other => return Err(SchemaError::new(format!("schema must be an object, got {other}"))),
        };

        if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
            return self.lower_ref(reference, depth);
        }

        let lowered = self.lower_keywords(obj, depth)?;
        // OpenAPI 3.0 `nullable`
        if obj.get("nullable").and_then(Value::as_bool) == Some(true) {
            return Ok(ParameterSchema::AnyOf {
                variants: vec![lowered, ParameterSchema::Null],
            });
        }
        Ok(lowered)
    }

    fn lower_ref(&mut self, reference: &str, depth: u32) -> Result<ParameterSchema, SchemaError> {
        let Some(pointer) = reference.strip_prefix('#') else {
            return Err(SchemaError::new(format!(
                "unsupported non-local reference {reference:?}"
            )));
        };
        if self.stack.iter().any(|r| r == reference) {
            // Recursive schema: stop expanding
            return Ok(ParameterSchema::Any);
        }
        let document = self.document;
        let target = document
            .pointer(pointer)
            .ok_or_else(|| SchemaError::new(format!("unresolvable reference {reference:?}")))?;
        self.stack.push(reference.to_string());
        let lowered = self.lower(target, depth + 1);
        self.stack.pop();
        lowered
    }

    fn lower_keywords(
        &mut self,
        obj: &Map<String, Value>,
        depth: u32,
    ) -> Result<ParameterSchema, SchemaError> {
        if let Some(value) = obj.get("const") {
            return Ok(ParameterSchema::Enum {
                values: vec![value.clone()],
            });
        }
        if let Some(values) = obj.get("enum").and_then(Value::as_array) {
            return Ok(ParameterSchema::Enum {
                values: values.clone(),
            });
        }
        if let Some(members) = obj.get("allOf").and_then(Value::as_array) {
            let mut schemas = members
                .iter()
                .map(|m| self.lower(m, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            let rest = without(obj, &["allOf"]);
            if is_constraining(&rest) {
                schemas.push(self.lower_keywords(&rest, depth + 1)?);
            }
            return Ok(ParameterSchema::AllOf { schemas });
        }
        for key in ["oneOf", "anyOf"] {
            if let Some(variants) = obj.get(key).and_then(Value::as_array) {
                let variants = variants
                    .iter()
                    .map(|v| self.lower(v, depth + 1))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(if key == "oneOf" {
                    ParameterSchema::OneOf { variants }
                } else {
                    ParameterSchema::AnyOf { variants }
                });
            }
        }

        match obj.get("type") {
            None => {
                if obj.contains_key("properties") {
                    self.lower_typed("object", obj, depth)
                } else if obj.contains_key("items") {
                    self.lower_typed("array", obj, depth)
                } else if NUMERIC_KEYWORDS.iter().any(|k| obj.contains_key(*k)) {
                    self.lower_typed("number", obj, depth)
                } else if ["minLength", "maxLength", "pattern"]
                    .iter()
                    .any(|k| obj.contains_key(*k))
                {
                    self.lower_typed("string", obj, depth)
                } else {
                    Ok(ParameterSchema::Any)
                }
            }
            Some(Value::String(ty)) => self.lower_typed(ty, obj, depth),
            // OpenAPI 3.1 type lists
            Some(Value::Array(types)) => {
                let variants = types
                    .iter()
                    .map(|t| match t.as_str() {
                        Some(ty) => self.lower_typed(ty, obj, depth),
                        None => Err(SchemaError::new(format!("invalid type {t}"))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(match <[ParameterSchema; 1]>::try_from(variants) {
                    Ok([single]) => single,
                    Err(variants) => ParameterSchema::AnyOf { variants },
                })
            }
            Some(other) => Err(SchemaError::new(format!("invalid type {other}"))),
        }
    }

    fn lower_typed(
        &mut self,
        ty: &str,
        obj: &Map<String, Value>,
        depth: u32,
    ) -> Result<ParameterSchema, SchemaError> {
        match ty {
            "null" => Ok(ParameterSchema::Null),
            "boolean" => Ok(ParameterSchema::Boolean),
            "integer" => integer(obj).map(ParameterSchema::Integer),
            "number" => number(obj).map(ParameterSchema::Number),
            "string" => Ok(ParameterSchema::String(StringConstraints {
                min_length: obj.get("minLength").and_then(Value::as_u64).unwrap_or(0),
                max_length: obj.get("maxLength").and_then(Value::as_u64),
                pattern: obj.get("pattern").and_then(Value::as_str).map(str::to_string),
                format: obj.get("format").and_then(Value::as_str).map(str::to_string),
            })),
            "array" => {
                let items = match obj.get("items") {
                    None => ParameterSchema::Any,
                    Some(Value::Array(_)) => {
                        return Err(SchemaError::new("tuple-style array items are not supported"));
                    }
                    Some(items) => self.lower(items, depth + 1)?,
                };
                Ok(ParameterSchema::Array(ArrayConstraints {
                    items: Box::new(items),
                    min_items: obj.get("minItems").and_then(Value::as_u64).unwrap_or(0),
                    max_items: obj.get("maxItems").and_then(Value::as_u64),
                }))
            }
            "object" => {
                let mut properties = Vec::new();
                if let Some(props) = obj.get("properties").and_then(Value::as_object) {
                    for (name, schema) in props {
                        properties.push(Property {
                            name: name.clone(),
                            schema: self.lower(schema, depth + 1)?,
                        });
                    }
                }
                let required = obj
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|r| r.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default();
                Ok(ParameterSchema::Object(ObjectConstraints {
                    properties,
                    required,
                    additional_properties: obj.get("additionalProperties") != Some(&Value::Bool(false)),
                }))
            }
            other => Err(SchemaError::new(format!("unknown type {other:?}"))),
        }
    }
}

const NUMERIC_KEYWORDS: [&str; 5] = [
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
];

fn without(obj: &Map<String, Value>, keys: &[&str]) -> Map<String, Value> {
    obj.iter()
        .filter(|(k, _)| !keys.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn is_constraining(obj: &Map<String, Value>) -> bool {
    obj.keys()
        .any(|k| !ANNOTATIONS.contains(&k.as_str()) && k != "nullable" && k != "format")
}

/// Lower bound from `minimum` plus draft 4 (`true`) or draft 6+ (number)
/// `exclusiveMinimum`. Same for the upper bound.
fn bounds(obj: &Map<String, Value>, bound: &str, exclusive: &str) -> (Option<f64>, bool) {
    let inclusive = obj.get(bound).and_then(Value::as_f64);
    match obj.get(exclusive) {
        Some(Value::Bool(flag)) => (inclusive, *flag && inclusive.is_some()),
        Some(v) => match v.as_f64() {
            Some(limit) => (Some(limit), true),
            None => (inclusive, false),
        },
        None => (inclusive, false),
    }
}

fn number(obj: &Map<String, Value>) -> Result<NumberConstraints, SchemaError> {
    let (minimum, exclusive_minimum) = bounds(obj, "minimum", "exclusiveMinimum");
    let (maximum, exclusive_maximum) = bounds(obj, "maximum", "exclusiveMaximum");
    let multiple_of = match obj.get("multipleOf").and_then(Value::as_f64) {
        Some(m) if m <= 0.0 => {
            return Err(SchemaError::new(format!("multipleOf must be positive, got {m}")));
        }
        other => other,
    };
    Ok(NumberConstraints {
        minimum,
        maximum,
        exclusive_minimum,
        exclusive_maximum,
        multiple_of,
    })
}

#[allow(clippy::cast_possible_truncation)]
fn integer(obj: &Map<String, Value>) -> Result<IntegerConstraints, SchemaError> {
    // Fractional bounds round inwards; casts saturate at the i64 limits
    let (minimum, exclusive_minimum) = bounds(obj, "minimum", "exclusiveMinimum");
    let (maximum, exclusive_maximum) = bounds(obj, "maximum", "exclusiveMaximum");
    let lower = minimum.map(|m| {
        if m.fract() == 0.0 {
            (m as i64, exclusive_minimum)
        } else {
            (m.ceil() as i64, false)
        }
    });
    let upper = maximum.map(|m| {
        if m.fract() == 0.0 {
            (m as i64, exclusive_maximum)
        } else {
            (m.floor() as i64, false)
        }
    });
    let multiple_of = match obj.get("multipleOf").and_then(Value::as_f64) {
        None => None,
        Some(m) if m > 0.0 && m.fract() == 0.0 => Some(m as i64),
        Some(m) => {
            return Err(SchemaError::new(format!(
                "integer multipleOf must be a positive integer, got {m}"
            )));
        }
    };
    Ok(IntegerConstraints {
        minimum: lower.map(|(v, _)| v),
        maximum: upper.map(|(v, _)| v),
        exclusive_minimum: lower.is_some_and(|(_, e)| e),
        exclusive_maximum: upper.is_some_and(|(_, e)| e),
        multiple_of,
    })
}

/// Selects operations by path, method and tag. Empty lists match everything;
/// an operation is kept when it matches every non-empty list.
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    endpoints: Vec<Regex>,
    methods: Vec<String>,
    tags: Vec<Regex>,
}

impl OperationFilter {
    /// # Errors
    ///
    /// Returns [`LoadError::Filter`] for an invalid endpoint or tag regex.
    pub fn new<S: AsRef<str>>(endpoints: &[S], methods: &[S], tags: &[S]) -> Result<Self, LoadError> {
        Ok(Self {
            endpoints: compile_all("endpoint", endpoints)?,
            methods: methods.iter().map(|m| m.as_ref().to_ascii_uppercase()).collect(),
            tags: compile_all("tag", tags)?,
        })
    }

    /// # Errors
    ///
    /// Returns [`LoadError::Filter`] for an invalid endpoint or tag regex.
    pub fn from_config(filter: &FilterConfig) -> Result<Self, LoadError> {
        Self::new(&filter.endpoints, &filter.methods, &filter.tags)
    }

    #[must_use]
    pub fn matches(&self, operation: &Operation) -> bool {
        (self.endpoints.is_empty() || self.endpoints.iter().any(|r| r.is_match(&operation.path)))
            && (self.methods.is_empty() || self.methods.iter().any(|m| *m == operation.method))
            && (self.tags.is_empty()
                || operation
                    .tags
                    .iter()
                    .any(|tag| self.tags.iter().any(|r| r.is_match(tag))))
    }

    #[must_use]
    pub fn apply(&self, operations: Vec<Operation>) -> Vec<Operation> {
        operations.into_iter().filter(|op| self.matches(op)).collect()
    }
}

fn compile_all<S: AsRef<str>>(what: &'static str, patterns: &[S]) -> Result<Vec<Regex>, LoadError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p.as_ref()).map_err(|e| LoadError::Filter {
                what,
                pattern: p.as_ref().to_string(),
                message: e.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn petstore() -> Value {
        json!({
            "openapi": "3.0.3",
            "servers": [{"url": "http://api.local/v1/"}],
            "paths": {
                "/pets/{petId}": {
                    "parameters": [
                        {"name": "petId", "in": "path", "required": true,
                         "schema": {"type": "integer", "minimum": 1}},
                        {"name": "verbose", "in": "query", "schema": {"type": "string"}}
                    ],
                    "get": {
                        "tags": ["pets"],
                        "parameters": [
                            {"name": "verbose", "in": "query", "schema": {"type": "boolean"}},
                            {"$ref": "#/components/parameters/Trace"}
                        ],
                        "responses": {"200": {}, "404": {}, "default": {}}
                    },
                    "delete": {"responses": {"204": {}}}
                },
                "/pets": {
                    "post": {
                        "tags": ["pets", "admin"],
                        "requestBody": {
                            "required": true,
                            "content": {"application/json": {
                                "schema": {"$ref": "#/components/schemas/Pet"},
                                "example": {"name": "rex"}
                            }}
                        },
                        "responses": {"201": {}}
                    }
                }
            },
            "components": {
                "parameters": {
                    "Trace": {"name": "X-Trace", "in": "header", "example": "abc",
                              "schema": {"type": "string", "maxLength": 8}}
                },
                "schemas": {
                    "Pet": {
                        "type": "object",
                        "required": ["name"],
                        "properties": {
                            "name": {"type": "string", "minLength": 1},
                            "tag": {"type": "string", "nullable": true}
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn parse_document_json_by_extension() {
        let v = parse_document(Path::new("api.json"), r#"{"openapi":"3.0.0"}"#).unwrap();
        assert_eq!(v["openapi"], "3.0.0");
    }

    #[test]
    fn parse_document_yaml_by_extension() {
        let v = parse_document(Path::new("api.yml"), "openapi: '3.0.0'\n").unwrap();
        assert_eq!(v["openapi"], "3.0.0");
    }

    #[test]
    fn parse_document_sniffs_content() {
        let json = parse_document(Path::new("schema"), r#"  {"swagger":"2.0"}"#).unwrap();
        assert_eq!(json["swagger"], "2.0");
        let yaml = parse_document(Path::new("schema"), "swagger: '2.0'\n").unwrap();
        assert_eq!(yaml["swagger"], "2.0");
    }

    #[test]
    fn parse_document_reports_format() {
        let err = parse_document(Path::new("api.json"), "{oops").unwrap_err();
        assert!(err.to_string().starts_with("Parse error: Invalid JSON"), "{err}");
        let err = parse_document(Path::new("api.yaml"), "a: [1,").unwrap_err();
        assert!(err.to_string().starts_with("Parse error: Invalid YAML"), "{err}");
    }

    #[test]
    fn operations_in_document_order() {
        let ops = extract_operations(&petstore(), "http://localhost");
        let labels: Vec<String> = ops.iter().map(Operation::label).collect();
        assert_eq!(labels, vec!["GET /pets/{petId}", "DELETE /pets/{petId}", "POST /pets"]);
        assert!(ops.iter().all(|op| op.base_url == "http://localhost"));
    }

    #[test]
    fn parameters_merge_and_resolve() {
        let ops = extract_operations(&petstore(), "http://localhost");
        let get = &ops[0];
        let names: Vec<(&str, ParameterLocation)> = get
            .parameters
            .iter()
            .map(|p| (p.name.as_str(), p.location))
            .collect();
        assert_eq!(
            names,
            vec![
                ("petId", ParameterLocation::Path),
                ("verbose", ParameterLocation::Query),
                ("X-Trace", ParameterLocation::Header),
            ]
        );
        // Operation level wins
        assert_eq!(get.parameters[1].schema, ParameterSchema::Boolean);
        assert_eq!(get.parameters[2].example, Some(json!("abc")));
        assert_eq!(get.declared_statuses, vec![200, 404]);
        assert_eq!(get.tags, vec!["pets"]);
        assert!(get.schema_error.is_none());
        // Path-level parameters apply to every method
        assert_eq!(ops[1].parameters.len(), 2);
    }

    #[test]
    fn request_body_is_lowered() {
        let ops = extract_operations(&petstore(), "http://localhost");
        let body = &ops[2].parameters[0];
        assert_eq!(body.location, ParameterLocation::Body);
        assert!(body.required);
        assert_eq!(body.example, Some(json!({"name": "rex"})));
        let ParameterSchema::Object(obj) = &body.schema else {
            panic!("expected an object, got {:?}", body.schema);
        };
        assert!(obj.is_required("name"));
        assert_eq!(
            obj.property("tag"),
            Some(&ParameterSchema::AnyOf {
                variants: vec![ParameterSchema::string(), ParameterSchema::Null]
            })
        );
    }

    #[test]
    fn swagger_parameters_and_base_url() {
        let doc = json!({
            "swagger": "2.0",
            "host": "api.local:8080",
            "basePath": "/v2/",
            "schemes": ["http"],
            "paths": {"/users": {"post": {
                "parameters": [
                    {"name": "limit", "in": "query", "type": "integer", "maximum": 50},
                    {"name": "payload", "in": "body", "required": true,
                     "schema": {"type": "object", "properties": {"id": {"type": "integer"}}}},
                    {"name": "avatar", "in": "formData", "type": "file"}
                ],
                "responses": {"200": {}}
            }}}
        });
        assert_eq!(
            declared_base_url(&doc, "swagger.json").as_deref(),
            Some("http://api.local:8080/v2")
        );
        let ops = extract_operations(&doc, "http://api.local:8080/v2");
        let params = &ops[0].parameters;
        assert_eq!(params.len(), 2);
        assert_eq!(
            params[0].schema,
            ParameterSchema::Integer(IntegerConstraints {
                maximum: Some(50),
                ..IntegerConstraints::default()
            })
        );
        assert_eq!(params[1].name, "body");
        assert_eq!(params[1].location, ParameterLocation::Body);
    }

    #[test]
    fn relative_server_url_uses_document_origin() {
        let doc = json!({"openapi": "3.0.0", "servers": [{"url": "/api"}], "paths": {}});
        assert_eq!(
            declared_base_url(&doc, "https://example.com/specs/openapi.json").as_deref(),
            Some("https://example.com/api")
        );
        assert_eq!(declared_base_url(&doc, "openapi.json"), None);
    }

    #[test]
    fn undeclared_server_falls_back_to_schema_origin() {
        let doc = json!({"openapi": "3.0.0", "paths": {}});
        assert_eq!(
            declared_base_url(&doc, "http://127.0.0.1:8000/openapi.json").as_deref(),
            Some("http://127.0.0.1:8000")
        );
        assert_eq!(declared_base_url(&doc, "openapi.json"), None);
    }

    #[test]
    fn unknown_type_marks_operation() {
        let doc = json!({"openapi": "3.0.0", "paths": {"/x": {"get": {
            "parameters": [{"name": "id", "in": "query", "schema": {"type": "int"}}]
        }}}});
        let ops = extract_operations(&doc, "http://localhost");
        assert_eq!(
            ops[0].schema_error.as_deref(),
            Some(r#"query parameter "id": unknown type "int""#)
        );
    }

    #[test]
    fn recursive_references_terminate() {
        let doc = json!({"components": {"schemas": {"Node": {
            "type": "object",
            "properties": {"child": {"$ref": "#/components/schemas/Node"}}
        }}}});
        let schema = lower(&json!({"$ref": "#/components/schemas/Node"}), &doc).unwrap();
        let ParameterSchema::Object(node) = schema else {
            panic!("expected an object");
        };
        assert_eq!(node.property("child"), Some(&ParameterSchema::Any));
    }

    #[test]
    fn dangling_reference_is_an_error() {
        let err = lower(&json!({"$ref": "#/components/schemas/Missing"}), &json!({})).unwrap_err();
        assert_eq!(err.to_string(), r##"unresolvable reference "#/components/schemas/Missing""##);
    }

    #[test]
    fn exclusive_bounds_both_drafts() {
        let draft4 = lower(
            &json!({"type": "integer", "minimum": 0, "exclusiveMinimum": true}),
            &Value::Null,
        )
        .unwrap();
        let draft6 = lower(&json!({"type": "integer", "exclusiveMinimum": 0}), &Value::Null).unwrap();
        assert_eq!(draft4, draft6);
        let ParameterSchema::Integer(c) = draft4 else {
            panic!("expected an integer");
        };
        assert_eq!(c.lower(), Some(1));
    }

    #[test]
    fn all_of_keeps_sibling_constraints() {
        let schema = lower(
            &json!({"allOf": [{"type": "integer"}], "maximum": 5, "description": "x"}),
            &Value::Null,
        )
        .unwrap();
        let ParameterSchema::AllOf { schemas } = schema else {
            panic!("expected allOf");
        };
        assert_eq!(
            schemas,
            vec![
                ParameterSchema::integer(),
                ParameterSchema::Number(NumberConstraints {
                    maximum: Some(5.0),
                    ..NumberConstraints::default()
                }),
            ]
        );
    }

    #[test]
    fn one_of_and_any_of_stay_distinct() {
        let branches = json!([{"type": "integer"}, {"type": "number"}]);
        let one_of = lower(&json!({"oneOf": branches}), &Value::Null).unwrap();
        let any_of = lower(&json!({"anyOf": branches}), &Value::Null).unwrap();
        assert_eq!(one_of.type_name(), "oneOf");
        assert_eq!(any_of.type_name(), "anyOf");
        let listed = lower(&json!({"type": ["integer", "null"]}), &Value::Null).unwrap();
        assert_eq!(listed.type_name(), "anyOf");
    }

    #[test]
    fn number_multiple_of_is_lowered() {
        let schema = lower(&json!({"multipleOf": 0.25, "minimum": 1}), &Value::Null).unwrap();
        assert_eq!(
            schema,
            ParameterSchema::Number(NumberConstraints {
                minimum: Some(1.0),
                multiple_of: Some(0.25),
                ..NumberConstraints::default()
            })
        );
        let err = lower(&json!({"type": "number", "multipleOf": 0}), &Value::Null).unwrap_err();
        assert!(err.to_string().contains("multipleOf must be positive"), "{err}");
    }

    #[test]
    fn filter_by_endpoint_method_and_tag() {
        let ops = extract_operations(&petstore(), "http://localhost");
        let by_method = OperationFilter::new(&["^/pets"], &["delete"], &[]).unwrap();
        let kept: Vec<String> = by_method.apply(ops.clone()).iter().map(Operation::label).collect();
        assert_eq!(kept, vec!["DELETE /pets/{petId}"]);

        let by_tag = OperationFilter::new::<&str>(&[], &[], &["^admin$"]).unwrap();
        assert_eq!(by_tag.apply(ops.clone()).len(), 1);
        assert_eq!(OperationFilter::default().apply(ops).len(), 3);

        let err = OperationFilter::new(&["("], &[], &[]).unwrap_err();
        assert!(err.to_string().starts_with("Invalid endpoint filter \"(\""), "{err}");
    }

    #[test]
    fn load_document_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openapi.yaml");
        std::fs::write(&path, "openapi: 3.0.0\npaths: {}\n").unwrap();
        let doc = load_document(path.to_str().unwrap()).unwrap();
        assert_eq!(doc["openapi"], "3.0.0");

        let missing = dir.path().join("missing.json");
        let err = load_document(missing.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }
}
