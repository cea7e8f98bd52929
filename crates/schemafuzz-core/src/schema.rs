//! Parameter schema model
//!
//! A closed, tagged constraint tree. Every variant carries only the
//! constraints that apply to it, so generation and shrinking dispatch on the
//! tag instead of probing a loose JSON document at runtime.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-Schema-like constraint tree for one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterSchema {
    /// `{}`: any JSON value is acceptable
    Any,
    Null,
    Boolean,
    Integer(IntegerConstraints),
    Number(NumberConstraints),
    String(StringConstraints),
    Array(ArrayConstraints),
    Object(ObjectConstraints),
    /// Fixed set of allowed values
    Enum { values: Vec<Value> },
    /// Value must satisfy exactly one of the variants
    OneOf { variants: Vec<ParameterSchema> },
    /// Value must satisfy at least one of the variants
    AnyOf { variants: Vec<ParameterSchema> },
    /// Value must satisfy every schema at once
    AllOf { schemas: Vec<ParameterSchema> },
}

impl ParameterSchema {
    /// Short tag name, as it appears in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Integer(_) => "integer",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Enum { .. } => "enum",
            Self::OneOf { .. } => "oneOf",
            Self::AnyOf { .. } => "anyOf",
            Self::AllOf { .. } => "allOf",
        }
    }

    /// Unconstrained integer.
    #[must_use]
    pub fn integer() -> Self {
        Self::Integer(IntegerConstraints::default())
    }

    /// Integer within `[minimum, maximum]`.
    #[must_use]
    pub fn integer_range(minimum: i64, maximum: i64) -> Self {
        Self::Integer(IntegerConstraints {
            minimum: Some(minimum),
            maximum: Some(maximum),
            ..IntegerConstraints::default()
        })
    }

    /// Unconstrained string.
    #[must_use]
    pub fn string() -> Self {
        Self::String(StringConstraints::default())
    }
}

/// Integer bounds. Exclusive flags apply to the bound next to them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IntegerConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<i64>,
    #[serde(default)]
    pub exclusive_minimum: bool,
    #[serde(default)]
    pub exclusive_maximum: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiple_of: Option<i64>,
}

impl IntegerConstraints {
    /// Effective inclusive lower bound, `None` when unbounded.
    #[must_use]
    pub fn lower(&self) -> Option<i64> {
        match self.minimum {
            Some(min) if self.exclusive_minimum => min.checked_add(1),
            other => other,
        }
    }

    /// Effective inclusive upper bound, `None` when unbounded.
    #[must_use]
    pub fn upper(&self) -> Option<i64> {
        match self.maximum {
            Some(max) if self.exclusive_maximum => max.checked_sub(1),
            other => other,
        }
    }
}

/// Floating point bounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NumberConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default)]
    pub exclusive_minimum: bool,
    #[serde(default)]
    pub exclusive_maximum: bool,
    /// Positive divisor every value must be an integer multiple of
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiple_of: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StringConstraints {
    #[serde(default)]
    pub min_length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    /// ECMA-style regular expression, unanchored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// `email`, `uuid`, `date`, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ArrayConstraints {
    pub items: Box<ParameterSchema>,
    #[serde(default)]
    pub min_items: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ObjectConstraints {
    /// Declared properties, in document order
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub required: Vec<String>,
    /// `additionalProperties: false` makes this `false`
    #[serde(default = "default_true")]
    pub additional_properties: bool,
}

impl Default for ObjectConstraints {
    fn default() -> Self {
        Self {
            properties: Vec::new(),
            required: Vec::new(),
            additional_properties: true,
        }
    }
}

impl ObjectConstraints {
    #[must_use]
    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&ParameterSchema> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.schema)
    }
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Property {
    pub name: String,
    pub schema: ParameterSchema,
}

/// Where a parameter goes in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Body,
}

impl ParameterLocation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::Body => "body",
        }
    }
}

impl std::fmt::Display for ParameterLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parameter definition of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Parameter {
    pub name: String,
    pub location: ParameterLocation,
    #[serde(default)]
    pub required: bool,
    pub schema: ParameterSchema,
    /// Explicit example from the document, used by the explicit phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
}

impl Parameter {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        location: ParameterLocation,
        required: bool,
        schema: ParameterSchema,
    ) -> Self {
        Self {
            name: name.into(),
            location,
            // Path parameters are always required by construction
            required: required || location == ParameterLocation::Path,
            schema,
            example: None,
        }
    }

    #[must_use]
    pub fn with_example(mut self, example: Value) -> Self {
        self.example = Some(example);
        self
    }
}

/// A documented endpoint + method pair, immutable once extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Operation {
    /// Upper-case HTTP method
    pub method: String,
    /// Path template, e.g. `/users/{user_id}`
    pub path: String,
    pub base_url: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Status codes declared under `responses`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub declared_statuses: Vec<u16>,
    /// Set when a parameter schema could not be understood
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_error: Option<String>,
}

impl Operation {
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into().to_uppercase(),
            path: path.into(),
            base_url: base_url.into(),
            parameters: Vec::new(),
            tags: Vec::new(),
            declared_statuses: Vec::new(),
            schema_error: None,
        }
    }

    #[must_use]
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Label used across reports: `"GET /users/{user_id}"`
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}
