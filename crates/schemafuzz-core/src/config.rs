//! Project configuration for schema-driven fuzzing

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the check every run enables by default.
pub const DEFAULT_CHECK: &str = "not_a_server_error";

/// Project configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Schema location: local file path or http(s) URL
    pub schema: String,

    /// Base URL of the server to test (defaults to the schema's servers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// HTTP headers sent with every request (auth tokens, API keys)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Basic credentials as "user:password"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,

    /// Maximum generated examples per operation
    #[serde(default = "default_max_examples")]
    pub max_examples: u32,

    /// Per-request latency budget; slower responses fail `deadline_exceeded`
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,

    /// Hard connection-level timeout, must exceed the deadline
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Wall-clock budget per operation (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_budget_secs: Option<f64>,

    /// Wall-clock budget for the whole run (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_budget_secs: Option<f64>,

    /// Operations executed in parallel
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Global seed; drawn at random when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Use a fixed seed for fully deterministic runs
    #[serde(default)]
    pub derandomize: bool,

    /// Active checks, in evaluation order
    #[serde(default = "default_checks")]
    pub checks: Vec<String>,

    /// Enabled phases
    #[serde(default = "default_phases")]
    pub phases: Vec<Phase>,

    /// Shrink attempts per failing operation
    #[serde(default = "default_max_shrinks")]
    pub max_shrinks: u32,

    /// Probability of drawing an edge value instead of a uniform one
    #[serde(default = "default_boundary_bias")]
    pub boundary_bias: f64,

    /// Treat every unsatisfiable operation as a run failure
    #[serde(default)]
    pub strict_unsatisfiable: bool,

    /// Operation selection
    #[serde(default)]
    pub filter: FilterConfig,
}

/// Test phases that can be toggled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Run the case assembled from schema examples
    Explicit,
    /// Run randomly generated cases
    Generate,
    /// Minimize failing cases
    Shrink,
}

impl Phase {
    pub const ALL: [Self; 3] = [Self::Explicit, Self::Generate, Self::Shrink];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Generate => "generate",
            Self::Shrink => "shrink",
        }
    }
}

impl std::str::FromStr for Phase {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "explicit" => Ok(Self::Explicit),
            "generate" => Ok(Self::Generate),
            "shrink" => Ok(Self::Shrink),
            other => Err(ConfigError::Invalid(format!(
                "invalid phase '{other}', choose from explicit, generate, shrink"
            ))),
        }
    }
}

/// Operation filters. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Regexes searched in the path template
    #[serde(default)]
    pub endpoints: Vec<String>,
    /// HTTP methods, case-insensitive
    #[serde(default)]
    pub methods: Vec<String>,
    /// Regexes searched in the operation tags
    #[serde(default)]
    pub tags: Vec<String>,
}

const fn default_max_examples() -> u32 {
    100
}

const fn default_deadline_ms() -> u64 {
    500
}

const fn default_request_timeout_ms() -> u64 {
    5000
}

const fn default_workers() -> usize {
    4
}

const fn default_max_shrinks() -> u32 {
    200
}

const fn default_boundary_bias() -> f64 {
    0.2
}

fn default_checks() -> Vec<String> {
    vec![DEFAULT_CHECK.to_string()]
}

fn default_phases() -> Vec<Phase> {
    Phase::ALL.to_vec()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema: "openapi.yaml".to_string(),
            base_url: None,
            headers: BTreeMap::new(),
            auth: None,
            max_examples: default_max_examples(),
            deadline_ms: default_deadline_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            time_budget_secs: None,
            run_budget_secs: None,
            workers: default_workers(),
            seed: None,
            derandomize: false,
            checks: default_checks(),
            phases: default_phases(),
            max_shrinks: default_max_shrinks(),
            boundary_bias: default_boundary_bias(),
            strict_unsatisfiable: false,
            filter: FilterConfig::default(),
        }
    }
}

impl Config {
    /// Load config from file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        }
    }

    /// Load from the first default location that exists, if any.
    ///
    /// # Errors
    ///
    /// Returns error if a config file exists but cannot be loaded
    pub fn load_default() -> Result<Option<Self>, ConfigError> {
        let candidates = [".schemafuzz.toml", ".schemafuzz.json", "schemafuzz.toml"];

        for name in candidates {
            let path = Path::new(name);
            if path.exists() {
                return Self::load(path).map(Some);
            }
        }

        Ok(None)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.max_examples == 0 {
            return Err(ConfigError::Invalid(
                "max_examples must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.boundary_bias) {
            return Err(ConfigError::Invalid(format!(
                "boundary_bias must be within [0, 1], got {}",
                self.boundary_bias
            )));
        }
        if self.request_timeout_ms <= self.deadline_ms {
            return Err(ConfigError::Invalid(format!(
                "request_timeout_ms ({}) must be larger than deadline_ms ({})",
                self.request_timeout_ms, self.deadline_ms
            )));
        }
        for budget in [self.time_budget_secs, self.run_budget_secs].into_iter().flatten() {
            if !budget.is_finite() || budget <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "time budgets must be positive, got {budget}"
                )));
            }
        }
        if self.checks.is_empty() {
            return Err(ConfigError::Invalid("at least one check is required".into()));
        }
        if let Some(auth) = &self.auth {
            parse_credentials(auth)?;
        }
        for pattern in self.filter.endpoints.iter().chain(&self.filter.tags) {
            regex::Regex::new(pattern)
                .map_err(|e| ConfigError::Invalid(format!("invalid filter '{pattern}': {e}")))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn has_phase(&self, phase: Phase) -> bool {
        self.phases.contains(&phase)
    }

    /// Example config file
    pub fn example() -> &'static str {
        r#"# schemafuzz configuration

# Open API / Swagger document (file path or URL)
schema = "openapi.yaml"

# Server to test (defaults to the schema's `servers`)
base_url = "http://localhost:8080"

# Generated examples per operation
max_examples = 100

# Slower responses fail the `deadline_exceeded` check
deadline_ms = 500
# Hard timeout, reported as a transport error (must exceed deadline_ms)
request_timeout_ms = 5000

# Operations executed in parallel
workers = 4

# Fixed seed for reproducible runs
# seed = 1234
# derandomize = true

# Checks, first failing one decides the reported kind
checks = ["not_a_server_error"]

# phases = ["explicit", "generate", "shrink"]
# max_shrinks = 200
# boundary_bias = 0.2

# HTTP headers (auth, api keys)
[headers]
# Authorization = "Bearer your-token-here"

# Operation selection
[filter]
# endpoints = ["users"]
# methods = ["GET"]
# tags = ["public"]
"#
    }
}

/// Split `user:password` credentials.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] when the separator is missing or the
/// user name is empty
pub fn parse_credentials(raw: &str) -> Result<(String, String), ConfigError> {
    let Some((user, password)) = raw.split_once(':') else {
        return Err(ConfigError::Invalid(format!(
            "Should be in KEY:VALUE format. Got: {raw}"
        )));
    };
    if user.is_empty() {
        return Err(ConfigError::Invalid("Username should not be empty".into()));
    }
    Ok((user.to_string(), password.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {0}: {1}")]
    Io(PathBuf, String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
