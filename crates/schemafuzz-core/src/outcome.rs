//! Responses, check failures and execution outcomes

use std::collections::BTreeMap;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::case::Case;

/// Name under which deadline violations are reported.
pub const DEADLINE_CHECK: &str = "deadline_exceeded";

/// Maximum number of body bytes kept in a [`ResponseSummary`].
pub const MAX_BODY_BYTES: usize = 4096;

/// A response as returned by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status_code: u16,
    /// Header names are lower-case
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    /// Latency measured by the transport
    pub elapsed: Duration,
}

impl Response {
    #[must_use]
    pub fn new(status_code: u16, elapsed: Duration) -> Self {
        Self {
            status_code,
            headers: BTreeMap::new(),
            body: None,
            elapsed,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Media type without parameters, e.g. `application/json`.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get("content-type")
            .and_then(|ct| ct.split(';').next())
            .map(str::trim)
    }

    /// Reporting view: latency in milliseconds, body truncated.
    #[must_use]
    pub fn summary(&self) -> ResponseSummary {
        ResponseSummary {
            status_code: self.status_code,
            latency_ms: u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX),
            content_type: self.content_type().map(str::to_string),
            body: self.body.as_deref().map(truncate_body),
        }
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_BODY_BYTES {
        return body.to_string();
    }
    // Walk back to a char boundary
    let mut end = MAX_BODY_BYTES;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…({} bytes total)", &body[..end], body.len())
}

/// Snapshot of an HTTP response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResponseSummary {
    pub status_code: u16,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Latency metadata of a deadline violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeadlineExceeded {
    pub latency_ms: u64,
    pub deadline_ms: u64,
}

/// Why a response was judged invalid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CheckFailure {
    /// First registered check that failed; decides the failure kind
    pub check: String,
    pub message: String,
    /// Every failing check, in registration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failing_checks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DeadlineExceeded>,
}

impl CheckFailure {
    #[must_use]
    pub fn new(check: impl Into<String>, message: impl Into<String>) -> Self {
        let check = check.into();
        Self {
            failing_checks: vec![check.clone()],
            check,
            message: message.into(),
            deadline: None,
        }
    }

    #[must_use]
    pub fn deadline_exceeded(latency: Duration, deadline: Duration) -> Self {
        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        let deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
        Self {
            check: DEADLINE_CHECK.to_string(),
            message: format!("Response took {latency_ms}ms, which exceeds the deadline of {deadline_ms}ms"),
            failing_checks: vec![DEADLINE_CHECK.to_string()],
            deadline: Some(DeadlineExceeded {
                latency_ms,
                deadline_ms,
            }),
        }
    }

    #[must_use]
    pub fn is_deadline_exceeded(&self) -> bool {
        self.deadline.is_some()
    }
}

/// Category of an execution error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection refused, DNS failure, reset
    Connection,
    /// Hard request timeout hit
    Timeout,
    /// The request could not be built
    InvalidRequest,
    /// Any other transport fault
    Transport,
    /// The operation's parameter schema is not understood
    InvalidSchema,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection error",
            Self::Timeout => "timeout",
            Self::InvalidRequest => "invalid request",
            Self::Transport => "transport error",
            Self::InvalidSchema => "invalid schema",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorCause {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorCause {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of executing one case, or the terminal classification of an
/// operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    CheckFailed {
        failure: CheckFailure,
        case: Case,
        response: ResponseSummary,
    },
    Errored {
        cause: ErrorCause,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        case: Option<Case>,
    },
    Unsatisfiable {
        reason: String,
        /// Valid cases produced before generation gave up
        #[serde(default)]
        valid_iterations: u32,
    },
    Flaky {
        case: Case,
        /// Outcome that triggered the investigation
        first: Box<Outcome>,
        /// Conflicting outcome observed on replay
        second: Box<Outcome>,
    },
}

/// Classification tag of an [`Outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Passed,
    CheckFailed,
    Errored,
    Unsatisfiable,
    Flaky,
}

impl OutcomeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::CheckFailed => "failed",
            Self::Errored => "errored",
            Self::Unsatisfiable => "unsatisfiable",
            Self::Flaky => "flaky",
        }
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a failure, compared when shrinking and replaying.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailureSignature {
    Check(String),
    Error(ErrorKind),
}

impl Outcome {
    #[must_use]
    pub const fn kind(&self) -> OutcomeKind {
        match self {
            Self::Passed => OutcomeKind::Passed,
            Self::CheckFailed { .. } => OutcomeKind::CheckFailed,
            Self::Errored { .. } => OutcomeKind::Errored,
            Self::Unsatisfiable { .. } => OutcomeKind::Unsatisfiable,
            Self::Flaky { .. } => OutcomeKind::Flaky,
        }
    }

    #[must_use]
    pub const fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    /// Failure identity; `None` for anything that is not a check failure or
    /// an execution error.
    #[must_use]
    pub fn signature(&self) -> Option<FailureSignature> {
        match self {
            Self::CheckFailed { failure, .. } => Some(FailureSignature::Check(failure.check.clone())),
            Self::Errored { cause, .. } => Some(FailureSignature::Error(cause.kind)),
            _ => None,
        }
    }

    /// The case attached to this outcome, if any.
    #[must_use]
    pub fn case(&self) -> Option<&Case> {
        match self {
            Self::CheckFailed { case, .. } | Self::Flaky { case, .. } => Some(case),
            Self::Errored { case, .. } => case.as_ref(),
            _ => None,
        }
    }

    /// One-line description used in logs and summaries.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Passed => "passed".to_string(),
            Self::CheckFailed {
                failure, response, ..
            } => format!(
                "{} failed: {} (status {})",
                failure.check, failure.message, response.status_code
            ),
            Self::Errored { cause, .. } => cause.to_string(),
            Self::Unsatisfiable { reason, .. } => format!("unsatisfiable: {reason}"),
            Self::Flaky { first, second, .. } => format!(
                "flaky: {} then {}",
                first.kind(),
                second.kind()
            ),
        }
    }
}
