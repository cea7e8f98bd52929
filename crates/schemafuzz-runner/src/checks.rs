//! Response checks
//!
//! An ordered list of named predicates. No I/O. Every registered check runs
//! for every response; the first failing one decides the failure kind.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use schemafuzz_core::case::Case;
use schemafuzz_core::outcome::{CheckFailure, DEADLINE_CHECK, Response};
use schemafuzz_core::report::CheckResult;

/// `(case, response) -> failure message`
pub type CheckFn = Arc<dyn Fn(&Case, &Response) -> Option<String> + Send + Sync>;

pub const NOT_A_SERVER_ERROR: &str = "not_a_server_error";
pub const STATUS_CODE_CONFORMANCE: &str = "status_code_conformance";

/// Names accepted by [`CheckSet::from_names`], besides `all`.
pub const BUILTIN_CHECKS: [&str; 2] = [NOT_A_SERVER_ERROR, STATUS_CODE_CONFORMANCE];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown check: {0}. Available checks: all, not_a_server_error, status_code_conformance")]
pub struct UnknownCheck(pub String);

/// 5xx responses are failures.
#[must_use]
pub fn not_a_server_error(_case: &Case, response: &Response) -> Option<String> {
    (500..600).contains(&response.status_code).then(|| {
        format!(
            "Received a response with 5xx status code: {}",
            response.status_code
        )
    })
}

/// Responses must use a declared status code. Skipped when nothing is
/// declared; 5xx is left to [`not_a_server_error`].
#[must_use]
pub fn status_code_conformance(case: &Case, response: &Response) -> Option<String> {
    let status = response.status_code;
    if case.declared_statuses.is_empty()
        || case.declared_statuses.contains(&status)
        || (500..600).contains(&status)
    {
        return None;
    }
    let declared: Vec<String> = case
        .declared_statuses
        .iter()
        .map(ToString::to_string)
        .collect();
    Some(format!(
        "Received a response with a status code, which is not defined in the schema: {status} (declared: {})",
        declared.join(", ")
    ))
}

#[derive(Clone)]
struct Check {
    name: String,
    func: CheckFn,
}

/// Result of running every check against one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub failure: Option<CheckFailure>,
    /// Pass/fail per check, in evaluation order
    pub results: Vec<CheckResult>,
}

/// Ordered check registry plus the optional latency deadline.
#[derive(Clone, Default)]
pub struct CheckSet {
    checks: Vec<Check>,
    deadline: Option<Duration>,
}

impl fmt::Debug for CheckSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckSet")
            .field("checks", &self.names())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl CheckSet {
    /// No checks at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Only `not_a_server_error`.
    #[must_use]
    pub fn standard() -> Self {
        Self::empty().with_check(NOT_A_SERVER_ERROR, not_a_server_error)
    }

    /// Built-in checks by name, in the given order. `all` selects every
    /// built-in check.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownCheck`] for a name that is not built in.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, UnknownCheck> {
        let mut set = Self::empty();
        for name in names {
            let name = name.as_ref();
            let selected: Vec<&str> = if name == "all" {
                BUILTIN_CHECKS.to_vec()
            } else {
                vec![name]
            };
            for name in selected {
                if set.contains(name) {
                    continue;
                }
                set = match name {
                    NOT_A_SERVER_ERROR => set.with_check(name, not_a_server_error),
                    STATUS_CODE_CONFORMANCE => set.with_check(name, status_code_conformance),
                    other => return Err(UnknownCheck(other.to_string())),
                };
            }
        }
        Ok(set)
    }

    /// Register a check after the existing ones.
    #[must_use]
    pub fn with_check<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Case, &Response) -> Option<String> + Send + Sync + 'static,
    {
        self.checks.push(Check {
            name: name.into(),
            func: Arc::new(func),
        });
        self
    }

    /// Responses slower than `deadline` fail with `deadline_exceeded`,
    /// evaluated after every registered check.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name.as_str()).collect()
    }

    fn contains(&self, name: &str) -> bool {
        self.checks.iter().any(|c| c.name == name)
    }

    /// Run every check. The first failing registered check decides the
    /// failure kind; all failing names are kept.
    #[must_use]
    pub fn evaluate(&self, case: &Case, response: &Response) -> Evaluation {
        let mut results = Vec::with_capacity(self.checks.len() + 1);
        let mut failures: Vec<(&str, String)> = Vec::new();

        for check in &self.checks {
            let message = (check.func)(case, response);
            results.push(CheckResult {
                name: check.name.clone(),
                passed: message.is_none(),
            });
            if let Some(message) = message {
                failures.push((check.name.as_str(), message));
            }
        }

        let mut deadline_failure = None;
        if let Some(deadline) = self.deadline {
            let exceeded = response.elapsed > deadline;
            results.push(CheckResult {
                name: DEADLINE_CHECK.to_string(),
                passed: !exceeded,
            });
            if exceeded {
                deadline_failure = Some(CheckFailure::deadline_exceeded(response.elapsed, deadline));
            }
        }

        let failure = match (failures.first(), deadline_failure) {
            (Some((name, message)), deadline) => {
                let mut failure = CheckFailure::new(*name, message.clone());
                failure.failing_checks = failures.iter().map(|(n, _)| (*n).to_string()).collect();
                if deadline.is_some() {
                    failure.failing_checks.push(DEADLINE_CHECK.to_string());
                }
                Some(failure)
            }
            (None, deadline) => deadline,
        };

        Evaluation { failure, results }
    }
}
