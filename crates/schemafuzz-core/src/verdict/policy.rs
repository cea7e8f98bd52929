//! Verdict policy - determines how a run report is judged

use crate::outcome::{Outcome, OutcomeKind};
use crate::report::RunReport;

/// Policy for judging a finished run
#[derive(Debug, Clone, Default)]
pub struct VerdictPolicy {
    /// Strict mode: any unsatisfiable operation fails the run, even one that
    /// never produced a valid case
    pub strict_unsatisfiable: bool,
}

impl VerdictPolicy {
    #[must_use]
    pub fn strict() -> Self {
        Self {
            strict_unsatisfiable: true,
        }
    }

    /// Whether a terminal outcome fails the run under this policy.
    #[must_use]
    pub fn fails(&self, terminal: &Outcome) -> bool {
        match terminal {
            Outcome::Passed => false,
            Outcome::CheckFailed { .. } | Outcome::Errored { .. } | Outcome::Flaky { .. } => true,
            Outcome::Unsatisfiable {
                valid_iterations, ..
            } => self.strict_unsatisfiable || *valid_iterations > 0,
        }
    }

    /// Exit code of the run: 0 on pass, 1 on fail.
    #[must_use]
    pub fn exit_code(&self, report: &RunReport) -> i32 {
        i32::from(self.verdict(report).status == VerdictStatus::Fail)
    }

    /// Determine the verdict of a finished run.
    ///
    /// An empty run passes. A cancelled run is judged on what finished.
    #[must_use]
    pub fn verdict(&self, report: &RunReport) -> Verdict {
        let failing: Vec<OutcomeKind> = report
            .operations
            .iter()
            .filter(|op| self.fails(&op.terminal))
            .map(|op| op.kind())
            .collect();

        if failing.is_empty() {
            let reason = if report.is_empty() {
                "No operations were run".to_string()
            } else {
                format!("All {} operations passed", report.operations.len())
            };
            return Verdict {
                status: VerdictStatus::Pass,
                exit_code: 0,
                reason,
            };
        }

        let mut parts = Vec::new();
        for kind in [
            OutcomeKind::CheckFailed,
            OutcomeKind::Errored,
            OutcomeKind::Unsatisfiable,
            OutcomeKind::Flaky,
        ] {
            let count = failing.iter().filter(|k| **k == kind).count();
            if count > 0 {
                parts.push(format!("{count} {kind}"));
            }
        }

        Verdict {
            status: VerdictStatus::Fail,
            exit_code: 1,
            reason: parts.join(", "),
        }
    }
}

/// Final verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub exit_code: i32,
    pub reason: String,
}

/// Pass or fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictStatus {
    Pass,
    Fail,
}

impl std::fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}
