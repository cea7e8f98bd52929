//! Outcome aggregation
//!
//! The [`Aggregator`] is the single writer of run results. Workers never touch
//! it directly: they send [`RunEvent`]s to the collector that owns it, so
//! every write is serialized and every recorded outcome stays untouched.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::outcome::{Outcome, OutcomeKind};
use crate::verdict::{Verdict, VerdictPolicy};

/// Pass/fail of one check on one response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
}

/// Engine-side counters reported with the terminal outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OperationStats {
    /// Seed of the operation's random stream
    pub seed: u64,
    /// Cases executed in the explicit and generate phases
    pub iterations: u32,
    /// Shrink candidates executed
    pub shrink_attempts: u32,
    /// Shrink candidates accepted
    pub shrink_steps: u32,
}

/// Progress event sent from a worker to the collector.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    OperationStarted {
        index: usize,
        operation: String,
    },
    /// One generated case ran through the checks
    IterationFinished {
        index: usize,
        outcome: Outcome,
        checks: Vec<CheckResult>,
    },
    OperationFinished {
        index: usize,
        terminal: Outcome,
        stats: OperationStats,
    },
}

impl RunEvent {
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::OperationStarted { index, .. }
            | Self::IterationFinished { index, .. }
            | Self::OperationFinished { index, .. } => *index,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AggregateError {
    #[error("event for unscheduled operation #{0}")]
    UnknownOperation(usize),
    #[error("{0} already has a terminal outcome")]
    DuplicateTerminal(String),
    #[error("{0} reported an iteration after its terminal outcome")]
    IterationAfterTerminal(String),
}

/// Final record of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OperationReport {
    pub operation: String,
    #[serde(flatten)]
    pub stats: OperationStats,
    /// Iteration outcomes in generation order
    pub outcomes: Vec<Outcome>,
    /// The single classification of this operation
    pub terminal: Outcome,
}

impl OperationReport {
    #[must_use]
    pub const fn kind(&self) -> OutcomeKind {
        self.terminal.kind()
    }
}

/// Operation counts per terminal classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Summary {
    pub passed: u64,
    pub failed: u64,
    pub errored: u64,
    pub unsatisfiable: u64,
    pub flaky: u64,
}

impl Summary {
    fn count(&mut self, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Passed => self.passed += 1,
            OutcomeKind::CheckFailed => self.failed += 1,
            OutcomeKind::Errored => self.errored += 1,
            OutcomeKind::Unsatisfiable => self.unsatisfiable += 1,
            OutcomeKind::Flaky => self.flaky += 1,
        }
    }

    #[must_use]
    pub const fn total(&self) -> u64 {
        self.passed + self.failed + self.errored + self.unsatisfiable + self.flaky
    }
}

/// Per-check evaluation counts across the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CheckStats {
    pub name: String,
    pub total: u64,
    pub passed: u64,
}

impl CheckStats {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.passed == self.total
    }
}

/// Run-level result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunReport {
    /// Global seed the operation streams were derived from
    pub seed: u64,
    /// Finished operations, in scheduling order
    pub operations: Vec<OperationReport>,
    pub summary: Summary,
    pub checks: Vec<CheckStats>,
    /// Operations never finished because the run was cancelled
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_run: Vec<String>,
    #[serde(default)]
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl RunReport {
    /// Operations whose terminal outcome is a check failure.
    pub fn failures(&self) -> impl Iterator<Item = &OperationReport> {
        self.by_kind(&[OutcomeKind::CheckFailed])
    }

    /// Operations that errored or could not be generated.
    pub fn errors(&self) -> impl Iterator<Item = &OperationReport> {
        self.by_kind(&[OutcomeKind::Errored, OutcomeKind::Unsatisfiable])
    }

    /// Operations classified as flaky. Never part of `failures` or `errors`.
    pub fn flaky(&self) -> impl Iterator<Item = &OperationReport> {
        self.by_kind(&[OutcomeKind::Flaky])
    }

    fn by_kind<'a>(
        &'a self,
        kinds: &'a [OutcomeKind],
    ) -> impl Iterator<Item = &'a OperationReport> {
        self.operations
            .iter()
            .filter(move |op| kinds.contains(&op.kind()))
    }

    /// No operation was run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    #[must_use]
    pub fn verdict(&self, policy: &VerdictPolicy) -> Verdict {
        policy.verdict(self)
    }
}

/// JSON Schema of [`RunReport`], for consumers of `--format json` output.
///
/// # Errors
///
/// Returns an error if the schema cannot be serialized.
pub fn generate_schema() -> serde_json::Result<String> {
    let schema = schemars::schema_for!(RunReport);
    serde_json::to_string_pretty(&schema)
}

#[derive(Debug)]
struct Slot {
    operation: String,
    started: bool,
    outcomes: Vec<Outcome>,
    finished: Option<(Outcome, OperationStats)>,
}

/// Collects events into a [`RunReport`].
#[derive(Debug)]
pub struct Aggregator {
    seed: u64,
    slots: Vec<Slot>,
    checks: Vec<CheckStats>,
}

impl Aggregator {
    /// Aggregator for operations scheduled in the given order.
    pub fn new(seed: u64, scheduled: impl IntoIterator<Item = String>) -> Self {
        Self {
            seed,
            slots: scheduled
                .into_iter()
                .map(|operation| Slot {
                    operation,
                    started: false,
                    outcomes: Vec::new(),
                    finished: None,
                })
                .collect(),
            checks: Vec::new(),
        }
    }

    /// Record one event.
    ///
    /// # Errors
    ///
    /// Rejects events for unknown operations, iterations after a terminal
    /// outcome and second terminal outcomes.
    pub fn record(&mut self, event: RunEvent) -> Result<(), AggregateError> {
        let index = event.index();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(AggregateError::UnknownOperation(index))?;

        match event {
            RunEvent::OperationStarted { .. } => {
                slot.started = true;
            }
            RunEvent::IterationFinished {
                outcome, checks, ..
            } => {
                if slot.finished.is_some() {
                    return Err(AggregateError::IterationAfterTerminal(
                        slot.operation.clone(),
                    ));
                }
                slot.started = true;
                slot.outcomes.push(outcome);
                for result in checks {
                    Self::count_check(&mut self.checks, result);
                }
            }
            RunEvent::OperationFinished {
                terminal, stats, ..
            } => {
                if slot.finished.is_some() {
                    return Err(AggregateError::DuplicateTerminal(slot.operation.clone()));
                }
                slot.started = true;
                slot.finished = Some((terminal, stats));
            }
        }
        Ok(())
    }

    fn count_check(checks: &mut Vec<CheckStats>, result: CheckResult) {
        let passed = u64::from(result.passed);
        if let Some(stats) = checks.iter_mut().find(|c| c.name == result.name) {
            stats.total += 1;
            stats.passed += passed;
        } else {
            checks.push(CheckStats {
                name: result.name,
                total: 1,
                passed,
            });
        }
    }

    /// Whether the operation at `index` already has a terminal outcome.
    #[must_use]
    pub fn is_finished(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .is_some_and(|slot| slot.finished.is_some())
    }

    /// Finalize the report. Operations without a terminal outcome are listed
    /// in `not_run`.
    #[must_use]
    pub fn finish(self, duration: Duration, cancelled: bool) -> RunReport {
        let mut summary = Summary::default();
        let mut operations = Vec::new();
        let mut not_run = Vec::new();

        for slot in self.slots {
            match slot.finished {
                Some((terminal, stats)) => {
                    summary.count(terminal.kind());
                    operations.push(OperationReport {
                        operation: slot.operation,
                        stats,
                        outcomes: slot.outcomes,
                        terminal,
                    });
                }
                None => not_run.push(slot.operation),
            }
        }

        RunReport {
            seed: self.seed,
            operations,
            summary,
            checks: self.checks,
            not_run,
            cancelled,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}
