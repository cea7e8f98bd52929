//! Run scheduling: a bounded worker pool over operations
//!
//! Workers pull the next unscheduled operation, own its engine for the whole
//! operation and stream [`RunEvent`]s to a single collector that owns the
//! [`Aggregator`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use schemafuzz_core::config::Config;
use schemafuzz_core::report::{AggregateError, Aggregator, RunEvent, RunReport};
use schemafuzz_core::schema::Operation;
use tracing::{debug, info, warn};

use crate::checks::{CheckSet, UnknownCheck};
use crate::engine::{Engine, EngineSettings};
use crate::transport::Transport;

/// Stops scheduling new operations once cancelled or past its deadline.
/// Clones share the cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Same flag, additionally expiring at `deadline`.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    /// Global seed every operation stream derives from
    pub seed: u64,
    pub workers: usize,
    /// Wall-clock budget for the whole run
    pub run_budget: Option<Duration>,
    pub engine: EngineSettings,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            workers: 4,
            run_budget: None,
            engine: EngineSettings::default(),
        }
    }
}

impl RunSettings {
    /// Settings from a validated config. Without a configured seed one is
    /// drawn at random; `derandomize` pins it to 0.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let seed = if config.derandomize {
            0
        } else {
            config.seed.unwrap_or_else(rand::random)
        };
        Self {
            seed,
            workers: config.workers,
            run_budget: config.run_budget_secs.map(Duration::from_secs_f64),
            engine: EngineSettings::from_config(config),
        }
    }
}

/// 64-bit FNV-1a.
fn fnv1a(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Seed of one operation's random stream. Independent of scheduling order
/// and worker count.
#[must_use]
pub fn operation_seed(global_seed: u64, label: &str) -> u64 {
    splitmix64(global_seed ^ fnv1a(label))
}

pub struct Runner {
    settings: RunSettings,
    checks: CheckSet,
    cancel: CancelToken,
}

impl Runner {
    #[must_use]
    pub fn new(settings: RunSettings, checks: CheckSet) -> Self {
        Self {
            settings,
            checks,
            cancel: CancelToken::new(),
        }
    }

    /// Runner with the checks named in `config` and its deadline.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownCheck`] for a check name that is not built in.
    pub fn from_config(config: &Config) -> Result<Self, UnknownCheck> {
        let checks = CheckSet::from_names(&config.checks)?
            .with_deadline(Some(Duration::from_millis(config.deadline_ms)));
        Ok(Self::new(RunSettings::from_config(config), checks))
    }

    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle that aborts the run from another thread.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.settings.seed
    }

    #[must_use]
    pub const fn settings(&self) -> &RunSettings {
        &self.settings
    }

    #[must_use]
    pub const fn checks(&self) -> &CheckSet {
        &self.checks
    }

    /// Engine for one operation, for replaying cases outside a run.
    #[must_use]
    pub fn engine<'a>(&'a self, operation: &'a Operation, transport: &'a dyn Transport) -> Engine<'a> {
        Engine::new(operation, transport, &self.checks, &self.settings.engine)
    }

    /// Run every operation. `on_event` sees each event on the calling thread,
    /// in the order the collector receives them.
    ///
    /// # Errors
    ///
    /// Returns the first [`AggregateError`]; the run itself still completes.
    pub fn run(
        &self,
        operations: &[Operation],
        transport: &dyn Transport,
        mut on_event: impl FnMut(&RunEvent),
    ) -> Result<RunReport, AggregateError> {
        let started = Instant::now();
        let cancel = match self.settings.run_budget {
            Some(budget) => self.cancel.with_deadline(started + budget),
            None => self.cancel.clone(),
        };
        let workers = self.settings.workers.clamp(1, operations.len().max(1));
        info!(
            operations = operations.len(),
            workers,
            seed = self.settings.seed,
            "run started"
        );

        let mut aggregator = Aggregator::new(self.settings.seed, operations.iter().map(Operation::label));
        let mut first_error = None;
        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<RunEvent>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let (next, cancel) = (&next, &cancel);
                scope.spawn(move || {
                    loop {
                        if cancel.is_cancelled() {
                            debug!("run cancelled, worker stops scheduling");
                            break;
                        }
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(operation) = operations.get(index) else {
                            break;
                        };
                        if !self.run_operation(index, operation, transport, cancel, &tx) {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            for event in rx {
                on_event(&event);
                if let Err(e) = aggregator.record(event) {
                    warn!("{e}");
                    first_error.get_or_insert(e);
                }
            }
        });

        if let Some(e) = first_error {
            return Err(e);
        }
        let cancelled = (0..operations.len()).any(|index| !aggregator.is_finished(index));
        let report = aggregator.finish(started.elapsed(), cancelled);
        info!(
            passed = report.summary.passed,
            failed = report.summary.failed,
            errored = report.summary.errored,
            unsatisfiable = report.summary.unsatisfiable,
            flaky = report.summary.flaky,
            not_run = report.not_run.len(),
            "run finished"
        );
        Ok(report)
    }

    /// Drive one operation. `false` once the collector is gone.
    fn run_operation(
        &self,
        index: usize,
        operation: &Operation,
        transport: &dyn Transport,
        cancel: &CancelToken,
        tx: &mpsc::Sender<RunEvent>,
    ) -> bool {
        let label = operation.label();
        let started = RunEvent::OperationStarted {
            index,
            operation: label.clone(),
        };
        if tx.send(started).is_err() {
            return false;
        }
        let engine = self.engine(operation, transport);
        let result = engine.run(
            operation_seed(self.settings.seed, &label),
            cancel,
            &mut |outcome, checks| {
                // A closed channel surfaces on the terminal send below
                let _ = tx.send(RunEvent::IterationFinished {
                    index,
                    outcome,
                    checks,
                });
            },
        );
        tx.send(RunEvent::OperationFinished {
            index,
            terminal: result.terminal,
            stats: result.stats,
        })
        .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_seeds_depend_on_label_and_global_seed() {
        let a = operation_seed(0, "GET /a");
        assert_eq!(a, operation_seed(0, "GET /a"));
        assert_ne!(a, operation_seed(0, "GET /b"));
        assert_ne!(a, operation_seed(1, "GET /a"));
    }

    #[test]
    fn fnv1a_reference_values() {
        assert_eq!(fnv1a(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a("a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn derandomize_pins_seed() {
        let config = Config {
            seed: Some(99),
            derandomize: true,
            ..Config::default()
        };
        assert_eq!(RunSettings::from_config(&config).seed, 0);
        let config = Config {
            seed: Some(99),
            ..Config::default()
        };
        assert_eq!(RunSettings::from_config(&config).seed, 99);
    }

    #[test]
    fn cancel_token_shares_flag() {
        let token = CancelToken::new();
        let child = token.with_deadline(Instant::now() + Duration::from_secs(60));
        assert!(!child.is_cancelled());
        token.cancel();
        assert!(child.is_cancelled());

        let expired = CancelToken::new().with_deadline(Instant::now());
        assert!(expired.is_cancelled());
    }

    #[test]
    fn unknown_check_in_config_is_rejected() {
        let config = Config {
            checks: vec!["nope".into()],
            ..Config::default()
        };
        assert!(Runner::from_config(&config).is_err());
    }
}
