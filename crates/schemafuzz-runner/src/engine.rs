//! Per-operation execution engine
//!
//! One engine drives one operation through its phases:
//!
//! ```text
//! Generating -> Requesting -> Checking -> Passed
//!                                     \-> Failing -> Shrinking -> Reported
//! ```
//!
//! Iterations are strictly sequential. The first failing case is replayed
//! once, minimized and replayed again; a replay that does not reproduce the
//! failure makes the operation flaky.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use schemafuzz_core::case::Case;
use schemafuzz_core::config::{Config, Phase};
use schemafuzz_core::outcome::{ErrorCause, ErrorKind, Outcome};
use schemafuzz_core::report::{CheckResult, OperationStats};
use schemafuzz_core::schema::Operation;
use tracing::{debug, info};

use crate::checks::CheckSet;
use crate::generator::CaseGenerator;
use crate::run::CancelToken;
use crate::shrink::Shrinker;
use crate::strategy::{DEFAULT_BOUNDARY_BIAS, GenerationError, UnsatisfiableSchema};
use crate::transport::Transport;

/// Knobs shared by every operation of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Generated cases per operation; also the generation retry budget
    pub max_examples: u32,
    /// Wall-clock budget per operation
    pub time_budget: Option<Duration>,
    pub phases: Vec<Phase>,
    pub max_shrinks: u32,
    pub boundary_bias: f64,
    /// Sent with every request, never generated or shrunk
    pub static_headers: BTreeMap<String, String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_examples: 100,
            time_budget: None,
            phases: Phase::ALL.to_vec(),
            max_shrinks: 200,
            boundary_bias: DEFAULT_BOUNDARY_BIAS,
            static_headers: BTreeMap::new(),
        }
    }
}

impl EngineSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_examples: config.max_examples,
            time_budget: config.time_budget_secs.map(Duration::from_secs_f64),
            phases: config.phases.clone(),
            max_shrinks: config.max_shrinks,
            boundary_bias: config.boundary_bias,
            static_headers: config.headers.clone(),
        }
    }

    #[must_use]
    pub fn has_phase(&self, phase: Phase) -> bool {
        self.phases.contains(&phase)
    }
}

/// Terminal classification of one operation plus its counters.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRun {
    pub terminal: Outcome,
    pub stats: OperationStats,
}

/// Why [`Engine::regenerate`] could not rebuild a case.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegenerateError {
    #[error(transparent)]
    Unsatisfiable(#[from] UnsatisfiableSchema),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("Operation schema is invalid: {0}")]
    InvalidSchema(String),
}

pub struct Engine<'a> {
    operation: &'a Operation,
    generator: Result<CaseGenerator, UnsatisfiableSchema>,
    transport: &'a dyn Transport,
    checks: &'a CheckSet,
    settings: &'a EngineSettings,
}

impl<'a> Engine<'a> {
    #[must_use]
    pub fn new(
        operation: &'a Operation,
        transport: &'a dyn Transport,
        checks: &'a CheckSet,
        settings: &'a EngineSettings,
    ) -> Self {
        let generator =
            CaseGenerator::new(operation, &settings.static_headers, settings.boundary_bias);
        Self {
            operation,
            generator,
            transport,
            checks,
            settings,
        }
    }

    /// Run every enabled phase. `observer` sees each explicit and generated
    /// case's outcome with its per-check results; shrink candidates and
    /// replays are not reported.
    pub fn run(
        &self,
        seed: u64,
        cancel: &CancelToken,
        observer: &mut dyn FnMut(Outcome, Vec<CheckResult>),
    ) -> OperationRun {
        let label = self.operation.label();
        info!(operation = %label, seed, "operation started");
        let mut stats = OperationStats {
            seed,
            ..OperationStats::default()
        };
        let terminal = self.drive(seed, cancel, observer, &mut stats);
        info!(
            operation = %label,
            outcome = %terminal.kind(),
            iterations = stats.iterations,
            shrink_steps = stats.shrink_steps,
            "operation finished"
        );
        OperationRun { terminal, stats }
    }

    fn drive(
        &self,
        seed: u64,
        cancel: &CancelToken,
        observer: &mut dyn FnMut(Outcome, Vec<CheckResult>),
        stats: &mut OperationStats,
    ) -> Outcome {
        if let Some(reason) = &self.operation.schema_error {
            return Outcome::Errored {
                cause: ErrorCause::new(ErrorKind::InvalidSchema, reason.clone()),
                case: None,
            };
        }
        let generator = match &self.generator {
            Ok(generator) => generator,
            Err(e) => {
                return Outcome::Unsatisfiable {
                    reason: e.reason.clone(),
                    valid_iterations: 0,
                };
            }
        };

        let started = Instant::now();
        let mut rng = SmallRng::seed_from_u64(seed);

        if self.settings.has_phase(Phase::Explicit) {
            match generator.explicit_case(&mut rng) {
                Some(Ok(case)) => {
                    if let Some(terminal) = self.iterate(generator, case, stats, observer) {
                        return terminal;
                    }
                }
                Some(Err(e)) => debug!(operation = %self.operation.label(), "explicit case skipped: {e}"),
                None => {}
            }
        }

        if self.settings.has_phase(Phase::Generate) {
            let mut valid = 0;
            let mut generation_failures = 0;
            while valid < self.settings.max_examples {
                if stats.iterations > 0 && self.should_stop(started, cancel) {
                    break;
                }
                let iteration_seed: u64 = rng.r#gen();
                let mut iteration_rng = SmallRng::seed_from_u64(iteration_seed);
                match generator.generate(&mut iteration_rng) {
                    Ok(mut case) => {
                        valid += 1;
                        case.seed = Some(iteration_seed);
                        if let Some(terminal) = self.iterate(generator, case, stats, observer) {
                            return terminal;
                        }
                    }
                    Err(e) => {
                        generation_failures += 1;
                        if generation_failures >= self.settings.max_examples {
                            return Outcome::Unsatisfiable {
                                reason: e.to_string(),
                                valid_iterations: valid,
                            };
                        }
                    }
                }
            }
        }

        Outcome::Passed
    }

    fn should_stop(&self, started: Instant, cancel: &CancelToken) -> bool {
        cancel.is_cancelled()
            || self
                .settings
                .time_budget
                .is_some_and(|budget| started.elapsed() >= budget)
    }

    /// Execute one case and report it. A failure ends the operation and the
    /// returned outcome is terminal.
    fn iterate(
        &self,
        generator: &CaseGenerator,
        case: Case,
        stats: &mut OperationStats,
        observer: &mut dyn FnMut(Outcome, Vec<CheckResult>),
    ) -> Option<Outcome> {
        stats.iterations += 1;
        let (outcome, checks) = self.execute(case);
        observer(outcome.clone(), checks);
        if outcome.is_passed() {
            return None;
        }
        Some(self.investigate(generator, outcome, stats))
    }

    /// Confirm, minimize and re-confirm a failure.
    fn investigate(
        &self,
        generator: &CaseGenerator,
        first: Outcome,
        stats: &mut OperationStats,
    ) -> Outcome {
        let (Some(signature), Some(case)) = (first.signature(), first.case().cloned()) else {
            return first;
        };

        debug!(operation = %case.operation, "replaying first failure");
        let second = self.replay(&case);
        if second.signature().as_ref() != Some(&signature) {
            return flaky(case, first, second);
        }
        if !self.settings.has_phase(Phase::Shrink) {
            return first;
        }

        let shrunk = Shrinker::new(generator, self.settings.max_shrinks)
            .minimize(case, first, |candidate| self.replay(candidate));
        stats.shrink_attempts = shrunk.attempts;
        stats.shrink_steps = shrunk.steps;

        debug!(operation = %shrunk.case.operation, steps = shrunk.steps, "replaying minimized case");
        let confirmation = self.replay(&shrunk.case);
        if confirmation.signature().as_ref() != Some(&signature) {
            return flaky(shrunk.case, shrunk.outcome, confirmation);
        }
        shrunk.outcome
    }

    fn execute(&self, case: Case) -> (Outcome, Vec<CheckResult>) {
        match self.transport.execute(&case) {
            Ok(response) => {
                let evaluation = self.checks.evaluate(&case, &response);
                let outcome = match evaluation.failure {
                    None => Outcome::Passed,
                    Some(failure) => Outcome::CheckFailed {
                        failure,
                        case,
                        response: response.summary(),
                    },
                };
                (outcome, evaluation.results)
            }
            Err(e) => (
                Outcome::Errored {
                    cause: e.to_cause(),
                    case: Some(case),
                },
                Vec::new(),
            ),
        }
    }

    /// Execute `case` once more and classify it.
    #[must_use]
    pub fn replay(&self, case: &Case) -> Outcome {
        self.execute(case.clone()).0
    }

    /// Rebuild the case drawn from an iteration seed.
    ///
    /// # Errors
    ///
    /// Fails when the operation cannot generate cases at all, or when the
    /// seed leads to a generation failure.
    pub fn regenerate(&self, seed: u64) -> Result<Case, RegenerateError> {
        if let Some(reason) = &self.operation.schema_error {
            return Err(RegenerateError::InvalidSchema(reason.clone()));
        }
        let generator = self.generator.as_ref().map_err(UnsatisfiableSchema::clone)?;
        let mut case = generator.generate(&mut SmallRng::seed_from_u64(seed))?;
        case.seed = Some(seed);
        Ok(case)
    }
}

fn flaky(case: Case, first: Outcome, second: Outcome) -> Outcome {
    debug!(
        operation = %case.operation,
        first = %first.kind(),
        second = %second.kind(),
        "failure did not reproduce"
    );
    Outcome::Flaky {
        case,
        first: Box::new(first),
        second: Box::new(second),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use schemafuzz_core::outcome::{OutcomeKind, Response};
    use schemafuzz_core::schema::{Parameter, ParameterLocation, ParameterSchema};
    use serde_json::Value;

    use super::*;
    use crate::transport::TransportError;

    /// Answers with a fixed function of the case.
    struct Scripted<F>(F);

    impl<F> Transport for Scripted<F>
    where
        F: Fn(&Case) -> Result<Response, TransportError> + Send + Sync,
    {
        fn execute(&self, case: &Case) -> Result<Response, TransportError> {
            (self.0)(case)
        }
    }

    fn ok(status: u16) -> Result<Response, TransportError> {
        Ok(Response::new(status, Duration::from_millis(1)))
    }

    fn operation() -> Operation {
        Operation::new("GET", "/items/{id}", "http://localhost").with_parameter(Parameter::new(
            "id",
            ParameterLocation::Path,
            true,
            ParameterSchema::integer_range(0, 1000),
        ))
    }

    fn id(case: &Case) -> i64 {
        case.path_parameters
            .get("id")
            .and_then(Value::as_i64)
            .unwrap_or_default()
    }

    fn run(operation: &Operation, transport: &dyn Transport, settings: &EngineSettings) -> (OperationRun, Vec<Outcome>) {
        let checks = CheckSet::standard();
        let engine = Engine::new(operation, transport, &checks, settings);
        let mut seen = Vec::new();
        let result = engine.run(7, &CancelToken::new(), &mut |outcome, _| seen.push(outcome));
        (result, seen)
    }

    #[test]
    fn passing_operation_runs_every_example() {
        let transport = Scripted(|_: &Case| ok(200));
        let settings = EngineSettings {
            max_examples: 25,
            ..EngineSettings::default()
        };
        let (result, seen) = run(&operation(), &transport, &settings);
        assert_eq!(result.terminal, Outcome::Passed);
        assert_eq!(result.stats.iterations, 25);
        assert_eq!(seen.len(), 25);
        assert!(seen.iter().all(Outcome::is_passed));
    }

    #[test]
    fn failure_is_minimized() {
        let transport = Scripted(|case: &Case| if id(case) > 10 { ok(500) } else { ok(200) });
        let (result, seen) = run(&operation(), &transport, &EngineSettings::default());
        let Outcome::CheckFailed { case, failure, .. } = &result.terminal else {
            panic!("expected a check failure, got {:?}", result.terminal);
        };
        assert_eq!(id(case), 11);
        assert_eq!(failure.check, "not_a_server_error");
        assert!(result.stats.shrink_steps > 0);
        assert_eq!(seen.last().map(Outcome::kind), Some(OutcomeKind::CheckFailed));
    }

    #[test]
    fn shrink_phase_can_be_disabled() {
        let transport = Scripted(|_: &Case| ok(500));
        let settings = EngineSettings {
            phases: vec![Phase::Generate],
            ..EngineSettings::default()
        };
        let (result, _) = run(&operation(), &transport, &settings);
        assert_eq!(result.terminal.kind(), OutcomeKind::CheckFailed);
        assert_eq!(result.stats.shrink_attempts, 0);
        assert_eq!(result.stats.iterations, 1);
    }

    #[test]
    fn failure_on_odd_calls_is_flaky() {
        let calls = AtomicU32::new(0);
        let transport = Scripted(move |_: &Case| {
            if calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 { ok(500) } else { ok(200) }
        });
        let (result, _) = run(&operation(), &transport, &EngineSettings::default());
        let Outcome::Flaky { first, second, .. } = &result.terminal else {
            panic!("expected flaky, got {:?}", result.terminal);
        };
        assert_eq!(first.kind(), OutcomeKind::CheckFailed);
        assert_eq!(second.kind(), OutcomeKind::Passed);
    }

    #[test]
    fn transport_errors_are_minimized_too() {
        let transport = Scripted(|case: &Case| {
            if id(case) > 10 {
                Err(TransportError::Connect("refused".into()))
            } else {
                ok(200)
            }
        });
        let (result, _) = run(&operation(), &transport, &EngineSettings::default());
        let Outcome::Errored { cause, case } = &result.terminal else {
            panic!("expected an error, got {:?}", result.terminal);
        };
        assert_eq!(cause.kind, ErrorKind::Connection);
        assert_eq!(case.as_ref().map(id), Some(11));
    }

    #[test]
    fn invalid_schema_sends_nothing() {
        let mut operation = operation();
        operation.schema_error = Some("unknown type \"int\"".into());
        let transport = Scripted(|_: &Case| -> Result<Response, TransportError> {
            panic!("no request expected")
        });
        let (result, seen) = run(&operation, &transport, &EngineSettings::default());
        let Outcome::Errored { cause, case: None } = &result.terminal else {
            panic!("expected an invalid schema error, got {:?}", result.terminal);
        };
        assert_eq!(cause.kind, ErrorKind::InvalidSchema);
        assert!(seen.is_empty());
    }

    #[test]
    fn unsatisfiable_schema_sends_nothing() {
        let operation = Operation::new("GET", "/x", "http://localhost").with_parameter(
            Parameter::new(
                "n",
                ParameterLocation::Query,
                true,
                ParameterSchema::integer_range(5, 1),
            ),
        );
        let transport = Scripted(|_: &Case| -> Result<Response, TransportError> {
            panic!("no request expected")
        });
        let (result, _) = run(&operation, &transport, &EngineSettings::default());
        assert!(matches!(
            result.terminal,
            Outcome::Unsatisfiable {
                valid_iterations: 0,
                ..
            }
        ));
    }

    #[test]
    fn explicit_example_runs_first() {
        let operation = Operation::new("GET", "/items/{id}", "http://localhost").with_parameter(
            Parameter::new(
                "id",
                ParameterLocation::Path,
                true,
                ParameterSchema::integer_range(0, 1000),
            )
            .with_example(Value::from(42)),
        );
        let first_ids = Mutex::new(Vec::new());
        let transport = Scripted(|case: &Case| {
            if let Ok(mut ids) = first_ids.lock() {
                ids.push(id(case));
            }
            ok(200)
        });
        let settings = EngineSettings {
            max_examples: 3,
            ..EngineSettings::default()
        };
        let (result, _) = run(&operation, &transport, &settings);
        assert_eq!(result.stats.iterations, 4);
        assert_eq!(first_ids.lock().unwrap().first(), Some(&42));
    }

    #[test]
    fn cases_regenerate_from_their_seed() {
        let cases = Mutex::new(Vec::new());
        let transport = Scripted(|case: &Case| {
            if let Ok(mut cases) = cases.lock() {
                cases.push(case.clone());
            }
            ok(200)
        });
        let settings = EngineSettings {
            max_examples: 10,
            ..EngineSettings::default()
        };
        let operation = operation();
        run(&operation, &transport, &settings);

        let checks = CheckSet::standard();
        let engine = Engine::new(&operation, &transport, &checks, &settings);
        for case in cases.lock().unwrap().iter() {
            let seed = case.seed.unwrap();
            assert_eq!(&engine.regenerate(seed).unwrap(), case);
        }
    }
}
