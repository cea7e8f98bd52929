//! Greedy minimization of a failing case

use schemafuzz_core::case::Case;
use schemafuzz_core::outcome::Outcome;
use tracing::debug;

use crate::generator::CaseGenerator;

/// Minimized case with the outcome it produced.
#[derive(Debug, Clone)]
pub struct Shrunk {
    pub case: Case,
    pub outcome: Outcome,
    /// Candidates executed
    pub attempts: u32,
    /// Candidates accepted
    pub steps: u32,
}

/// Local search over one-step simplifications. A candidate is accepted only
/// when it fails with the same [`FailureSignature`] as the original; the
/// search restarts from every accepted candidate and stops when no candidate
/// is accepted or `budget` executions were spent.
///
/// [`FailureSignature`]: schemafuzz_core::outcome::FailureSignature
pub struct Shrinker<'a> {
    generator: &'a CaseGenerator,
    budget: u32,
}

impl<'a> Shrinker<'a> {
    #[must_use]
    pub const fn new(generator: &'a CaseGenerator, budget: u32) -> Self {
        Self { generator, budget }
    }

    /// Minimize `case`, which produced the failing `outcome`. `execute` runs
    /// one candidate and classifies it.
    pub fn minimize<F>(&self, case: Case, outcome: Outcome, mut execute: F) -> Shrunk
    where
        F: FnMut(&Case) -> Outcome,
    {
        let mut best = Shrunk {
            case,
            outcome,
            attempts: 0,
            steps: 0,
        };
        let Some(signature) = best.outcome.signature() else {
            return best;
        };

        'search: loop {
            for candidate in self.generator.shrink(&best.case) {
                if best.attempts >= self.budget {
                    debug!(budget = self.budget, "shrink budget exhausted");
                    break 'search;
                }
                if candidate.same_input(&best.case) || !self.generator.accepts(&candidate) {
                    continue;
                }
                best.attempts += 1;
                let outcome = execute(&candidate);
                if outcome.signature().as_ref() == Some(&signature) {
                    best.steps += 1;
                    debug!(
                        operation = %candidate.operation,
                        step = best.steps,
                        attempts = best.attempts,
                        "shrink step accepted"
                    );
                    best.case = candidate;
                    best.outcome = outcome;
                    continue 'search;
                }
            }
            break;
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use schemafuzz_core::outcome::{CheckFailure, ErrorCause, ErrorKind, OutcomeKind, Response};
    use schemafuzz_core::schema::{Operation, Parameter, ParameterLocation, ParameterSchema};
    use serde_json::{Value, json};

    use super::*;

    fn generator() -> CaseGenerator {
        let operation = Operation::new("GET", "/items", "http://localhost")
            .with_parameter(Parameter::new(
                "limit",
                ParameterLocation::Query,
                true,
                ParameterSchema::integer_range(0, 1000),
            ))
            .with_parameter(Parameter::new(
                "q",
                ParameterLocation::Query,
                false,
                ParameterSchema::string(),
            ));
        CaseGenerator::new(&operation, &BTreeMap::new(), 0.0).unwrap()
    }

    fn start(limit: i64) -> Case {
        let mut case = Case::new("GET", "/items", "http://localhost");
        case.query.insert("limit".into(), json!(limit));
        case.query.insert("q".into(), json!("needle"));
        case
    }

    fn check_failed(case: &Case) -> Outcome {
        Outcome::CheckFailed {
            failure: CheckFailure::new("not_a_server_error", "boom"),
            case: case.clone(),
            response: Response::new(500, Duration::ZERO).summary(),
        }
    }

    fn limit(case: &Case) -> i64 {
        case.query.get("limit").and_then(Value::as_i64).unwrap_or_default()
    }

    #[test]
    fn integer_over_ten_shrinks_to_eleven() {
        let generator = generator();
        let case = start(837);
        let first = check_failed(&case);
        let shrunk = Shrinker::new(&generator, 200).minimize(case, first, |c| {
            if limit(c) > 10 { check_failed(c) } else { Outcome::Passed }
        });
        assert_eq!(limit(&shrunk.case), 11);
        assert!(!shrunk.case.query.contains_key("q"));
        assert!(shrunk.steps > 0 && shrunk.attempts <= 200);
        assert_eq!(shrunk.outcome.kind(), OutcomeKind::CheckFailed);
    }

    #[test]
    fn other_failure_kinds_are_rejected() {
        let generator = generator();
        let case = start(837);
        let first = check_failed(&case);
        // Small values fail differently; the shrinker must not cross over
        let shrunk = Shrinker::new(&generator, 200).minimize(case, first, |c| {
            if limit(c) > 10 {
                check_failed(c)
            } else {
                Outcome::Errored {
                    cause: ErrorCause::new(ErrorKind::Timeout, "slow"),
                    case: Some(c.clone()),
                }
            }
        });
        assert_eq!(limit(&shrunk.case), 11);
        assert!(matches!(shrunk.outcome, Outcome::CheckFailed { .. }));
    }

    #[test]
    fn budget_bounds_executions() {
        let generator = generator();
        let case = start(837);
        let first = check_failed(&case);
        let mut calls = 0;
        let shrunk = Shrinker::new(&generator, 3).minimize(case, first, |c| {
            calls += 1;
            check_failed(c)
        });
        assert_eq!(calls, 3);
        assert_eq!(shrunk.attempts, 3);
    }

    #[test]
    fn passing_outcome_is_returned_untouched() {
        let generator = generator();
        let shrunk = Shrinker::new(&generator, 200).minimize(start(5), Outcome::Passed, |_| {
            unreachable!("nothing to minimize")
        });
        assert_eq!(shrunk.attempts, 0);
        assert_eq!(limit(&shrunk.case), 5);
    }
}
