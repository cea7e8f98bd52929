//! schemafuzz-core: Core types, aggregation and verdict logic for API fuzzing
//!
//! This crate provides the parameter schema model, generated cases, execution
//! outcomes, the single-writer run aggregator and the pass/fail policy.

pub mod case;
pub mod config;
pub mod outcome;
pub mod report;
pub mod repro;
pub mod schema;
pub mod verdict;

pub use case::{Case, RequestSnapshot};
pub use config::{Config, ConfigError, FilterConfig, Phase};
pub use outcome::{
    CheckFailure, ErrorCause, ErrorKind, FailureSignature, Outcome, OutcomeKind, Response,
    ResponseSummary,
};
pub use report::{
    AggregateError, Aggregator, CheckResult, CheckStats, OperationReport, OperationStats,
    RunEvent, RunReport, Summary,
};
pub use repro::to_http_file;
pub use schema::{Operation, Parameter, ParameterLocation, ParameterSchema};
pub use verdict::{Verdict, VerdictPolicy, VerdictStatus};
