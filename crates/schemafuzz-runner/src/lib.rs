//! schemafuzz-runner: case generation, shrinking and execution
//!
//! Operations come from [`loader`], cases from [`generator`], responses from a
//! [`Transport`] and classifications from [`checks`]. [`Runner`] schedules
//! operations over a worker pool and streams events into a report.

pub mod checks;
pub mod engine;
pub mod generator;
pub mod loader;
pub mod run;
pub mod shrink;
pub mod strategy;
pub mod transport;

pub use checks::{CheckSet, UnknownCheck};
pub use engine::{Engine, EngineSettings, OperationRun, RegenerateError};
pub use generator::CaseGenerator;
pub use loader::{LoadError, OperationFilter, SchemaError};
pub use run::{CancelToken, RunSettings, Runner, operation_seed};
pub use strategy::{GenerationError, Strategy, UnsatisfiableSchema};
pub use transport::{HttpTransport, Transport, TransportError};
