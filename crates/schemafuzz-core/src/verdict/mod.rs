//! Verdict module - pass/fail policy over a run report

mod policy;

pub use policy::{Verdict, VerdictPolicy, VerdictStatus};
