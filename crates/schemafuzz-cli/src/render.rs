//! Terminal rendering of run progress and the final report

use std::fmt::Write as _;

use schemafuzz_core::outcome::{Outcome, OutcomeKind};
use schemafuzz_core::report::{OperationReport, RunEvent, RunReport, Summary};
use schemafuzz_core::repro::request_to_http;
use schemafuzz_core::verdict::Verdict;

const RULE_WIDTH: usize = 72;

/// One progress line per finished operation: `GET /api/x .`
pub struct Progress {
    labels: Vec<String>,
}

impl Progress {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn line(&self, event: &RunEvent) -> Option<String> {
        let RunEvent::OperationFinished {
            index, terminal, ..
        } = event
        else {
            return None;
        };
        let label = self.labels.get(*index)?;
        Some(format!("{label} {}", symbol(terminal.kind())))
    }
}

const fn symbol(kind: OutcomeKind) -> char {
    match kind {
        OutcomeKind::Passed => '.',
        OutcomeKind::CheckFailed => 'F',
        OutcomeKind::Errored | OutcomeKind::Unsatisfiable | OutcomeKind::Flaky => 'E',
    }
}

fn rule(title: &str, fill: char) -> String {
    let title = format!(" {title} ");
    let side = RULE_WIDTH.saturating_sub(title.len()) / 2;
    let pad = fill.to_string().repeat(side);
    format!("{pad}{title}{pad}")
}

fn entry_header(operation: &str) -> String {
    rule(operation, '_')
}

/// Failure details for one operation, including how to reproduce it.
fn describe_operation(out: &mut String, op: &OperationReport) {
    let _ = writeln!(out, "{}", entry_header(&op.operation));
    let _ = writeln!(out, "{}", op.terminal.describe());

    match &op.terminal {
        Outcome::CheckFailed { failure, response, .. } => {
            if failure.failing_checks.len() > 1 {
                let _ = writeln!(out, "Also failed: {}", failure.failing_checks[1..].join(", "));
            }
            if let Some(body) = &response.body {
                let _ = writeln!(out, "Response body: {body}");
            }
        }
        Outcome::Flaky { first, second, .. } => {
            let _ = writeln!(out, "First run: {}", first.describe());
            let _ = writeln!(out, "Replay: {}", second.describe());
        }
        Outcome::Unsatisfiable { valid_iterations, .. } if *valid_iterations > 0 => {
            let _ = writeln!(out, "Valid cases before giving up: {valid_iterations}");
        }
        _ => {}
    }

    if let Some(case) = op.terminal.case() {
        let _ = writeln!(out, "\nRun this request to reproduce:\n");
        let _ = writeln!(out, "{}", request_to_http(&case.to_request(), None));
        if let Some(seed) = case.seed {
            let _ = writeln!(out, "\nCase seed: {seed}");
        }
    }
    if op.stats.shrink_steps > 0 {
        let _ = writeln!(
            out,
            "Minimized in {} steps ({} attempts)",
            op.stats.shrink_steps, op.stats.shrink_attempts
        );
    }
    out.push('\n');
}

/// `1 passed, 1 failed` with zero counts left out.
fn summary_counts(summary: &Summary, not_run: usize) -> String {
    let counts = [
        (summary.passed, "passed"),
        (summary.failed, "failed"),
        (summary.errored, "errored"),
        (summary.unsatisfiable, "unsatisfiable"),
        (summary.flaky, "flaky"),
        (not_run as u64, "not run"),
    ];
    counts
        .iter()
        .filter(|(count, _)| *count > 0)
        .map(|(count, name)| format!("{count} {name}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Full terminal report: errors, failures, the checks table and the
/// closing summary line.
pub fn render_report(report: &RunReport, verdict: &Verdict) -> String {
    let mut out = String::new();

    // Errors, unsatisfiable operations and flaky ones, each listed once
    let errors: Vec<&OperationReport> = report.errors().chain(report.flaky()).collect();
    if !errors.is_empty() {
        let _ = writeln!(out, "{}\n", rule("ERRORS", '='));
        for op in errors {
            describe_operation(&mut out, op);
        }
    }

    let failures: Vec<&OperationReport> = report.failures().collect();
    if !failures.is_empty() {
        let _ = writeln!(out, "{}\n", rule("FAILURES", '='));
        for op in failures {
            describe_operation(&mut out, op);
        }
    }

    if !report.checks.is_empty() {
        let _ = writeln!(out, "{}\n", rule("CHECKS", '='));
        for check in &report.checks {
            let status = if check.is_success() { "SUCCESS" } else { "FAILED" };
            let ratio = format!("{} / {} passed", check.passed, check.total);
            let _ = writeln!(out, "    {:<32}{ratio:<20}{status}", check.name);
        }
        out.push('\n');
    } else if !report.is_empty() {
        out.push_str("No checks were performed.\n\n");
    }

    if !report.not_run.is_empty() {
        let _ = writeln!(out, "Not run (cancelled): {}\n", report.not_run.join(", "));
    }

    let _ = writeln!(out, "{}: {}", verdict.status, verdict.reason);
    let _ = writeln!(out, "Seed: {}", report.seed);

    if report.is_empty() && report.not_run.is_empty() {
        out.push_str(&rule("Empty test suite", '='));
    } else {
        #[allow(clippy::cast_precision_loss)]
        let seconds = report.duration_ms as f64 / 1000.0;
        let counts = summary_counts(&report.summary, report.not_run.len());
        out.push_str(&rule(&format!("{counts} in {seconds:.2}s"), '='));
    }
    out.push('\n');
    out
}
