//! HTTP file generator - renders reproducible cases in .http format

use crate::case::RequestSnapshot;
use crate::outcome::Outcome;
use crate::report::RunReport;

/// Generate .http file content for every failing, errored or flaky operation
/// that carries a case.
#[must_use]
pub fn to_http_file(report: &RunReport) -> String {
    let entries: Vec<(&str, &Outcome)> = report
        .operations
        .iter()
        .filter(|op| op.terminal.case().is_some())
        .map(|op| (op.operation.as_str(), &op.terminal))
        .collect();

    let mut lines = Vec::new();
    lines.push(format!(
        "# Reproduction cases ({} operations, seed {})",
        entries.len(),
        report.seed
    ));
    lines.push(String::new());

    for (idx, (operation, terminal)) in entries.iter().enumerate() {
        let Some(case) = terminal.case() else {
            continue;
        };
        lines.push(format!("### [{idx}] {operation} - {}", terminal.kind()));
        lines.push(format!("# {}", terminal.describe()));
        if let Some(seed) = case.seed {
            lines.push(format!("# Case seed: {seed}"));
        }
        lines.push(request_to_http(&case.to_request(), None));
        lines.push(String::new());
    }

    lines.join("\n")
}

/// Generate a single request as .http format
#[must_use]
pub fn request_to_http(request: &RequestSnapshot, comment: Option<&str>) -> String {
    let mut lines = Vec::new();

    if let Some(c) = comment {
        lines.push(format!("### {c}"));
    }

    lines.push(format!("{} {}", request.method, request.url));

    for (key, value) in &request.headers {
        if !matches!(key.to_lowercase().as_str(), "host" | "content-length") {
            lines.push(format!("{key}: {value}"));
        }
    }

    if let Some(body) = &request.body {
        if !request
            .headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case("content-type"))
        {
            lines.push("Content-Type: application/json".to_string());
        }
        lines.push(String::new());
        lines.push(body.clone());
    }

    lines.join("\n")
}
