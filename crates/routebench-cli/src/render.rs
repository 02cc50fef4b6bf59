//! Text and JSON rendering of reports.

use chrono::{DateTime, Utc};
use routebench_core::{MetricsRow, Report, VersionReport};
use routebench_runtime::{LlmUsage, SweepOutcome};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Total width of a version box, corners included.
const BOX_WIDTH: usize = 100;

const MAX_ENDPOINT_LABEL: usize = 40;

/// Endpoint labels longer than 40 characters keep their first 37 plus "...".
pub fn truncate_endpoint(label: &str) -> String {
    if label.chars().count() > MAX_ENDPOINT_LABEL {
        let head: String = label.chars().take(MAX_ENDPOINT_LABEL - 3).collect();
        format!("{}...", head)
    } else {
        label.to_string()
    }
}

fn branch(last: bool) -> &'static str {
    if last {
        "└─"
    } else {
        "├─"
    }
}

/// Continuation column under a parent branch.
fn rail(parent_last: bool) -> &'static str {
    if parent_last {
        "   "
    } else {
        "│  "
    }
}

fn box_top(version: &str) -> String {
    let mut line = format!("╔═ PROMPT VERSION {} ", version.to_uppercase());
    let used = line.chars().count();
    for _ in used..BOX_WIDTH.saturating_sub(1).max(used + 3) {
        line.push('═');
    }
    line.push('╗');
    line
}

fn box_bottom() -> String {
    format!("╚{}╝", "═".repeat(BOX_WIDTH - 2))
}

/// The full text report: a header, then one box per prompt version.
pub fn render_text(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== ROUTING CONSISTENCY RESULTS ===");
    if let Some(name) = &report.scenario_name {
        let _ = writeln!(out, "Scenario: {}", name);
    }
    let _ = writeln!(out, "Utterance: '{}'", report.utterance);
    let _ = writeln!(out, "Iterations per configuration: {}", report.iterations_per_config);
    if let Some(expected) = &report.expected_endpoint {
        let _ = writeln!(out, "Expected endpoint: {}", expected);
    }
    let _ = writeln!(out);

    for version in &report.versions {
        render_version(&mut out, version, &report.expected_parameters);
        let _ = writeln!(out);
    }
    out
}

fn render_version(out: &mut String, version: &VersionReport, parameters: &[String]) {
    let _ = writeln!(out, "{}", box_top(&version.prompt_version));
    let rows = &version.rows;
    let last = rows.len().saturating_sub(1);

    let _ = writeln!(out, "║ ENDPOINT MATCHING");
    for (i, row) in rows.iter().enumerate() {
        let _ = writeln!(out, "║ {} {}:", branch(i == last), row.provider);
        render_endpoints(out, row, rail(i == last));
    }
    let _ = writeln!(out, "║");

    let _ = writeln!(out, "║ PARAMETER EXTRACTION VALUES");
    if parameters.is_empty() {
        let _ = writeln!(out, "║ └─ (no expected parameters)");
    }
    let last_param = parameters.len().saturating_sub(1);
    for (p, name) in parameters.iter().enumerate() {
        let _ = writeln!(out, "║ {} {}:", branch(p == last_param), name);
        let indent = rail(p == last_param);
        for (i, row) in rows.iter().enumerate() {
            let value = row
                .parameter(name)
                .map_or_else(|| "N/A".to_string(), |status| status.to_string());
            let _ = writeln!(out, "║ {}{} {}: {}", indent, branch(i == last), row.provider, value);
        }
    }
    let _ = writeln!(out, "║");

    let _ = writeln!(out, "║ PERFORMANCE");
    let _ = writeln!(out, "║ ├─ Response Time (ms):");
    for (i, row) in rows.iter().enumerate() {
        let _ = writeln!(
            out,
            "║ │  {} {}: {}",
            branch(i == last),
            row.provider,
            format_latency(row)
        );
    }
    let _ = writeln!(out, "║ ├─ Parameter Completion:");
    for (i, row) in rows.iter().enumerate() {
        let _ = writeln!(
            out,
            "║ │  {} {}: {}",
            branch(i == last),
            row.provider,
            row.avg_completion_pct
                .map_or_else(|| "N/A".to_string(), |pct| format!("{}%", pct))
        );
    }
    let _ = writeln!(out, "║ └─ Token Usage (in/out):");
    for (i, row) in rows.iter().enumerate() {
        let _ = writeln!(
            out,
            "║    {} {}: {}",
            branch(i == last),
            row.provider,
            format_tokens(row)
        );
    }
    let _ = writeln!(out, "{}", box_bottom());
}

fn render_endpoints(out: &mut String, row: &MetricsRow, indent: &str) {
    if !row.has_data() {
        let _ = writeln!(out, "║ {}N/A", indent);
        return;
    }
    if row.endpoints.is_empty() {
        let _ = writeln!(out, "║ {}No endpoints matched", indent);
    }
    for share in &row.endpoints {
        let label = share
            .endpoint
            .as_deref()
            .map_or_else(|| "(no match)".to_string(), truncate_endpoint);
        let _ = writeln!(
            out,
            "║ {}{}: {} times ({}%)",
            indent, label, share.count, share.pct
        );
    }
    if let Some(accuracy) = row.endpoint_accuracy_pct {
        let _ = writeln!(out, "║ {}matches expected: {}%", indent, accuracy);
    }
    if row.error_count > 0 {
        let _ = writeln!(
            out,
            "║ {}errors: {} ({} malformed)",
            indent, row.error_count, row.malformed_count
        );
    }
    if !row.complete {
        let _ = writeln!(
            out,
            "║ {}partial: {}/{} iterations",
            indent, row.iterations_seen, row.iterations_configured
        );
    }
}

fn format_latency(row: &MetricsRow) -> String {
    match row.avg_latency_ms {
        Some(ms) => format!("{}ms", ms),
        None => "N/A".to_string(),
    }
}

fn format_tokens(row: &MetricsRow) -> String {
    match (row.avg_tokens_in, row.avg_tokens_out) {
        (Some(input), Some(output)) => format!("{} in / {} out", input, output),
        _ => "N/A".to_string(),
    }
}

/// Usage and status lines printed after a live run.
pub fn render_run_footer(outcome: &SweepOutcome) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Usage:");
    for (provider, usage) in &outcome.usage {
        let _ = writeln!(out, "  {}: {}", provider, format_usage(usage));
    }
    let _ = writeln!(out, "  total: {}", format_usage(&outcome.total_usage()));

    let elapsed = outcome.elapsed().num_milliseconds() as f64 / 1000.0;
    let _ = writeln!(out, "Elapsed: {:.1}s", elapsed);
    if outcome.rejected > 0 {
        let _ = writeln!(out, "Rejected observations: {}", outcome.rejected);
    }
    if outcome.budget_exhausted {
        let _ = writeln!(out, "Stopped early: token budget exhausted (partial results)");
    } else if outcome.cancelled {
        let _ = writeln!(out, "Stopped early: interrupted (partial results)");
    }
    out
}

fn format_usage(usage: &LlmUsage) -> String {
    let mut line = format!(
        "{} calls, {} failed, {} tokens ({} in / {} out), ~${:.4}",
        usage.llm_calls,
        usage.failed_calls,
        usage.total_tokens,
        usage.prompt_tokens,
        usage.completion_tokens,
        usage.estimated_cost
    );
    if usage.estimated_calls > 0 {
        let _ = write!(line, ", {} estimated", usage.estimated_calls);
    }
    line
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    report: &'a Report,
    #[serde(skip_serializing_if = "Option::is_none")]
    run: Option<JsonRun<'a>>,
}

#[derive(Serialize)]
struct JsonRun<'a> {
    usage: &'a BTreeMap<String, LlmUsage>,
    rejected: u64,
    cancelled: bool,
    budget_exhausted: bool,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

pub fn render_json_report(report: &Report) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonOutput { report, run: None })
}

pub fn render_json_outcome(outcome: &SweepOutcome) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonOutput {
        report: &outcome.report,
        run: Some(JsonRun {
            usage: &outcome.usage,
            rejected: outcome.rejected,
            cancelled: outcome.cancelled,
            budget_exhausted: outcome.budget_exhausted,
            started_at: outcome.started_at,
            finished_at: outcome.finished_at,
        }),
    })
}
