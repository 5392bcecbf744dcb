//! Plain-text renderings of turns and traces for the terminal and debug log.

use std::fmt::Write as _;

use serde_json::Value;

use conclave_core::SessionStats;

use crate::snapshot::{TraceSnapshot, TurnRecord};

const RULE_WIDTH: usize = 80;

/// A titled block with a top and bottom rule.
pub fn panel(title: &str, body: &str) -> String {
    let rule = "-".repeat(RULE_WIDTH);
    format!("{rule}\n[{title}]\n{body}\n{rule}")
}

pub fn render_turn(turn: &TurnRecord) -> String {
    let mut body = String::new();
    if let Some(text) = &turn.assistant_text {
        let _ = writeln!(body, "Text: {text}");
    }
    for invocation in &turn.tool_invocations {
        let _ = writeln!(body, "Tool: {}", invocation.tool_name);
        for (key, value) in &invocation.arguments {
            let _ = writeln!(body, "  {key}: {}", display_value(value));
        }
        match (&invocation.result, invocation.is_error) {
            (Some(result), true) => {
                let _ = writeln!(body, "ERROR: {result}");
            }
            (Some(result), false) => {
                let _ = writeln!(body, "Result: {result}");
            }
            (None, _) => {}
        }
    }
    let title = format!("Turn {} - {}", turn.sequence_number, turn.identity);
    panel(&title, body.trim_end())
}

pub fn render_trace(snapshot: &TraceSnapshot) -> String {
    let banner = "=".repeat(RULE_WIDTH);
    let mut out = String::new();
    let _ = writeln!(out, "{banner}\nEXECUTION TRACE\n{banner}");
    let _ = writeln!(
        out,
        "Started: {}\n",
        snapshot.start_time.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(task) = &snapshot.task {
        let _ = writeln!(out, "{}\n", panel("TASK", task));
    }
    for turn in &snapshot.turns {
        let _ = writeln!(out, "{}\n", render_turn(turn));
    }
    if let Some(stats) = &snapshot.statistics {
        let _ = writeln!(out, "{banner}\nEXECUTION STATISTICS\n{banner}");
        let _ = writeln!(out, "Total Turns: {}", stats.num_turns);
        let _ = writeln!(
            out,
            "Duration: {}ms (API: {}ms)",
            stats.duration_ms, stats.duration_api_ms
        );
        let _ = writeln!(
            out,
            "Tokens: Input: {}, Output: {}, Cache Read: {}",
            stats.input_tokens, stats.output_tokens, stats.cache_read_tokens
        );
        let _ = writeln!(out, "{banner}");
    }
    out
}

/// Overall totals, then the primary, then each subordinate in identity order.
pub fn render_summary(snapshot: &TraceSnapshot) -> String {
    if snapshot.statistics.is_none() && snapshot.subordinate_statistics.is_empty() {
        return panel(
            "Execution Summary",
            "Execution completed (no statistics available)",
        );
    }

    let summary = &snapshot.summary;
    let mut body = String::new();
    let _ = writeln!(body, "OVERALL");
    let _ = writeln!(body, "Total Turns: {}", summary.total_turns);
    let _ = writeln!(
        body,
        "Total Duration: {}ms (API: {}ms)",
        summary.total_duration_ms, summary.total_duration_api_ms
    );
    let _ = writeln!(body, "Total Cost: ${:.4}", summary.total_cost_usd);

    if let Some(stats) = &snapshot.statistics {
        let _ = writeln!(body, "\nPRIMARY");
        write_stats(&mut body, stats);
    }
    for (identity, stats) in &snapshot.subordinate_statistics {
        let _ = writeln!(body, "\n{}", identity.to_uppercase());
        write_stats(&mut body, stats);
    }
    panel("Execution Summary", body.trim_end())
}

fn write_stats(out: &mut String, stats: &SessionStats) {
    let _ = writeln!(out, "Turns: {}", stats.num_turns);
    let _ = writeln!(
        out,
        "Duration: {}ms (API: {}ms)",
        stats.duration_ms, stats.duration_api_ms
    );
    let _ = writeln!(out, "Cost: ${:.4}", stats.total_cost_usd);
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
