use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use conclave_core::SessionStats;

/// A tool invocation recorded inside a turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub result: Option<String>,
    pub is_error: bool,
}

impl ToolInvocation {
    pub fn new(tool_name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            result: None,
            is_error: false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.result.is_none()
    }
}

/// One sealed unit of activity by one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub sequence_number: u64,
    pub identity: String,
    pub assistant_text: Option<String>,
    pub tool_invocations: Vec<ToolInvocation>,
}

impl TurnRecord {
    pub(crate) fn open(sequence_number: u64, identity: impl Into<String>) -> Self {
        Self {
            sequence_number,
            identity: identity.into(),
            assistant_text: None,
            tool_invocations: Vec::new(),
        }
    }
}

/// Aggregates across the primary and every subordinate.
///
/// Durations come from the primary alone: subordinate time elapses inside the
/// primary's wall clock, so adding it would double count.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub total_turns: u64,
    pub total_cost_usd: f64,
    pub total_duration_ms: u64,
    pub total_duration_api_ms: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cache_read_tokens: u64,
}

impl TraceSummary {
    pub fn compute<'a>(
        primary: Option<&SessionStats>,
        subordinates: impl IntoIterator<Item = &'a SessionStats>,
    ) -> Self {
        let mut summary = Self::default();
        if let Some(stats) = primary {
            summary.add(stats);
            summary.total_duration_ms = stats.duration_ms;
            summary.total_duration_api_ms = stats.duration_api_ms;
        }
        for stats in subordinates {
            summary.add(stats);
        }
        summary
    }

    fn add(&mut self, stats: &SessionStats) {
        self.total_turns += u64::from(stats.num_turns);
        self.total_cost_usd += stats.total_cost_usd;
        self.total_input_tokens += stats.input_tokens;
        self.total_output_tokens += stats.output_tokens;
        self.total_cache_read_tokens += stats.cache_read_tokens;
    }
}

/// Immutable, self-contained view of a finished (or in-progress) trace.
/// This is also the per-task value in the persisted trace file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceSnapshot {
    pub start_time: DateTime<Utc>,
    pub instructions: Option<String>,
    pub task: Option<String>,
    pub turns: Vec<TurnRecord>,
    pub statistics: Option<SessionStats>,
    #[serde(default)]
    pub subordinate_statistics: BTreeMap<String, SessionStats>,
    pub summary: TraceSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_sums_turns_cost_tokens_but_not_durations() {
        let primary = SessionStats::new(5, 10_000, 8_000, 0.25).with_tokens(100, 50, 10);
        let worker = SessionStats::new(3, 4_000, 3_000, 0.10).with_tokens(40, 20, 5);
        let critic = SessionStats::new(2, 2_000, 1_500, 0.05);

        let summary = TraceSummary::compute(Some(&primary), [&worker, &critic]);
        assert_eq!(summary.total_turns, 10);
        assert!((summary.total_cost_usd - 0.40).abs() < 1e-9);
        assert_eq!(summary.total_duration_ms, 10_000);
        assert_eq!(summary.total_duration_api_ms, 8_000);
        assert_eq!(summary.total_input_tokens, 140);
        assert_eq!(summary.total_output_tokens, 70);
        assert_eq!(summary.total_cache_read_tokens, 15);
    }

    #[test]
    fn summary_without_primary_has_zero_duration() {
        let worker = SessionStats::new(3, 4_000, 3_000, 0.10);
        let summary = TraceSummary::compute(None, [&worker]);
        assert_eq!(summary.total_turns, 3);
        assert_eq!(summary.total_duration_ms, 0);
    }

    #[test]
    fn empty_turn() {
        assert!(TurnRecord::open(1, "A").is_empty());
    }
}
