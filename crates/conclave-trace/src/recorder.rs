use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info};

use conclave_core::SessionStats;

use crate::error::TraceError;
use crate::render;
use crate::snapshot::{ToolInvocation, TraceSnapshot, TraceSummary, TurnRecord};

const DEBUG_TARGET: &str = "conclave_trace::debug";

/// Turn-structured accumulator shared by a strategy's drive loop and its
/// subordinate pool.
///
/// At most one turn is open at a time across every identity. Both writers
/// take `&mut TraceRecorder` and never hold it across each other's calls, so
/// the recorder carries no locking of its own. Allowing concurrent delegation
/// would require one open turn per identity and a synchronized container.
#[derive(Debug)]
pub struct TraceRecorder {
    start_time: DateTime<Utc>,
    instructions: Option<String>,
    task: Option<String>,
    turns: Vec<TurnRecord>,
    open: Option<TurnRecord>,
    next_sequence: u64,
    statistics: Option<SessionStats>,
    subordinate_statistics: BTreeMap<String, SessionStats>,
    debug: bool,
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new(false)
    }
}

impl TraceRecorder {
    pub fn new(debug: bool) -> Self {
        Self {
            start_time: Utc::now(),
            instructions: None,
            task: None,
            turns: Vec::new(),
            open: None,
            next_sequence: 0,
            statistics: None,
            subordinate_statistics: BTreeMap::new(),
            debug,
        }
    }

    pub fn set_instructions(&mut self, instructions: impl Into<String>) {
        let instructions = instructions.into();
        if self.debug {
            info!(target: DEBUG_TARGET, "\n{}", render::panel("INSTRUCTIONS", &instructions));
        }
        self.instructions = Some(instructions);
    }

    pub fn set_task(&mut self, task: impl Into<String>) {
        let task = task.into();
        if self.debug {
            info!(target: DEBUG_TARGET, "\n{}", render::panel("TASK", &task));
        }
        self.task = Some(task);
    }

    pub fn start_turn(&mut self, identity: &str) -> Result<u64, TraceError> {
        if let Some(open) = &self.open {
            return Err(TraceError::TurnAlreadyOpen {
                open: open.identity.clone(),
            });
        }
        self.next_sequence += 1;
        self.open = Some(TurnRecord::open(self.next_sequence, identity));
        debug!(identity, sequence = self.next_sequence, "turn opened");
        Ok(self.next_sequence)
    }

    pub fn add_assistant_text(&mut self, text: &str) -> Result<(), TraceError> {
        let turn = self.open.as_mut().ok_or(TraceError::NoOpenTurn)?;
        match &mut turn.assistant_text {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(text);
            }
            None => turn.assistant_text = Some(text.to_string()),
        }
        Ok(())
    }

    pub fn add_tool_invocation(
        &mut self,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> Result<(), TraceError> {
        let turn = self.open.as_mut().ok_or(TraceError::NoOpenTurn)?;
        turn.tool_invocations
            .push(ToolInvocation::new(tool_name, arguments));
        Ok(())
    }

    /// Attach a result to the latest pending invocation of the open turn.
    /// Returns whether anything was attached; a missing turn or pending
    /// invocation is tolerated.
    pub fn add_tool_result(&mut self, content: &str, is_error: bool) -> bool {
        let Some(turn) = self.open.as_mut() else {
            return false;
        };
        match turn
            .tool_invocations
            .iter_mut()
            .rev()
            .find(|inv| inv.is_pending())
        {
            Some(invocation) => {
                invocation.result = Some(content.to_string());
                invocation.is_error = is_error;
                true
            }
            None => false,
        }
    }

    /// Attach a result to the earliest pending `tool_name` invocation in the
    /// most recent sealed turn of `identity`. Host tools are answered after
    /// the turn that requested them is sealed.
    pub fn resolve_sealed_invocation(
        &mut self,
        identity: &str,
        tool_name: &str,
        content: &str,
        is_error: bool,
    ) -> bool {
        let Some(turn) = self.turns.iter_mut().rev().find(|t| t.identity == identity) else {
            return false;
        };
        match turn
            .tool_invocations
            .iter_mut()
            .find(|inv| inv.tool_name == tool_name && inv.is_pending())
        {
            Some(invocation) => {
                invocation.result = Some(content.to_string());
                invocation.is_error = is_error;
                true
            }
            None => false,
        }
    }

    /// Seal the open turn, if any, and return its sequence number.
    pub fn end_turn(&mut self) -> Option<u64> {
        let turn = self.open.take()?;
        let sequence = turn.sequence_number;
        debug!(
            identity = %turn.identity,
            sequence,
            tools = turn.tool_invocations.len(),
            "turn sealed"
        );
        if self.debug {
            info!(target: DEBUG_TARGET, "\n{}", render::render_turn(&turn));
        }
        self.turns.push(turn);
        Some(sequence)
    }

    /// Record statistics for the primary (`identity` is `None`) or for a
    /// named subordinate. A subordinate addressed again overwrites its entry.
    pub fn set_statistics(&mut self, stats: SessionStats, identity: Option<&str>) {
        match identity {
            None => self.statistics = Some(stats),
            Some(id) => {
                self.subordinate_statistics.insert(id.to_string(), stats);
            }
        }
    }

    pub fn has_open_turn(&self) -> bool {
        self.open.is_some()
    }

    pub fn open_identity(&self) -> Option<&str> {
        self.open.as_ref().map(|t| t.identity.as_str())
    }

    pub fn turns(&self) -> &[TurnRecord] {
        &self.turns
    }

    pub fn statistics(&self) -> Option<&SessionStats> {
        self.statistics.as_ref()
    }

    pub fn subordinate_statistics(&self) -> &BTreeMap<String, SessionStats> {
        &self.subordinate_statistics
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary::compute(
            self.statistics.as_ref(),
            self.subordinate_statistics.values(),
        )
    }

    /// Sealed turns only; an open turn is not part of the snapshot.
    pub fn to_snapshot(&self) -> TraceSnapshot {
        TraceSnapshot {
            start_time: self.start_time,
            instructions: self.instructions.clone(),
            task: self.task.clone(),
            turns: self.turns.clone(),
            statistics: self.statistics.clone(),
            subordinate_statistics: self.subordinate_statistics.clone(),
            summary: self.summary(),
        }
    }
}
