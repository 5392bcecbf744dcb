use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use conclave_core::{
    ContentBlock, RuntimeError, SessionConnection, SessionEvent, SessionRuntime, SessionSpec,
};
use conclave_trace::TraceRecorder;

use crate::error::PoolError;

const NO_RESPONSE: &str = "[No response]";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolState {
    Idle,
    Spawned,
}

/// What `shutdown` did. Close failures are reported here, never raised.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub closed: Vec<String>,
    pub failures: Vec<(String, RuntimeError)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Named subordinate sessions reachable from a primary by delegation.
///
/// `communicate` drives one subordinate to the end of its exchange before
/// returning, so at most one subordinate is ever mid-turn. The trace recorder
/// is borrowed per call rather than held, which leaves the strategy free to
/// write the primary's turns between delegations.
pub struct SubordinatePool {
    runtime: Arc<dyn SessionRuntime>,
    members: BTreeMap<String, SessionSpec>,
    connections: BTreeMap<String, Box<dyn SessionConnection>>,
    conversation_counts: BTreeMap<String, u32>,
    state: PoolState,
}

impl SubordinatePool {
    pub fn new(
        runtime: Arc<dyn SessionRuntime>,
        members: impl IntoIterator<Item = SessionSpec>,
    ) -> Self {
        let members: BTreeMap<String, SessionSpec> = members
            .into_iter()
            .map(|spec| (spec.identity().to_string(), spec))
            .collect();
        let conversation_counts = members.keys().map(|id| (id.clone(), 0)).collect();
        Self {
            runtime,
            members,
            connections: BTreeMap::new(),
            conversation_counts,
            state: PoolState::Idle,
        }
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    pub fn is_spawned(&self) -> bool {
        self.state == PoolState::Spawned
    }

    /// Configured identities in sorted order.
    pub fn identities(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn conversation_count(&self, identity: &str) -> Option<u32> {
        self.conversation_counts.get(identity).copied()
    }

    /// Connect every member. The first connect failure is returned as
    /// `PoolError::Connect`; connections opened before it stay held until
    /// `shutdown` releases them.
    pub async fn spawn(&mut self) -> Result<(), PoolError> {
        if self.state == PoolState::Spawned {
            return Err(PoolError::AlreadySpawned);
        }
        for (identity, spec) in &self.members {
            if self.connections.contains_key(identity) {
                continue;
            }
            let conn = self
                .runtime
                .connect(spec)
                .await
                .map_err(|source| PoolError::Connect {
                    identity: identity.clone(),
                    source,
                })?;
            self.connections.insert(identity.clone(), conn);
        }
        self.state = PoolState::Spawned;
        info!(
            members = self.members.len(),
            runtime = self.runtime.name(),
            "subordinates spawned"
        );
        Ok(())
    }

    /// Relay `message` to `identity` and collect its whole response.
    ///
    /// The subordinate's activity is recorded as one turn under its identity,
    /// and its statistics replace any earlier entry for it.
    #[instrument(skip_all, fields(identity = %identity))]
    pub async fn communicate(
        &mut self,
        recorder: &mut TraceRecorder,
        identity: &str,
        message: &str,
    ) -> Result<String, PoolError> {
        if self.state != PoolState::Spawned {
            return Err(PoolError::NotSpawned);
        }
        if !self.connections.contains_key(identity) {
            return Err(PoolError::UnknownAgent {
                requested: identity.to_string(),
                known: self.connections.keys().cloned().collect(),
            });
        }
        *self
            .conversation_counts
            .entry(identity.to_string())
            .or_insert(0) += 1;

        let conn = self
            .connections
            .get_mut(identity)
            .ok_or(PoolError::NotSpawned)?;
        let responses = match collect_exchange(&mut **conn, recorder, identity, message).await {
            Ok(responses) => responses,
            Err(e) => {
                if recorder.open_identity() == Some(identity) {
                    recorder.end_turn();
                }
                return Err(e);
            }
        };

        debug!(fragments = responses.len(), "subordinate responded");
        let body = if responses.is_empty() {
            NO_RESPONSE.to_string()
        } else {
            responses.join("\n")
        };
        Ok(format!("[{} responded]\n\n{body}", identity.to_uppercase()))
    }

    /// Close every held connection and return to `Idle`.
    ///
    /// Individual close failures are collected into the report and logged;
    /// the connection set is cleared regardless. Only a pool with nothing to
    /// release reports `NotSpawned`.
    pub async fn shutdown(&mut self) -> Result<ShutdownReport, PoolError> {
        if self.state == PoolState::Idle && self.connections.is_empty() {
            return Err(PoolError::NotSpawned);
        }
        let mut report = ShutdownReport::default();
        for (identity, mut conn) in std::mem::take(&mut self.connections) {
            match conn.disconnect().await {
                Ok(()) => report.closed.push(identity),
                Err(e) => {
                    warn!(identity = %identity, error = %e, kind = e.error_kind(), "subordinate close failed");
                    report.failures.push((identity, e));
                }
            }
        }
        self.state = PoolState::Idle;
        info!(
            closed = report.closed.len(),
            failed = report.failures.len(),
            "subordinates shut down"
        );
        Ok(report)
    }
}

async fn collect_exchange(
    conn: &mut dyn SessionConnection,
    recorder: &mut TraceRecorder,
    identity: &str,
    message: &str,
) -> Result<Vec<String>, PoolError> {
    let session_err = |source: RuntimeError| PoolError::Session {
        identity: identity.to_string(),
        source,
    };

    conn.send(message).await.map_err(session_err)?;
    let mut responses = Vec::new();
    while let Some(event) = conn.next_event().await.map_err(session_err)? {
        match event {
            SessionEvent::AssistantContent { content } => {
                if recorder.open_identity() != Some(identity) {
                    recorder.start_turn(identity)?;
                }
                for block in content {
                    match block {
                        ContentBlock::Text { text } => {
                            recorder.add_assistant_text(&text)?;
                            responses.push(text);
                        }
                        ContentBlock::ToolUse(tool_use) => {
                            recorder.add_tool_invocation(&tool_use.name, tool_use.arguments)?;
                        }
                    }
                }
            }
            SessionEvent::ToolResult(result) => {
                recorder.add_tool_result(&result.content, result.is_error);
            }
            SessionEvent::Statistics(stats) => {
                recorder.end_turn();
                recorder.set_statistics(stats, Some(identity));
            }
        }
    }
    recorder.end_turn();
    Ok(responses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::{SessionStats, ToolCallId};
    use conclave_runtime::{ScriptedReply, ScriptedRuntime};
    use serde_json::json;

    fn stats(turns: u32) -> SessionStats {
        SessionStats::new(turns, 100, 80, 0.01)
    }

    fn pool_with(rt: &ScriptedRuntime, ids: &[&str]) -> SubordinatePool {
        let members = ids.iter().map(|id| SessionSpec::new(*id, "role", "/tmp"));
        SubordinatePool::new(Arc::new(rt.clone()), members)
    }

    #[tokio::test]
    async fn communicate_before_spawn_is_not_spawned() {
        let rt = ScriptedRuntime::new();
        let mut pool = pool_with(&rt, &["critic"]);
        let mut rec = TraceRecorder::default();
        let err = pool.communicate(&mut rec, "critic", "hi").await.unwrap_err();
        assert!(matches!(err, PoolError::NotSpawned));
        assert!(rt.connected().is_empty());
        assert_eq!(pool.conversation_count("critic"), Some(0));
    }

    #[tokio::test]
    async fn unknown_agent_mutates_nothing() {
        let rt = ScriptedRuntime::new();
        let mut pool = pool_with(&rt, &["critic"]);
        pool.spawn().await.unwrap();
        let mut rec = TraceRecorder::default();

        let err = pool.communicate(&mut rec, "ghost", "hi").await.unwrap_err();
        match &err {
            PoolError::UnknownAgent { requested, known } => {
                assert_eq!(requested, "ghost");
                assert_eq!(known, &["critic".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_tool_output().content.contains(r#"["critic"]"#));
        assert_eq!(pool.conversation_count("critic"), Some(0));
        assert!(rec.turns().is_empty());
        assert!(rt.sent_to("critic").is_empty());
    }

    #[tokio::test]
    async fn spawn_twice_is_rejected_without_reconnecting() {
        let rt = ScriptedRuntime::new();
        let mut pool = pool_with(&rt, &["a", "b"]);
        pool.spawn().await.unwrap();
        assert!(matches!(pool.spawn().await, Err(PoolError::AlreadySpawned)));
        assert_eq!(rt.connected(), ["a", "b"]);
    }

    #[tokio::test]
    async fn communicate_records_one_turn_and_statistics() {
        let rt = ScriptedRuntime::new();
        rt.script(
            "critic",
            ScriptedReply::events(vec![
                SessionEvent::text("Reviewing"),
                SessionEvent::tool_use(ToolCallId::from_raw("t1"), "Read", json!({"path": "sol.py"})),
                SessionEvent::tool_result(ToolCallId::from_raw("t1"), "def f(): ...", false),
                SessionEvent::text("Looks correct"),
                SessionEvent::Statistics(stats(2)),
            ]),
        );
        let mut pool = pool_with(&rt, &["critic"]);
        pool.spawn().await.unwrap();
        let mut rec = TraceRecorder::default();

        let reply = pool.communicate(&mut rec, "critic", "review sol.py").await.unwrap();
        assert_eq!(reply, "[CRITIC responded]\n\nReviewing\nLooks correct");
        assert_eq!(pool.conversation_count("critic"), Some(1));
        assert_eq!(rt.sent_to("critic"), ["review sol.py"]);

        assert_eq!(rec.turns().len(), 1);
        let turn = &rec.turns()[0];
        assert_eq!(turn.identity, "critic");
        assert_eq!(turn.assistant_text.as_deref(), Some("Reviewing\nLooks correct"));
        assert_eq!(turn.tool_invocations[0].result.as_deref(), Some("def f(): ..."));
        assert_eq!(rec.subordinate_statistics()["critic"].num_turns, 2);
        assert!(!rec.has_open_turn());
    }

    #[tokio::test]
    async fn silent_subordinate_gets_placeholder() {
        let rt = ScriptedRuntime::new();
        rt.script("swe_1", ScriptedReply::events(vec![SessionEvent::Statistics(stats(1))]));
        let mut pool = pool_with(&rt, &["swe_1"]);
        pool.spawn().await.unwrap();
        let mut rec = TraceRecorder::default();
        let reply = pool.communicate(&mut rec, "swe_1", "hi").await.unwrap();
        assert_eq!(reply, "[SWE_1 responded]\n\n[No response]");
        assert!(rec.turns().is_empty());
        assert!(rec.subordinate_statistics().contains_key("swe_1"));
    }

    #[tokio::test]
    async fn second_exchange_overwrites_statistics() {
        let rt = ScriptedRuntime::new();
        rt.script("critic", ScriptedReply::text("one", stats(1)))
            .script("critic", ScriptedReply::text("two", stats(5)));
        let mut pool = pool_with(&rt, &["critic"]);
        pool.spawn().await.unwrap();
        let mut rec = TraceRecorder::default();
        pool.communicate(&mut rec, "critic", "a").await.unwrap();
        pool.communicate(&mut rec, "critic", "b").await.unwrap();
        assert_eq!(pool.conversation_count("critic"), Some(2));
        assert_eq!(rec.turns().len(), 2);
        assert_eq!(rec.subordinate_statistics()["critic"].num_turns, 5);
    }

    #[tokio::test]
    async fn session_failure_seals_turn_and_returns_error() {
        let rt = ScriptedRuntime::new();
        rt.script(
            "swe_2",
            ScriptedReply::FailAfter(vec![SessionEvent::text("starting")], "agent crashed".into()),
        );
        let mut pool = pool_with(&rt, &["swe_2"]);
        pool.spawn().await.unwrap();
        let mut rec = TraceRecorder::default();
        let err = pool.communicate(&mut rec, "swe_2", "go").await.unwrap_err();
        assert!(matches!(err, PoolError::Session { ref identity, .. } if identity == "swe_2"));
        assert!(err.to_tool_output().content.contains("agent crashed"));
        assert!(!rec.has_open_turn());
        assert_eq!(rec.turns()[0].assistant_text.as_deref(), Some("starting"));
    }

    #[tokio::test]
    async fn communicate_with_foreign_open_turn_is_a_trace_error() {
        let rt = ScriptedRuntime::new();
        rt.script("critic", ScriptedReply::text("hi", stats(1)));
        let mut pool = pool_with(&rt, &["critic"]);
        pool.spawn().await.unwrap();
        let mut rec = TraceRecorder::default();
        rec.start_turn("Builder").unwrap();
        let err = pool.communicate(&mut rec, "critic", "x").await.unwrap_err();
        assert!(matches!(err, PoolError::Trace(_)));
        assert_eq!(rec.open_identity(), Some("Builder"));
    }

    #[tokio::test]
    async fn shutdown_clears_everything_even_when_every_close_fails() {
        let rt = ScriptedRuntime::new();
        rt.fail_disconnect("swe_1")
            .fail_disconnect("swe_2")
            .fail_disconnect("swe_3");
        let mut pool = pool_with(&rt, &["swe_1", "swe_2", "swe_3"]);
        pool.spawn().await.unwrap();

        let report = pool.shutdown().await.unwrap();
        assert_eq!(report.failures.len(), 3);
        assert!(report.closed.is_empty());
        assert!(!report.is_clean());
        assert_eq!(pool.state(), PoolState::Idle);
        assert_eq!(pool.connection_count(), 0);
        assert_eq!(rt.disconnected(), ["swe_1", "swe_2", "swe_3"]);

        let mut rec = TraceRecorder::default();
        assert!(matches!(
            pool.communicate(&mut rec, "swe_1", "hi").await,
            Err(PoolError::NotSpawned)
        ));
        assert!(matches!(pool.shutdown().await, Err(PoolError::NotSpawned)));
    }

    #[tokio::test]
    async fn failed_spawn_leaves_partial_connections_for_shutdown() {
        let rt = ScriptedRuntime::new();
        rt.fail_connect("c");
        let mut pool = pool_with(&rt, &["a", "b", "c"]);

        let err = pool.spawn().await.unwrap_err();
        assert!(matches!(err, PoolError::Connect { ref identity, .. } if identity == "c"));
        assert_eq!(pool.state(), PoolState::Idle);
        assert_eq!(pool.connection_count(), 2);

        let report = pool.shutdown().await.unwrap();
        assert_eq!(report.closed, ["a", "b"]);
        assert_eq!(pool.connection_count(), 0);
    }

    #[tokio::test]
    async fn empty_pool_spawns_and_shuts_down() {
        let rt = ScriptedRuntime::new();
        let mut pool = pool_with(&rt, &[]);
        pool.spawn().await.unwrap();
        assert!(pool.is_spawned());
        let report = pool.shutdown().await.unwrap();
        assert!(report.is_clean());
    }
}
