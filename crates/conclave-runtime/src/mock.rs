use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use conclave_core::tools::DELEGATION_TOOL;
use conclave_core::{
    ContentBlock, RuntimeError, SessionConnection, SessionEvent, SessionRuntime, SessionSpec,
    SessionStats, ToolCallId, ToolOutput,
};

/// One pre-programmed response to a `send`.
#[derive(Clone, Debug)]
pub enum ScriptedReply {
    /// Yield these events in order. Delegation requests among them are
    /// followed by a tool result carrying the host's answer.
    Events(Vec<SessionEvent>),
    /// Yield these events, then fail the exchange.
    FailAfter(Vec<SessionEvent>, String),
}

impl ScriptedReply {
    /// A single text response followed by statistics.
    pub fn text(text: &str, stats: SessionStats) -> Self {
        Self::Events(vec![SessionEvent::text(text), SessionEvent::Statistics(stats)])
    }

    /// Ask the host to relay `message` to `agent_id`, then finish with `closing`.
    pub fn delegate(agent_id: &str, message: &str, closing: &str, stats: SessionStats) -> Self {
        Self::Events(vec![
            delegation_event(agent_id, message),
            SessionEvent::text(closing),
            SessionEvent::Statistics(stats),
        ])
    }

    pub fn events(events: Vec<SessionEvent>) -> Self {
        Self::Events(events)
    }
}

/// An assistant-content event requesting the delegation tool.
pub fn delegation_event(agent_id: &str, message: &str) -> SessionEvent {
    SessionEvent::tool_use(
        ToolCallId::new(),
        DELEGATION_TOOL,
        json!({ "agent_id": agent_id, "message": message }),
    )
}

/// Everything the scripted runtime observed, shared with its connections.
#[derive(Debug, Default)]
struct ScriptState {
    scripts: HashMap<String, VecDeque<ScriptedReply>>,
    fallback: Option<ScriptedReply>,
    connect_failures: HashSet<String>,
    disconnect_failures: HashSet<String>,
    connected: Vec<String>,
    disconnected: Vec<String>,
    specs: HashMap<String, SessionSpec>,
    sent: Vec<(String, String)>,
    answers: Vec<(String, ToolCallId, ToolOutput)>,
}

/// Runtime that answers each `send` with the next scripted reply for the
/// session's identity.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRuntime {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next unanswered `send` by `identity`.
    pub fn script(&self, identity: &str, reply: ScriptedReply) -> &Self {
        self.state
            .lock()
            .scripts
            .entry(identity.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Reply used when an identity has nothing queued.
    pub fn with_fallback(self, reply: ScriptedReply) -> Self {
        self.state.lock().fallback = Some(reply);
        self
    }

    pub fn fail_connect(&self, identity: &str) -> &Self {
        self.state.lock().connect_failures.insert(identity.to_string());
        self
    }

    pub fn fail_disconnect(&self, identity: &str) -> &Self {
        self.state
            .lock()
            .disconnect_failures
            .insert(identity.to_string());
        self
    }

    /// Identities connected so far, in connect order.
    pub fn connected(&self) -> Vec<String> {
        self.state.lock().connected.clone()
    }

    pub fn disconnected(&self) -> Vec<String> {
        self.state.lock().disconnected.clone()
    }

    pub fn spec_for(&self, identity: &str) -> Option<SessionSpec> {
        self.state.lock().specs.get(identity).cloned()
    }

    /// Messages sent to `identity`.
    pub fn sent_to(&self, identity: &str) -> Vec<String> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|(id, _)| id == identity)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    /// Host tool answers given to `identity`.
    pub fn answers_for(&self, identity: &str) -> Vec<ToolOutput> {
        self.state
            .lock()
            .answers
            .iter()
            .filter(|(id, _, _)| id == identity)
            .map(|(_, _, out)| out.clone())
            .collect()
    }
}

#[async_trait]
impl SessionRuntime for ScriptedRuntime {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(
        &self,
        spec: &SessionSpec,
    ) -> Result<Box<dyn SessionConnection>, RuntimeError> {
        let identity = spec.identity().to_string();
        {
            let mut state = self.state.lock();
            if state.connect_failures.contains(&identity) {
                return Err(RuntimeError::Connect {
                    identity,
                    reason: "scripted connect failure".into(),
                });
            }
            state.connected.push(identity.clone());
            state.specs.insert(identity.clone(), spec.clone());
        }
        Ok(Box::new(ScriptedConnection {
            identity,
            state: Arc::clone(&self.state),
            pending: VecDeque::new(),
            failure: None,
            awaiting: VecDeque::new(),
            answered: HashMap::new(),
            connected: true,
            in_exchange: false,
        }))
    }
}

struct ScriptedConnection {
    identity: String,
    state: Arc<Mutex<ScriptState>>,
    pending: VecDeque<SessionEvent>,
    failure: Option<String>,
    awaiting: VecDeque<ToolCallId>,
    answered: HashMap<ToolCallId, ToolOutput>,
    connected: bool,
    in_exchange: bool,
}

impl ScriptedConnection {
    fn finish_exchange(&mut self) {
        self.in_exchange = false;
        self.pending.clear();
        self.awaiting.clear();
        self.answered.clear();
        self.failure = None;
    }
}

#[async_trait]
impl SessionConnection for ScriptedConnection {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn send(&mut self, message: &str) -> Result<(), RuntimeError> {
        if !self.connected {
            return Err(RuntimeError::NotConnected(self.identity.clone()));
        }
        let reply = {
            let mut state = self.state.lock();
            state.sent.push((self.identity.clone(), message.to_string()));
            let queued = state
                .scripts
                .get_mut(&self.identity)
                .and_then(VecDeque::pop_front);
            queued.or_else(|| state.fallback.clone())
        };
        let reply = reply.ok_or_else(|| {
            RuntimeError::Internal(format!("no scripted reply for '{}'", self.identity))
        })?;

        self.finish_exchange();
        match reply {
            ScriptedReply::Events(events) => self.pending = events.into(),
            ScriptedReply::FailAfter(events, reason) => {
                self.pending = events.into();
                self.failure = Some(reason);
            }
        }
        self.in_exchange = true;
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<SessionEvent>, RuntimeError> {
        if !self.connected {
            return Err(RuntimeError::NotConnected(self.identity.clone()));
        }
        if !self.in_exchange {
            return Ok(None);
        }

        if let Some(call_id) = self.awaiting.pop_front() {
            let Some(output) = self.answered.remove(&call_id) else {
                self.finish_exchange();
                return Err(RuntimeError::Protocol(format!(
                    "host tool call {call_id} was not answered"
                )));
            };
            return Ok(Some(SessionEvent::tool_result(
                call_id,
                output.content,
                output.is_error,
            )));
        }

        let Some(event) = self.pending.pop_front() else {
            let failure = self.failure.take();
            self.finish_exchange();
            return Err(match failure {
                Some(reason) => RuntimeError::Internal(reason),
                None => RuntimeError::StreamEnded {
                    identity: self.identity.clone(),
                },
            });
        };

        match &event {
            SessionEvent::AssistantContent { content } => {
                for block in content {
                    if let ContentBlock::ToolUse(tu) = block {
                        if tu.name == DELEGATION_TOOL {
                            self.awaiting.push_back(tu.id.clone());
                        }
                    }
                }
            }
            SessionEvent::Statistics(_) => self.finish_exchange(),
            SessionEvent::ToolResult(_) => {}
        }
        Ok(Some(event))
    }

    async fn answer_tool(
        &mut self,
        call_id: &ToolCallId,
        output: ToolOutput,
    ) -> Result<(), RuntimeError> {
        if !self.awaiting.contains(call_id) {
            return Err(RuntimeError::Protocol(format!(
                "no host tool call {call_id} awaiting an answer"
            )));
        }
        self.state
            .lock()
            .answers
            .push((self.identity.clone(), call_id.clone(), output.clone()));
        self.answered.insert(call_id.clone(), output);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), RuntimeError> {
        self.connected = false;
        self.finish_exchange();
        let mut state = self.state.lock();
        state.disconnected.push(self.identity.clone());
        if state.disconnect_failures.contains(&self.identity) {
            return Err(RuntimeError::Disconnect {
                identity: self.identity.clone(),
                reason: "scripted disconnect failure".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> SessionStats {
        SessionStats::new(1, 10, 8, 0.001)
    }

    async fn drain(conn: &mut Box<dyn SessionConnection>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(event) = conn.next_event().await.unwrap() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn replies_in_order_per_identity() {
        let rt = ScriptedRuntime::new();
        rt.script("critic", ScriptedReply::text("first", stats()))
            .script("critic", ScriptedReply::text("second", stats()));

        let mut conn = rt
            .connect(&SessionSpec::new("critic", "", "/tmp"))
            .await
            .unwrap();
        conn.send("one").await.unwrap();
        assert_eq!(drain(&mut conn).await.len(), 2);
        conn.send("two").await.unwrap();
        let events = drain(&mut conn).await;
        assert_eq!(events[0], SessionEvent::text("second"));
        assert_eq!(rt.sent_to("critic"), ["one", "two"]);
    }

    #[tokio::test]
    async fn delegation_result_echoes_the_answer() {
        let rt = ScriptedRuntime::new();
        rt.script(
            "Leader",
            ScriptedReply::delegate("swe_1", "build it", "done", stats()),
        );
        let mut conn = rt
            .connect(&SessionSpec::new("Leader", "", "/tmp"))
            .await
            .unwrap();
        conn.send("task").await.unwrap();

        let first = conn.next_event().await.unwrap().unwrap();
        let SessionEvent::AssistantContent { content } = &first else {
            panic!("expected assistant content");
        };
        let ContentBlock::ToolUse(tu) = &content[0] else {
            panic!("expected tool use");
        };
        conn.answer_tool(&tu.id, ToolOutput::ok("built")).await.unwrap();

        let second = conn.next_event().await.unwrap().unwrap();
        assert_eq!(
            second,
            SessionEvent::tool_result(tu.id.clone(), "built", false)
        );
        assert_eq!(rt.answers_for("Leader"), [ToolOutput::ok("built")]);
        assert_eq!(drain(&mut conn).await.len(), 2);
    }

    #[tokio::test]
    async fn unanswered_delegation_is_a_protocol_error() {
        let rt = ScriptedRuntime::new();
        rt.script("Leader", ScriptedReply::delegate("swe_1", "x", "y", stats()));
        let mut conn = rt
            .connect(&SessionSpec::new("Leader", "", "/tmp"))
            .await
            .unwrap();
        conn.send("task").await.unwrap();
        conn.next_event().await.unwrap();
        assert!(matches!(
            conn.next_event().await,
            Err(RuntimeError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn injected_failures() {
        let rt = ScriptedRuntime::new();
        rt.fail_connect("bad").fail_disconnect("flaky");
        assert!(rt.connect(&SessionSpec::new("bad", "", "/tmp")).await.is_err());

        let mut conn = rt
            .connect(&SessionSpec::new("flaky", "", "/tmp"))
            .await
            .unwrap();
        assert!(conn.disconnect().await.is_err());
        assert_eq!(rt.disconnected(), ["flaky"]);
        assert!(matches!(
            conn.send("x").await,
            Err(RuntimeError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn fail_after_and_missing_statistics() {
        let rt = ScriptedRuntime::new();
        rt.script(
            "a",
            ScriptedReply::FailAfter(vec![SessionEvent::text("partial")], "crashed".into()),
        )
        .script("a", ScriptedReply::events(vec![SessionEvent::text("no stats")]));
        let mut conn = rt.connect(&SessionSpec::new("a", "", "/tmp")).await.unwrap();

        conn.send("1").await.unwrap();
        assert!(conn.next_event().await.unwrap().is_some());
        assert!(matches!(conn.next_event().await, Err(RuntimeError::Internal(m)) if m == "crashed"));

        conn.send("2").await.unwrap();
        assert!(conn.next_event().await.unwrap().is_some());
        assert!(matches!(
            conn.next_event().await,
            Err(RuntimeError::StreamEnded { .. })
        ));
        assert!(conn.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fallback_reply_when_queue_empty() {
        let rt = ScriptedRuntime::new().with_fallback(ScriptedReply::text("ok", stats()));
        let mut conn = rt.connect(&SessionSpec::new("any", "", "/tmp")).await.unwrap();
        conn.send("hi").await.unwrap();
        assert_eq!(drain(&mut conn).await.len(), 2);

        let bare = ScriptedRuntime::new();
        let mut conn = bare.connect(&SessionSpec::new("any", "", "/tmp")).await.unwrap();
        assert!(matches!(conn.send("hi").await, Err(RuntimeError::Internal(_))));
    }
}
