use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use conclave_core::tools::delegation_tool_schema;
use conclave_core::{
    RuntimeError, SessionConnection, SessionEvent, SessionId, SessionRuntime, SessionSpec,
    ToolCallId, ToolOutput,
};

use crate::protocol::{decode_line, encode_frame, InboundFrame, OutboundFrame};

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runs one child process per session and talks to it over stdio.
#[derive(Clone, Debug)]
pub struct ProcessRuntime {
    command: String,
    args: Vec<String>,
    shutdown_grace: Duration,
}

impl ProcessRuntime {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// How long `disconnect` waits for a clean exit before killing. Also
    /// bounds each wait for leftover output of a failed exchange.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

#[async_trait]
impl SessionRuntime for ProcessRuntime {
    fn name(&self) -> &str {
        "process"
    }

    async fn connect(
        &self,
        spec: &SessionSpec,
    ) -> Result<Box<dyn SessionConnection>, RuntimeError> {
        let identity = spec.identity().to_string();
        let connect_err = |reason: String| RuntimeError::Connect {
            identity: identity.clone(),
            reason,
        };

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .current_dir(spec.working_directory())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| connect_err(format!("spawn {}: {e}", self.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| connect_err("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| connect_err("child stdout unavailable".into()))?;

        let session_id = SessionId::new();
        let mut conn = ProcessConnection {
            identity: identity.clone(),
            session_id,
            child,
            stdin: Some(stdin),
            lines: BufReader::new(stdout).lines(),
            in_exchange: false,
            stale: false,
            shutdown_grace: self.shutdown_grace,
        };

        let host_tools = if spec.permits(conclave_core::tools::DELEGATION_TOOL)
            && !spec.sub_sessions().is_empty()
        {
            vec![delegation_tool_schema()]
        } else {
            Vec::new()
        };
        conn.write_frame(&OutboundFrame::Session {
            spec: spec.clone(),
            host_tools,
        })
        .await
        .map_err(|e| connect_err(e.to_string()))?;

        info!(
            identity = %identity,
            session_id = %conn.session_id,
            command = %self.command,
            debug = spec.debug(),
            "session process started"
        );
        Ok(Box::new(conn))
    }
}

struct ProcessConnection {
    identity: String,
    session_id: SessionId,
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Lines<BufReader<ChildStdout>>,
    in_exchange: bool,
    /// A failed exchange may still have frames in flight.
    stale: bool,
    shutdown_grace: Duration,
}

impl ProcessConnection {
    async fn write_frame(&mut self, frame: &OutboundFrame) -> Result<(), RuntimeError> {
        let line = encode_frame(frame)?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| RuntimeError::NotConnected(self.identity.clone()))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Discard what a failed exchange left on stdout, up to its `result`
    /// frame. Stops early when the agent stays silent for the grace period.
    async fn discard_stale_frames(&mut self) -> Result<(), RuntimeError> {
        self.stale = false;
        let mut discarded = 0usize;
        loop {
            let next = tokio::time::timeout(self.shutdown_grace, self.lines.next_line()).await;
            let line = match next {
                Ok(line) => line?,
                Err(_) => {
                    debug!(identity = %self.identity, discarded, "no result frame after failed exchange");
                    return Ok(());
                }
            };
            let Some(line) = line else {
                return Err(RuntimeError::StreamEnded {
                    identity: self.identity.clone(),
                });
            };
            discarded += 1;
            if let Ok(Some(InboundFrame::Result(_))) = decode_line(&line) {
                debug!(identity = %self.identity, discarded, "resynced after failed exchange");
                return Ok(());
            }
        }
    }

    fn fail_exchange(&mut self) {
        self.in_exchange = false;
        self.stale = true;
    }
}

#[async_trait]
impl SessionConnection for ProcessConnection {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn send(&mut self, message: &str) -> Result<(), RuntimeError> {
        if self.stale {
            self.discard_stale_frames().await?;
        }
        self.write_frame(&OutboundFrame::User {
            message: message.to_string(),
        })
        .await?;
        self.in_exchange = true;
        debug!(identity = %self.identity, session_id = %self.session_id, "message sent");
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<SessionEvent>, RuntimeError> {
        if !self.in_exchange {
            return Ok(None);
        }
        loop {
            let Some(line) = self.lines.next_line().await? else {
                self.in_exchange = false;
                return Err(RuntimeError::StreamEnded {
                    identity: self.identity.clone(),
                });
            };
            let frame = match decode_line(&line) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    self.fail_exchange();
                    return Err(e);
                }
            };
            let event = frame.into_event().inspect_err(|_| self.fail_exchange())?;
            if event.is_terminal() {
                self.in_exchange = false;
            }
            return Ok(Some(event));
        }
    }

    async fn answer_tool(
        &mut self,
        call_id: &ToolCallId,
        output: ToolOutput,
    ) -> Result<(), RuntimeError> {
        if !self.in_exchange {
            return Err(RuntimeError::NoExchange(self.identity.clone()));
        }
        self.write_frame(&OutboundFrame::ToolResponse {
            tool_use_id: call_id.clone(),
            content: output.content,
            is_error: output.is_error,
        })
        .await
    }

    async fn disconnect(&mut self) -> Result<(), RuntimeError> {
        self.in_exchange = false;
        // Closing stdin is the agent's signal to exit.
        drop(self.stdin.take());
        match tokio::time::timeout(self.shutdown_grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(identity = %self.identity, %status, "session process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(RuntimeError::Disconnect {
                identity: self.identity.clone(),
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!(identity = %self.identity, grace_ms = self.shutdown_grace.as_millis() as u64, "session process did not exit, killing");
                self.child
                    .kill()
                    .await
                    .map_err(|e| RuntimeError::Disconnect {
                        identity: self.identity.clone(),
                        reason: e.to_string(),
                    })
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    // Reads the session frame and one message, replies with a text frame and
    // a result frame, then waits for stdin to close.
    const ECHO_AGENT: &str = r#"read init
read msg
echo '{"type":"assistant","content":[{"type":"text","text":"hello from agent"}]}'
echo ''
echo '{"type":"result","num_turns":1,"duration_ms":12,"duration_api_ms":10,"total_cost_usd":0.5}'
read rest
exit 0
"#;

    fn sh(script: &str) -> ProcessRuntime {
        ProcessRuntime::new("sh", vec!["-c".into(), script.into()])
            .with_shutdown_grace(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn exchange_over_stdio() {
        let dir = tempfile::tempdir().unwrap();
        let rt = sh(ECHO_AGENT);
        let mut conn = rt
            .connect(&SessionSpec::new("Agent", "sys", dir.path()))
            .await
            .unwrap();

        assert!(conn.next_event().await.unwrap().is_none());
        conn.send("task").await.unwrap();
        let first = conn.next_event().await.unwrap().unwrap();
        assert_eq!(first, SessionEvent::text("hello from agent"));
        let second = conn.next_event().await.unwrap().unwrap();
        assert!(second.is_terminal());
        assert!(conn.next_event().await.unwrap().is_none());
        conn.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn premature_exit_is_stream_ended() {
        let dir = tempfile::tempdir().unwrap();
        let rt = sh("read init\nread msg\nexit 0\n");
        let mut conn = rt
            .connect(&SessionSpec::new("Agent", "", dir.path()))
            .await
            .unwrap();
        conn.send("task").await.unwrap();
        assert!(matches!(
            conn.next_event().await,
            Err(RuntimeError::StreamEnded { .. })
        ));
        conn.disconnect().await.unwrap();
    }

    // Fails the first exchange with an error frame but still finishes it
    // with a result frame, then answers the second message normally.
    const FAILING_THEN_OK_AGENT: &str = r#"read init
read msg
echo '{"type":"error","message":"tool crashed"}'
echo '{"type":"result","num_turns":9,"duration_ms":1,"duration_api_ms":1,"total_cost_usd":0.0}'
read msg
echo '{"type":"assistant","content":[{"type":"text","text":"second answer"}]}'
echo '{"type":"result","num_turns":1,"duration_ms":2,"duration_api_ms":1,"total_cost_usd":0.0}'
read rest
exit 0
"#;

    async fn second_exchange_after_failure(rt: ProcessRuntime) {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = rt
            .connect(&SessionSpec::new("Agent", "", dir.path()))
            .await
            .unwrap();

        conn.send("first").await.unwrap();
        assert!(matches!(
            conn.next_event().await,
            Err(RuntimeError::Protocol(ref m)) if m == "tool crashed"
        ));
        assert!(conn.next_event().await.unwrap().is_none());

        conn.send("second").await.unwrap();
        let first = conn.next_event().await.unwrap().unwrap();
        assert_eq!(first, SessionEvent::text("second answer"));
        let last = conn.next_event().await.unwrap().unwrap();
        assert!(matches!(last, SessionEvent::Statistics(ref s) if s.num_turns == 1));
        assert!(conn.next_event().await.unwrap().is_none());
        conn.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn leftover_frames_of_failed_exchange_are_discarded() {
        second_exchange_after_failure(sh(FAILING_THEN_OK_AGENT)).await;
    }

    #[tokio::test]
    async fn silent_agent_after_failure_does_not_block_next_exchange() {
        let script = FAILING_THEN_OK_AGENT.replacen(
            "echo '{\"type\":\"result\",\"num_turns\":9,\"duration_ms\":1,\"duration_api_ms\":1,\"total_cost_usd\":0.0}'\n",
            "",
            1,
        );
        assert!(!script.contains("\"num_turns\":9"));
        let rt = ProcessRuntime::new("sh", vec!["-c".into(), script])
            .with_shutdown_grace(Duration::from_millis(300));
        second_exchange_after_failure(rt).await;
    }

    #[tokio::test]
    async fn missing_program_fails_to_connect() {
        let dir = tempfile::tempdir().unwrap();
        let rt = ProcessRuntime::new("/definitely/not/a/real/agent", Vec::new());
        let err = rt
            .connect(&SessionSpec::new("Agent", "", dir.path()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RuntimeError::Connect { ref identity, .. } if identity == "Agent"));
    }

    #[tokio::test]
    async fn stuck_process_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let rt = ProcessRuntime::new("sh", vec!["-c".into(), "exec sleep 30".into()])
            .with_shutdown_grace(Duration::from_millis(100));
        let mut conn = rt
            .connect(&SessionSpec::new("Agent", "", dir.path()))
            .await
            .unwrap();
        conn.disconnect().await.unwrap();
    }
}
