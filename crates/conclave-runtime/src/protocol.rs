//! Wire frames exchanged with an agent process, one JSON object per line.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use conclave_core::{
    ContentBlock, RuntimeError, SessionEvent, SessionSpec, SessionStats, ToolCallId,
    ToolResultBlock,
};

/// Frames written to the agent's stdin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// First frame of every process: the session definition plus the host
    /// tools the agent may call back into.
    Session {
        spec: SessionSpec,
        host_tools: Vec<Value>,
    },
    User {
        message: String,
    },
    ToolResponse {
        tool_use_id: ToolCallId,
        content: String,
        is_error: bool,
    },
}

/// Frames read from the agent's stdout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Assistant { content: Vec<ContentBlock> },
    ToolResult(ToolResultBlock),
    Result(SessionStats),
    Error { message: String },
}

impl InboundFrame {
    /// `Error` frames have no event form; they end the exchange as a failure.
    pub fn into_event(self) -> Result<SessionEvent, RuntimeError> {
        match self {
            Self::Assistant { content } => Ok(SessionEvent::AssistantContent { content }),
            Self::ToolResult(block) => Ok(SessionEvent::ToolResult(block)),
            Self::Result(stats) => Ok(SessionEvent::Statistics(stats)),
            Self::Error { message } => Err(RuntimeError::Protocol(message)),
        }
    }
}

pub fn encode_frame(frame: &OutboundFrame) -> Result<String, RuntimeError> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}

/// Blank lines decode to `None`.
pub fn decode_line(line: &str) -> Result<Option<InboundFrame>, RuntimeError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| RuntimeError::Protocol(format!("bad frame: {e}: {trimmed}")))
}
