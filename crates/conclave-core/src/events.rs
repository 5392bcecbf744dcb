use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::ToolCallId;
use crate::stats::SessionStats;

/// One event from a session's output stream. Ordering contract per exchange:
///
/// (AssistantContent | ToolResult)* → Statistics
///
/// Statistics is terminal; the runtime yields nothing further for that exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    AssistantContent { content: Vec<ContentBlock> },
    ToolResult(ToolResultBlock),
    Statistics(SessionStats),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse(ToolUse),
}

/// A tool invocation requested by the assistant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: ToolCallId,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: ToolCallId,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl SessionEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::AssistantContent {
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn tool_use(id: ToolCallId, name: impl Into<String>, arguments: Value) -> Self {
        Self::AssistantContent {
            content: vec![ContentBlock::ToolUse(ToolUse::new(id, name, arguments))],
        }
    }

    pub fn tool_result(tool_use_id: ToolCallId, content: impl Into<String>, is_error: bool) -> Self {
        Self::ToolResult(ToolResultBlock {
            tool_use_id,
            content: content.into(),
            is_error,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Statistics(_))
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AssistantContent { .. } => "assistant_content",
            Self::ToolResult(_) => "tool_result",
            Self::Statistics(_) => "statistics",
        }
    }
}

impl ToolUse {
    /// Non-object `arguments` are wrapped as `{"input": value}`.
    pub fn new(id: ToolCallId, name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };
        Self {
            id,
            name: name.into(),
            arguments,
        }
    }

    pub fn str_argument(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}
