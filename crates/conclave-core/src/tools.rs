use serde::{Deserialize, Serialize};

pub const READ: &str = "Read";
pub const WRITE: &str = "Write";
pub const BASH: &str = "Bash";

/// Host tool through which a primary session delegates to a subordinate.
/// The runtime never executes it; the host answers it via
/// [`SessionConnection::answer_tool`](crate::runtime::SessionConnection::answer_tool).
pub const DELEGATION_TOOL: &str = "communicate_with_agent";

/// Tools that read and mutate the working directory.
pub const FULL_ACCESS: &[&str] = &[READ, WRITE, BASH];

/// Tools that inspect without writing files.
pub const READ_ONLY: &[&str] = &[READ, BASH];

/// Result the host hands back for a host tool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// JSON schema advertised to runtimes for the delegation tool.
pub fn delegation_tool_schema() -> serde_json::Value {
    serde_json::json!({
        "name": DELEGATION_TOOL,
        "description": "Communicate with a team member (other agent)",
        "parameters": {
            "type": "object",
            "required": ["agent_id", "message"],
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Identity of the team member to address"
                },
                "message": {
                    "type": "string",
                    "description": "Message to send; the call returns their full response"
                }
            }
        }
    })
}
