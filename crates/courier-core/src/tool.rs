use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The single capability a tool is polymorphic over. Every capability
/// carries its own mandatory security policy in the sandbox — there is no
/// "unrestricted" capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Shell,
    Filesystem,
    Web,
    SubAgent,
}

/// Description of a tool the agent may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique name, e.g. "shell", "file_read", "web_fetch".
    pub name: String,
    /// Human-readable description for the model.
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: Value,
    /// The capability this tool executes under.
    pub capability: Capability,
}

/// A request from the model to call a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// The result of executing (or refusing) a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}
