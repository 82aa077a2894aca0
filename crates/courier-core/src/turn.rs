use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::{ToolCall, ToolOutcome};

/// One atomic unit of conversation content. Immutable once appended to a
/// session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Tool calls requested by the assistant in this turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Tool results carried by a `Role::Tool` turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolOutcome>,
    /// Marks a turn produced from a provider or tool failure. Rendered
    /// distinctly from a normal answer.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Turn {
    /// Create a plain text turn.
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: vec![],
            tool_results: vec![],
            is_error: false,
        }
    }

    /// Create a turn carrying tool results back to the model.
    pub fn tool_results(results: Vec<ToolOutcome>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Tool,
            content: String::new(),
            timestamp: Utc::now(),
            tool_calls: vec![],
            tool_results: results,
            is_error: false,
        }
    }

    /// Create a clearly marked error turn, distinct from a normal answer.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: format!("[error] {}", content.into()),
            timestamp: Utc::now(),
            tool_calls: vec![],
            tool_results: vec![],
            is_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_turn_roundtrips_through_json() {
        let turn = Turn::text(Role::User, "hello");
        let json = serde_json::to_string(&turn).unwrap();
        let back: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content, "hello");
        assert_eq!(back.role, Role::User);
        assert!(!back.is_error);
    }

    #[test]
    fn error_turn_is_marked() {
        let turn = Turn::error("provider unavailable");
        assert!(turn.is_error);
        assert!(turn.content.starts_with("[error]"));
    }

    #[test]
    fn empty_tool_fields_are_omitted_from_json() {
        let json = serde_json::to_string(&Turn::text(Role::User, "x")).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("is_error"));
    }
}
