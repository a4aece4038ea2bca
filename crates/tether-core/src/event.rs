//! Typed events decoded from the agent's transcript log.

use serde::{Deserialize, Serialize};

/// Outcome of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// Tool completed normally.
    Ok,
    /// Tool reported an error.
    Failed,
}

/// One logical event derived from a transcript record.
///
/// `tool_id` correlates a `ToolStart` with its later `ToolResult`;
/// ids are assumed unique within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Assistant prose intended for the user.
    Narration { text: String },
    /// A tool invocation has started.
    ToolStart {
        tool_id: String,
        tool_name: String,
        args_summary: String,
    },
    /// A tool invocation finished.
    ToolResult {
        tool_id: String,
        status: ToolStatus,
        summary: String,
    },
    /// Internal reasoning block (not shown to users by default).
    Reasoning { text: String },
}

impl AgentEvent {
    /// Whether this event is plain narration text.
    #[must_use]
    pub const fn is_narration(&self) -> bool {
        matches!(self, Self::Narration { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagged_serialization() {
        let event = AgentEvent::ToolStart {
            tool_id: "toolu_01".into(),
            tool_name: "Bash".into(),
            args_summary: "ls -la".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"tool_start\""));

        let back: AgentEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_tool_status_snake_case() {
        let json = serde_json::to_string(&ToolStatus::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
    }
}
