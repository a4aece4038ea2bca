//! Lifecycle notifications exposed to the UI layer.

use serde::{Deserialize, Serialize};

use crate::prompt::Prompt;

/// Session lifecycle notification.
///
/// These are the only session-level signals that cross the boundary to
/// the UI collaborator; raw internal faults never do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionNotice {
    /// Session created and agent launched.
    Created,
    /// Session stopped on user request.
    Stopped,
    /// Surface gone or transcript permanently unreadable; session was
    /// retired.
    Crashed,
    /// Agent process exited but the surface is still alive
    /// (restart affordance applies).
    AgentExited,
    /// The agent is blocked on an interactive prompt.
    DecisionNeeded { prompt: Prompt },
    /// A previously raised prompt is no longer on screen.
    DecisionResolved,
    /// Transient working status (spinner line) changed.
    Status { text: String },
    /// The working status line disappeared.
    StatusCleared,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_tagged_serialization() {
        let notice = SessionNotice::DecisionNeeded {
            prompt: Prompt::PlanApproval,
        };
        let json = serde_json::to_string(&notice).unwrap();
        assert!(json.contains("\"kind\":\"decision_needed\""));
        let back: SessionNotice = serde_json::from_str(&json).unwrap();
        assert_eq!(back, notice);
    }
}
