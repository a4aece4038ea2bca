//! Interactive prompts detected on the terminal surface.

use serde::{Deserialize, Serialize};

/// One selectable option shown by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptChoice {
    /// Zero-based position in the on-screen list.
    pub index: usize,
    /// Option label as rendered.
    pub label: String,
}

impl PromptChoice {
    /// Create a choice.
    pub fn new(index: usize, label: impl Into<String>) -> Self {
        Self {
            index,
            label: label.into(),
        }
    }
}

/// A prompt currently blocking the agent, awaiting a user decision.
///
/// Derived from terminal-buffer pattern matching, never from the log.
/// Recomputed on every scan; `None` (no prompt) is modelled as the
/// absence of a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prompt {
    /// Tool permission request with its numbered options.
    Permission { options: Vec<PromptChoice> },
    /// Multiple-choice question from the agent.
    Question { choices: Vec<PromptChoice> },
    /// Plan review awaiting approval.
    PlanApproval,
}

impl Prompt {
    /// Short name for logging and dedup fingerprints.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Permission { .. } => "permission",
            Self::Question { .. } => "question",
            Self::PlanApproval => "plan_approval",
        }
    }
}
