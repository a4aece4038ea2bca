//! Prompt and status detection over captured terminal buffers.
//!
//! Everything here is a pure function of the snapshot text so it can be
//! pinned against literal captured fixtures. The polling task that
//! feeds snapshots lives with the session supervisor, not here.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::LazyLock;

use regex::Regex;

use tether_core::{Prompt, PromptChoice};

/// Spinner glyphs the agent CLI animates while working.
const SPINNER_CHARS: [char; 14] = [
    '·', '✻', '✽', '✶', '⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏',
];

/// Markers of the plan-review screen.
const PLAN_MARKERS: [&str; 3] = ["Here is Claude's plan", "Ready to code", "Plan mode"];

/// Phrasings of a tool permission request.
const PERMISSION_MARKERS: [&str; 4] = ["Do you want", "Would you like to", "[y/n]", "(y/n)"];

/// Checkbox option line: optional selection arrow, a checkbox glyph,
/// then the label.
static CHECKBOX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[←❯>]?\s*([☐✔☒])\s+(.+)").expect("checkbox regex"));

/// Numbered option line: `1. label` or `1) label`.
static NUMBERED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[❯>]?\s*(\d+)[.)]\s+(.+)").expect("numbered regex"));

/// Drop the border glyphs tmux captures around boxed dialog lines.
fn strip_box(line: &str) -> &str {
    line.trim_matches(|c: char| c.is_whitespace() || c == '│' || c == '║')
}

fn checkbox_choices(buffer: &str) -> Vec<PromptChoice> {
    let mut choices = Vec::new();
    for line in buffer.lines() {
        if let Some(caps) = CHECKBOX_RE.captures(strip_box(line)) {
            choices.push(PromptChoice::new(choices.len(), caps[2].trim()));
        }
    }
    choices
}

fn numbered_choices(buffer: &str) -> Vec<PromptChoice> {
    let mut choices = Vec::new();
    for line in buffer.lines() {
        if let Some(caps) = NUMBERED_RE.captures(strip_box(line)) {
            choices.push(PromptChoice::new(choices.len(), caps[2].trim()));
        }
    }
    choices
}

fn contains_marker(buffer: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| buffer.contains(m))
}

/// Classify the interactive prompt currently on screen, if any.
///
/// Checked most-specific first: the plan screen also phrases a
/// proceed question and carries numbered options, so it must win over
/// the permission signature; checkbox questions are unambiguous.
#[must_use]
pub fn detect_prompt(buffer: &str) -> Option<Prompt> {
    if buffer.trim().is_empty() {
        return None;
    }

    if contains_marker(buffer, &PLAN_MARKERS) && buffer.contains("proceed") {
        return Some(Prompt::PlanApproval);
    }

    let checkboxes = checkbox_choices(buffer);
    if !checkboxes.is_empty() {
        return Some(Prompt::Question { choices: checkboxes });
    }

    if contains_marker(buffer, &PERMISSION_MARKERS) {
        let options = numbered_choices(buffer);
        if !options.is_empty() {
            return Some(Prompt::Permission { options });
        }
    }

    None
}

/// Extract the transient working-status line (spinner + text) from the
/// last three lines of the snapshot.
#[must_use]
pub fn detect_status(buffer: &str) -> Option<String> {
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lines: Vec<&str> = trimmed.lines().collect();
    let tail = &lines[lines.len().saturating_sub(3)..];
    for line in tail {
        if line.chars().any(|c| SPINNER_CHARS.contains(&c)) {
            return Some(line.trim().to_string());
        }
    }
    None
}

/// Whether the agent's idle input prompt is showing in the last three
/// lines: a line that is exactly `>`, or a short line ending in `>`.
#[must_use]
pub fn detect_idle_prompt(buffer: &str) -> bool {
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return false;
    }
    let lines: Vec<&str> = trimmed.lines().collect();
    let tail = &lines[lines.len().saturating_sub(3)..];
    tail.iter().any(|line| {
        let s = line.trim();
        s == ">" || (s.ends_with('>') && s.chars().count() < 20)
    })
}

/// Transition produced by [`PromptWatch::observe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptTransition {
    /// A prompt appeared, or its content changed.
    Raised(Prompt),
    /// The previously raised prompt left the screen.
    Cleared,
}

/// Deduplicating state machine over repeated scans.
///
/// Emits one `Raised` per distinct prompt (kind + content fingerprint)
/// and one `Cleared` when the screen returns to normal, no matter how
/// many polls observe the same state in between.
#[derive(Debug, Default)]
pub struct PromptWatch {
    active: Option<u64>,
}

impl PromptWatch {
    /// Create a watch with no active prompt.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the latest scan result; returns the transition to report,
    /// if any.
    pub fn observe(&mut self, current: Option<Prompt>) -> Option<PromptTransition> {
        match current {
            Some(prompt) => {
                let print = fingerprint(&prompt);
                if self.active == Some(print) {
                    return None;
                }
                self.active = Some(print);
                Some(PromptTransition::Raised(prompt))
            }
            None => {
                if self.active.take().is_some() {
                    Some(PromptTransition::Cleared)
                } else {
                    None
                }
            }
        }
    }

    /// Forget the active prompt (after the user answered out-of-band).
    pub fn reset(&mut self) {
        self.active = None;
    }
}

fn fingerprint(prompt: &Prompt) -> u64 {
    let mut hasher = DefaultHasher::new();
    prompt.kind().hash(&mut hasher);
    match prompt {
        Prompt::Permission { options } | Prompt::Question { choices: options } => {
            for choice in options {
                choice.label.hash(&mut hasher);
            }
        }
        Prompt::PlanApproval => {}
    }
    hasher.finish()
}
