//! tmux-backed terminal channel and prompt detection.
//!
//! `Tmux` implements [`tether_core::TerminalChannel`] by shelling out
//! to the tmux binary; the `detect` module turns captured buffers into
//! [`tether_core::Prompt`] values with pure pattern matching.

pub mod detect;
pub mod tmux;

pub use detect::{PromptTransition, PromptWatch, detect_idle_prompt, detect_prompt, detect_status};
pub use tmux::{Tmux, sanitize_window_name};
