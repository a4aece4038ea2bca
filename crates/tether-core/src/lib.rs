//! Core abstractions for bridging a terminal-hosted agent to remote chat.
//!
//! This crate provides the shared vocabulary:
//! - `RouteKey` / `SurfaceId` / `MessageRef` - identifiers at the seams
//! - `AgentEvent` - typed events decoded from the agent transcript
//! - `Prompt` - interactive prompts detected on the terminal
//! - `SessionNotice` - lifecycle notifications for the UI layer
//! - `TerminalChannel` / `ChatSender` / `Notifier` traits
//! - `BridgeConfig` - runtime tunables

pub mod config;
pub mod event;
pub mod ids;
pub mod notice;
pub mod prompt;
pub mod traits;

pub use config::BridgeConfig;
pub use event::{AgentEvent, ToolStatus};
pub use ids::{MessageRef, RouteKey, SurfaceId};
pub use notice::SessionNotice;
pub use prompt::{Prompt, PromptChoice};
pub use traits::{ChannelError, ChatSender, Notifier, SendError, TerminalChannel};
