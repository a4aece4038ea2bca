//! Seam traits between the bridge core and its collaborators.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::ids::{MessageRef, RouteKey, SurfaceId};
use crate::notice::SessionNotice;

/// Terminal channel error.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("surface not found: {0}")]
    SurfaceMissing(SurfaceId),
    #[error("multiplexer failure: {0}")]
    Multiplexer(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability wrapper over a terminal multiplexer.
///
/// Implementations guarantee literal, non-interpreted keystroke
/// injection for `send_text`; any neutralization of user-supplied
/// control characters happens upstream.
#[async_trait]
pub trait TerminalChannel: Send + Sync {
    /// Allocate a new surface named after `base_name` (a suffix is
    /// appended on collision) with the given working directory.
    ///
    /// # Errors
    /// Returns [`ChannelError`] if the multiplexer rejects the request.
    async fn allocate(&self, base_name: &str, working_dir: &Path)
    -> Result<SurfaceId, ChannelError>;

    /// Destroy a surface. Missing surfaces are a no-op.
    ///
    /// # Errors
    /// Returns [`ChannelError`] on multiplexer failure.
    async fn kill(&self, surface: &SurfaceId) -> Result<(), ChannelError>;

    /// Send literal text to the surface, without a trailing Enter.
    ///
    /// # Errors
    /// Returns [`ChannelError::SurfaceMissing`] when the surface is gone.
    async fn send_text(&self, surface: &SurfaceId, text: &str) -> Result<(), ChannelError>;

    /// Send a named key (`Enter`, `Escape`, `Up`, `Down`, ...).
    ///
    /// This is the interpreted path, deliberately separate from
    /// `send_text` so literal payloads can never alias key names.
    ///
    /// # Errors
    /// Returns [`ChannelError::SurfaceMissing`] when the surface is gone.
    async fn send_key(&self, surface: &SurfaceId, key: &str) -> Result<(), ChannelError>;

    /// Capture the currently rendered buffer, lines joined with `\n`.
    ///
    /// # Errors
    /// Returns [`ChannelError::SurfaceMissing`] when the surface is gone.
    async fn capture(&self, surface: &SurfaceId) -> Result<String, ChannelError>;

    /// Whether the surface still exists.
    async fn exists(&self, surface: &SurfaceId) -> bool;

    /// Foreground process name of the surface's pane, if any.
    ///
    /// Reports the shell name once the agent exits, which is how agent
    /// death is detected while the surface itself is still alive.
    async fn current_command(&self, surface: &SurfaceId) -> Result<Option<String>, ChannelError>;
}

/// Delivery error reported by the chat collaborator.
#[derive(Debug, Error)]
pub enum SendError {
    /// Retryable: rate limit or a transient network fault.
    #[error("transient send failure (retry_after={retry_after:?})")]
    Transient { retry_after: Option<Duration> },
    /// Message was permanently rejected; retrying cannot help.
    #[error("permanent send failure: {reason}")]
    Permanent { reason: String },
}

impl SendError {
    /// Whether a retry may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Outbound message delivery, implemented by the chat platform layer.
#[async_trait]
pub trait ChatSender: Send + Sync {
    /// Deliver `text` to the route. With `update_of` set, amend that
    /// earlier message in place instead of creating a new one.
    ///
    /// # Errors
    /// Returns [`SendError`] classified transient or permanent.
    async fn send(
        &self,
        route: &RouteKey,
        text: &str,
        update_of: Option<&MessageRef>,
    ) -> Result<MessageRef, SendError>;

    /// Delete a previously delivered message.
    ///
    /// # Errors
    /// Returns [`SendError`] classified transient or permanent.
    async fn delete(&self, route: &RouteKey, message: &MessageRef) -> Result<(), SendError>;
}

/// Lifecycle notification sink, implemented by the UI layer.
///
/// Fire-and-forget: implementations handle their own delivery failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a session notice for the route.
    async fn notify(&self, route: &RouteKey, notice: SessionNotice);
}
