//! Identifiers used at the bridge's seams.

use std::fmt;

use serde::{Deserialize, Serialize};

/// External conversation identifier a session is bound to.
///
/// Opaque to the bridge; the chat collaborator decides its shape
/// (for a threaded chat this is typically `"chat_id:thread_id"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteKey(pub String);

impl RouteKey {
    /// Create a route key from any string-like value.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RouteKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Addressable terminal surface: a window inside a named tmux session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId {
    /// tmux session name.
    pub session: String,
    /// tmux window name within the session.
    pub window: String,
}

impl SurfaceId {
    /// Create a surface id.
    pub fn new(session: impl Into<String>, window: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            window: window.into(),
        }
    }

    /// tmux target string (`session:window`).
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}:{}", self.session, self.window)
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session, self.window)
    }
}

/// Opaque reference to a previously delivered chat message.
///
/// Returned by the chat collaborator on send; passing it back turns a
/// send into an update-in-place of that message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageRef(pub String);

impl MessageRef {
    /// Create a message reference.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
