//! Outbound message sequencing.
//!
//! One FIFO worker per route turns parse-ordered tasks into chat
//! deliveries: adjacent narration merges inside a short window,
//! oversized content splits at line boundaries, tool results edit
//! their tool-start message in place, transient failures retry with
//! backoff while the message holds the queue head.

pub mod queue;
pub mod split;

pub use queue::{Outbox, OutboundTask};
pub use split::split_message;
