//! Crash-safe tailing of the agent's append-only transcript.
//!
//! `LogTailer` keeps a byte cursor that only ever rests on a record
//! boundary; `protocol` decodes the JSONL records it yields into
//! [`tether_core::AgentEvent`] values.

pub mod protocol;
pub mod tailer;

pub use protocol::{ParseError, parse_line};
pub use tailer::{LogTailer, TailError, munge_working_dir, resolve_log_path};
