//! Session lifecycle for the bridge.
//!
//! The durable [`registry::SessionRegistry`] maps chat routes to
//! terminal surfaces and survives process restarts; the
//! [`supervisor::Supervisor`] drives sessions (launch, input, decision
//! keystrokes, transcript and prompt forwarding); the
//! [`reaper::Reaper`] retires sessions whose windows died behind our
//! back; [`session_map::SessionMap`] is the side channel the agent
//! announces its session id through.

pub mod reaper;
pub mod registry;
pub mod session_map;
pub mod supervisor;

pub use reaper::Reaper;
pub use registry::{RecentSession, RegistryError, Session, SessionRegistry};
pub use session_map::{AnnounceEntry, SessionMap};
pub use supervisor::{Supervisor, SupervisorError};
