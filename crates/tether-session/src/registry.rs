//! Durable registry of live sessions, backed by a single JSON state file.
//!
//! Two writers may race on the file (a second bridge process, the announce
//! hook's sibling map), so every mutation is a read-modify-write cycle under
//! an in-process mutex plus an exclusive advisory lock on a sibling
//! `state.lock` file. Writes land in a pid-suffixed temp file, are fsynced,
//! and are renamed over `state.json`; a crash mid-write never loses
//! committed entries. Reads go through an unlocked in-memory snapshot and
//! may be one mutation stale.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use fs2::FileExt as _;
use serde::{Deserialize, Serialize};
use tether_core::{RouteKey, SurfaceId};
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

/// Retired sessions remembered for the resume affordance.
const MAX_RECENT: usize = 5;

/// Registry failure modes.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("route {0} already has a live session")]
    RouteBound(RouteKey),
    #[error("surface {0} is already bound to a session")]
    SurfaceBound(SurfaceId),
    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A live bridged session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Conversation this session is bound to.
    pub route: RouteKey,
    /// Terminal surface the agent runs in.
    pub surface: SurfaceId,
    /// Agent working directory; also determines the transcript location.
    pub working_dir: PathBuf,
    /// Agent-announced session id, once known.
    #[serde(default)]
    pub agent_session_id: Option<String>,
    /// Byte offset of the next unread transcript record.
    #[serde(default)]
    pub log_offset: u64,
    /// Unix seconds at creation.
    pub created_at: u64,
    /// Unix seconds of the last observed activity.
    pub last_active: u64,
}

/// A retired session that can still be resumed by agent id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentSession {
    /// Agent session id to pass to `--resume`.
    pub agent_session_id: String,
    /// Window name the session ran in.
    pub window: String,
    /// Working directory the session ran in.
    pub working_dir: PathBuf,
    /// Unix seconds when the session was retired.
    pub stopped_at: u64,
}

/// On-disk shape of `state.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    sessions: HashMap<String, Session>,
    #[serde(default)]
    recent: Vec<RecentSession>,
}

/// Durable session registry.
pub struct SessionRegistry {
    state_path: PathBuf,
    lock_path: PathBuf,
    write_gate: Mutex<()>,
    cache: RwLock<StateFile>,
}

impl SessionRegistry {
    /// Open (or initialize) the registry under `state_dir`.
    ///
    /// An unreadable state file is logged and treated as empty rather than
    /// refusing to start; the sessions it described are re-adopted or
    /// reaped through the normal lifecycle.
    ///
    /// # Errors
    /// Returns an error when the state directory cannot be created.
    pub async fn open(state_dir: &Path) -> Result<Self, RegistryError> {
        let dir = state_dir.to_path_buf();
        let state_path = dir.join("state.json");
        let lock_path = dir.join("state.lock");
        let loaded = {
            let path = state_path.clone();
            tokio::task::spawn_blocking(move || -> Result<StateFile, RegistryError> {
                std::fs::create_dir_all(&dir)?;
                Ok(read_state_sync(&path))
            })
            .await
            .map_err(join_to_io)??
        };
        Ok(Self {
            state_path,
            lock_path,
            write_gate: Mutex::new(()),
            cache: RwLock::new(loaded),
        })
    }

    /// Register a new session.
    ///
    /// # Errors
    /// Returns `RouteBound` when the route already has a live session,
    /// `SurfaceBound` when the surface belongs to another session, and `Io`
    /// when persistence fails. Binding conflicts are not retried here.
    pub async fn create(
        &self,
        route: RouteKey,
        surface: SurfaceId,
        working_dir: PathBuf,
    ) -> Result<Session, RegistryError> {
        self.mutate(move |state| {
            if state.sessions.contains_key(route.as_str()) {
                return Err(RegistryError::RouteBound(route));
            }
            if state.sessions.values().any(|session| session.surface == surface) {
                return Err(RegistryError::SurfaceBound(surface));
            }
            let now = now_secs();
            let session = Session {
                route: route.clone(),
                surface,
                working_dir,
                agent_session_id: None,
                log_offset: 0,
                created_at: now,
                last_active: now,
            };
            state.sessions.insert(route.0, session.clone());
            Ok(session)
        })
        .await
    }

    /// Record the agent-announced session id for a route.
    ///
    /// Unknown routes are logged and ignored; the announcement can race a
    /// stop.
    ///
    /// # Errors
    /// Returns an error when persistence fails.
    pub async fn bind_agent_id(
        &self,
        route: RouteKey,
        agent_session_id: String,
    ) -> Result<(), RegistryError> {
        self.mutate(move |state| {
            if let Some(session) = state.sessions.get_mut(route.as_str()) {
                session.agent_session_id = Some(agent_session_id);
                session.last_active = now_secs();
            } else {
                warn!(route = %route, "agent id announced for unknown route");
            }
            Ok(())
        })
        .await
    }

    /// Retire a session. Idempotent; retiring an unknown route yields
    /// `None`. When an agent id was known the session is pushed onto the
    /// recent ring for later resume.
    ///
    /// # Errors
    /// Returns an error when persistence fails.
    pub async fn stop(&self, route: RouteKey) -> Result<Option<Session>, RegistryError> {
        self.mutate(move |state| {
            let Some(session) = state.sessions.remove(route.as_str()) else {
                return Ok(None);
            };
            if let Some(agent_id) = &session.agent_session_id {
                push_recent(
                    &mut state.recent,
                    RecentSession {
                        agent_session_id: agent_id.clone(),
                        window: session.surface.window.clone(),
                        working_dir: session.working_dir.clone(),
                        stopped_at: now_secs(),
                    },
                );
            }
            Ok(Some(session))
        })
        .await
    }

    /// Bump a session's last-active timestamp.
    ///
    /// # Errors
    /// Returns an error when persistence fails.
    pub async fn touch(&self, route: RouteKey) -> Result<(), RegistryError> {
        self.mutate(move |state| {
            if let Some(session) = state.sessions.get_mut(route.as_str()) {
                session.last_active = now_secs();
            }
            Ok(())
        })
        .await
    }

    /// Persist the tailer cursor for a route. A missing route is ignored;
    /// the session may have been retired between poll and persist.
    ///
    /// # Errors
    /// Returns an error when persistence fails.
    pub async fn advance_offset(&self, route: RouteKey, offset: u64) -> Result<(), RegistryError> {
        self.mutate(move |state| {
            if let Some(session) = state.sessions.get_mut(route.as_str()) {
                session.log_offset = offset;
                session.last_active = now_secs();
            }
            Ok(())
        })
        .await
    }

    /// Snapshot read of one session. May be one mutation stale.
    pub async fn get(&self, route: &RouteKey) -> Option<Session> {
        self.cache.read().await.sessions.get(route.as_str()).cloned()
    }

    /// Snapshot of every live session.
    pub async fn list_active(&self) -> Vec<Session> {
        self.cache.read().await.sessions.values().cloned().collect()
    }

    /// Find the session bound to a surface, if any.
    pub async fn find_by_surface(&self, surface: &SurfaceId) -> Option<Session> {
        self.cache
            .read()
            .await
            .sessions
            .values()
            .find(|session| session.surface == *surface)
            .cloned()
    }

    /// Retired sessions, most recent first.
    pub async fn recent(&self) -> Vec<RecentSession> {
        self.cache.read().await.recent.clone()
    }

    /// Run one read-modify-write cycle against the state file and refresh
    /// the snapshot on success. The closure's own errors abort the cycle
    /// without writing.
    async fn mutate<T, F>(&self, f: F) -> Result<T, RegistryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut StateFile) -> Result<T, RegistryError> + Send + 'static,
    {
        let _gate = self.write_gate.lock().await;
        let state_path = self.state_path.clone();
        let lock_path = self.lock_path.clone();
        let (state, out) = tokio::task::spawn_blocking(
            move || -> Result<(StateFile, T), RegistryError> {
                let lock = std::fs::File::create(&lock_path)?;
                lock.lock_exclusive()?;
                let mut state = read_state_sync(&state_path);
                let out = f(&mut state)?;
                write_state_sync(&state_path, &state)?;
                // The advisory lock is released when `lock` drops.
                Ok((state, out))
            },
        )
        .await
        .map_err(join_to_io)??;
        *self.cache.write().await = state;
        Ok(out)
    }
}

fn join_to_io(err: tokio::task::JoinError) -> RegistryError {
    RegistryError::Io(std::io::Error::other(err))
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

fn push_recent(recent: &mut Vec<RecentSession>, entry: RecentSession) {
    recent.retain(|kept| kept.agent_session_id != entry.agent_session_id);
    recent.insert(0, entry);
    recent.truncate(MAX_RECENT);
}

fn read_state_sync(path: &Path) -> StateFile {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return StateFile::default(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "state file unreadable, starting empty");
            return StateFile::default();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(state) => state,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "state file corrupt, starting empty");
            StateFile::default()
        }
    }
}

fn write_state_sync(path: &Path, state: &StateFile) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(state).map_err(std::io::Error::other)?;
    let tmp = path.with_extension(format!("json.tmp.{}", std::process::id()));
    let result = (|| {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}
