//! Agent announce map.
//!
//! The agent cannot be asked for its session id over the terminal, so a
//! start hook running inside the window writes it to a side-channel file
//! `<state_dir>/session_map.json`, keyed by `"tmux_session:window"`. The
//! hook process and the bridge share nothing but this file, so both sides
//! use an advisory lock on a sibling `.lock` file plus atomic temp-file
//! replacement. A missing or unreadable map reads as empty.

use std::collections::{HashMap, HashSet};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt as _;
use serde::{Deserialize, Serialize};
use tether_core::SurfaceId;
use tokio::time::Instant;
use tracing::{debug, info};

/// One announced agent session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceEntry {
    /// Agent-reported session id (UUID).
    pub session_id: String,
    /// Working directory the agent reported.
    #[serde(default)]
    pub cwd: PathBuf,
}

/// Reader/writer for the announce map file.
#[derive(Debug, Clone)]
pub struct SessionMap {
    map_path: PathBuf,
    lock_path: PathBuf,
}

impl SessionMap {
    /// Announce map rooted under `state_dir`.
    #[must_use]
    pub fn new(state_dir: &Path) -> Self {
        Self {
            map_path: state_dir.join("session_map.json"),
            lock_path: state_dir.join("session_map.lock"),
        }
    }

    /// Record an announcement for a surface. This is the hook half; the
    /// bridge itself only calls it from tests and tooling.
    ///
    /// # Errors
    /// Returns an error when the map cannot be locked or written.
    pub async fn write_entry(
        &self,
        surface: &SurfaceId,
        entry: AnnounceEntry,
    ) -> std::io::Result<()> {
        let key = surface.target();
        let map_path = self.map_path.clone();
        let lock_path = self.lock_path.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = map_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let lock = std::fs::File::create(&lock_path)?;
            lock.lock_exclusive()?;
            let mut map = read_map_sync(&map_path);
            map.insert(key, entry);
            write_map_sync(&map_path, &map)
        })
        .await
        .map_err(std::io::Error::other)?
    }

    /// Snapshot of the whole map. Missing or unreadable files read as
    /// empty; announcement loss is recoverable, refusing to start is not.
    pub async fn read_map(&self) -> HashMap<String, AnnounceEntry> {
        let map_path = self.map_path.clone();
        let lock_path = self.lock_path.clone();
        tokio::task::spawn_blocking(move || {
            match std::fs::File::create(&lock_path) {
                Ok(lock) => {
                    if let Err(err) = lock.lock_shared() {
                        debug!(error = %err, "announce map read lock failed, reading unlocked");
                    }
                    read_map_sync(&map_path)
                }
                // Lock file unavailable (read-only fs); read without it.
                Err(_) => read_map_sync(&map_path),
            }
        })
        .await
        .unwrap_or_default()
    }

    /// The announced session id for a surface, if one is present and
    /// UUID-shaped.
    pub async fn agent_id_for(&self, surface: &SurfaceId) -> Option<String> {
        let map = self.read_map().await;
        let entry = map.get(&surface.target())?;
        if uuid::Uuid::parse_str(&entry.session_id).is_ok() {
            Some(entry.session_id.clone())
        } else {
            debug!(surface = %surface, "announce entry is not a UUID, ignoring");
            None
        }
    }

    /// Poll until the surface announces a UUID-shaped session id or the
    /// budget runs out. The hook usually fires within a couple of seconds
    /// of the agent starting; the first check is deliberately delayed one
    /// poll interval.
    pub async fn wait_for_agent_id(
        &self,
        surface: &SurfaceId,
        timeout: Duration,
        poll: Duration,
    ) -> Option<String> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            tokio::time::sleep(poll).await;
            if let Some(id) = self.agent_id_for(surface).await {
                info!(surface = %surface, agent_session_id = %id, "agent announced session id");
                return Some(id);
            }
        }
        None
    }

    /// Drop entries whose window is no longer alive. Returns the number of
    /// removed entries.
    ///
    /// # Errors
    /// Returns an error when the pruned map cannot be written back.
    pub async fn prune(&self, live_windows: &HashSet<String>) -> std::io::Result<usize> {
        let live = live_windows.clone();
        let map_path = self.map_path.clone();
        let lock_path = self.lock_path.clone();
        tokio::task::spawn_blocking(move || {
            let lock = std::fs::File::create(&lock_path)?;
            lock.lock_exclusive()?;
            let mut map = read_map_sync(&map_path);
            let before = map.len();
            map.retain(|key, _| {
                // Keys are "session:window"; compare on the window part.
                let window = key.split_once(':').map_or(key.as_str(), |(_, w)| w);
                live.contains(window)
            });
            let removed = before - map.len();
            if removed > 0 {
                write_map_sync(&map_path, &map)?;
                info!(removed, "pruned stale announce map entries");
            }
            Ok(removed)
        })
        .await
        .map_err(std::io::Error::other)?
    }
}

fn read_map_sync(path: &Path) -> HashMap<String, AnnounceEntry> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => HashMap::new(),
    }
}

fn write_map_sync(path: &Path, map: &HashMap<String, AnnounceEntry>) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(map).map_err(std::io::Error::other)?;
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
