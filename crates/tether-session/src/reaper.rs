//! Dead-surface sweeper.
//!
//! Windows disappear outside the bridge's control: a user kills one by
//! hand, the tmux server restarts, the host reboots. The reaper brings
//! the registry back in line with reality so chats are told their
//! session died instead of going silent.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tether_core::{Notifier, SessionNotice, TerminalChannel};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::registry::SessionRegistry;
use crate::session_map::SessionMap;

/// Periodic liveness sweep over the registry.
pub struct Reaper {
    registry: Arc<SessionRegistry>,
    channel: Arc<dyn TerminalChannel>,
    notifier: Arc<dyn Notifier>,
    session_map: SessionMap,
    interval: Duration,
}

impl Reaper {
    /// Wire up a reaper from its collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        channel: Arc<dyn TerminalChannel>,
        notifier: Arc<dyn Notifier>,
        session_map: SessionMap,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            channel,
            notifier,
            session_map,
            interval,
        }
    }

    /// Sweep until `shutdown` fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
        debug!("reaper stopped");
    }

    /// Retire every session whose surface no longer exists and notify
    /// its route. Idempotent: a sweep after retirement finds nothing.
    /// Returns the number of sessions retired.
    pub async fn sweep(&self) -> usize {
        let sessions = self.registry.list_active().await;
        if sessions.is_empty() {
            return 0;
        }
        let checks = sessions
            .iter()
            .map(|session| self.channel.exists(&session.surface));
        let alive = futures::future::join_all(checks).await;

        let mut retired = 0;
        for (session, alive) in sessions.iter().zip(&alive) {
            if *alive {
                continue;
            }
            match self.registry.stop(session.route.clone()).await {
                Ok(Some(_)) => {
                    retired += 1;
                    warn!(
                        route = %session.route,
                        surface = %session.surface,
                        "surface disappeared, session retired"
                    );
                    self.notifier
                        .notify(&session.route, SessionNotice::Crashed)
                        .await;
                }
                // Someone else retired it between listing and now.
                Ok(None) => {}
                Err(err) => {
                    error!(route = %session.route, error = %err, "failed to retire dead session");
                }
            }
        }

        if retired > 0 {
            let live: HashSet<String> = sessions
                .iter()
                .zip(&alive)
                .filter(|(_, alive)| **alive)
                .map(|(session, _)| session.surface.window.clone())
                .collect();
            if let Err(err) = self.session_map.prune(&live).await {
                warn!(error = %err, "could not prune announce map");
            }
        }
        retired
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tempfile::TempDir;
    use tether_core::{ChannelError, RouteKey, SurfaceId};

    use crate::session_map::AnnounceEntry;

    use super::*;

    /// Liveness-only channel double; windows listed in `dead` are gone.
    #[derive(Default)]
    struct FlakyChannel {
        dead: StdMutex<Vec<String>>,
    }

    impl FlakyChannel {
        fn kill_window(&self, window: &str) {
            self.dead.lock().unwrap().push(window.to_string());
        }
    }

    #[async_trait]
    impl TerminalChannel for FlakyChannel {
        async fn allocate(
            &self,
            base_name: &str,
            _working_dir: &Path,
        ) -> Result<SurfaceId, ChannelError> {
            Ok(SurfaceId::new("tether", base_name))
        }

        async fn kill(&self, _surface: &SurfaceId) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn send_text(&self, _surface: &SurfaceId, _text: &str) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn send_key(&self, _surface: &SurfaceId, _key: &str) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn capture(&self, _surface: &SurfaceId) -> Result<String, ChannelError> {
            Ok(String::new())
        }

        async fn exists(&self, surface: &SurfaceId) -> bool {
            !self.dead.lock().unwrap().iter().any(|w| w == &surface.window)
        }

        async fn current_command(
            &self,
            _surface: &SurfaceId,
        ) -> Result<Option<String>, ChannelError> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notices: StdMutex<Vec<(RouteKey, SessionNotice)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, route: &RouteKey, notice: SessionNotice) {
            self.notices.lock().unwrap().push((route.clone(), notice));
        }
    }

    const UUID: &str = "0a1b2c3d-4e5f-4a6b-8c7d-9e0f1a2b3c4d";

    async fn seeded() -> (Reaper, Arc<SessionRegistry>, Arc<FlakyChannel>, Arc<RecordingNotifier>, TempDir)
    {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(SessionRegistry::open(dir.path()).await.unwrap());
        let channel = Arc::new(FlakyChannel::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let session_map = SessionMap::new(dir.path());

        for window in ["alpha", "beta"] {
            registry
                .create(
                    RouteKey::new(format!("1:{window}")),
                    SurfaceId::new("tether", window),
                    "/work".into(),
                )
                .await
                .unwrap();
            session_map
                .write_entry(
                    &SurfaceId::new("tether", window),
                    AnnounceEntry {
                        session_id: UUID.to_string(),
                        cwd: "/work".into(),
                    },
                )
                .await
                .unwrap();
        }

        let reaper = Reaper::new(
            Arc::clone(&registry),
            Arc::clone(&channel) as Arc<dyn TerminalChannel>,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            session_map,
            Duration::from_secs(30),
        );
        (reaper, registry, channel, notifier, dir)
    }

    #[tokio::test]
    async fn test_all_surfaces_alive_is_a_noop() {
        let (reaper, registry, _channel, notifier, _dir) = seeded().await;
        assert_eq!(reaper.sweep().await, 0);
        assert_eq!(registry.list_active().await.len(), 2);
        assert!(notifier.notices.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dead_surface_retired_once_with_crashed_notice() {
        let (reaper, registry, channel, notifier, _dir) = seeded().await;
        channel.kill_window("beta");

        assert_eq!(reaper.sweep().await, 1);
        assert_eq!(registry.list_active().await.len(), 1);
        assert!(registry.get(&RouteKey::new("1:beta")).await.is_none());

        // Crashed, not Stopped: the UI offers restart on this path.
        let notices = notifier.notices.lock().unwrap().clone();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].0, RouteKey::new("1:beta"));
        assert_eq!(notices[0].1, SessionNotice::Crashed);

        // A second sweep finds nothing left to do.
        assert_eq!(reaper.sweep().await, 0);
        assert_eq!(notifier.notices.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_prunes_announce_entries_of_dead_windows() {
        let (reaper, _registry, channel, _notifier, dir) = seeded().await;
        channel.kill_window("beta");
        reaper.sweep().await;

        let map = SessionMap::new(dir.path()).read_map().await;
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("tether:alpha"));
    }

    #[tokio::test]
    async fn test_crashed_session_with_agent_id_lands_in_recent() {
        let (reaper, registry, channel, _notifier, _dir) = seeded().await;
        registry
            .bind_agent_id(RouteKey::new("1:beta"), UUID.to_string())
            .await
            .unwrap();
        channel.kill_window("beta");
        reaper.sweep().await;

        let recent = registry.recent().await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].agent_session_id, UUID);
        assert_eq!(recent[0].window, "beta");
    }
}
