//! Headless bridge daemon.
//!
//! Runs the full session pipeline against a real tmux server but logs
//! outbound chat traffic instead of delivering it to a platform, so the
//! bridge can be exercised without any chat credentials:
//!
//!   cargo run -p daemon-demo [WORKING_DIR]
//!
//! With a WORKING_DIR argument it starts one session on the `demo`
//! route; without it it only adopts sessions persisted by an earlier
//! run. Ctrl-C detaches: agent windows keep running and the next run
//! picks them up again.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tether_core::{
    BridgeConfig, ChatSender, MessageRef, Notifier, RouteKey, SendError, SessionNotice,
    TerminalChannel,
};
use tether_outbox::Outbox;
use tether_session::{Reaper, SessionMap, SessionRegistry, Supervisor};
use tether_term::Tmux;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Chat backend that logs deliveries and hands out synthetic refs.
#[derive(Default)]
struct LoggingSender {
    next_id: AtomicU64,
}

#[async_trait]
impl ChatSender for LoggingSender {
    async fn send(
        &self,
        route: &RouteKey,
        text: &str,
        update_of: Option<&MessageRef>,
    ) -> Result<MessageRef, SendError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        match update_of {
            Some(original) => info!(route = %route, original = %original, text, "chat edit"),
            None => info!(route = %route, text, "chat message"),
        }
        Ok(MessageRef::new(format!("demo-{id}")))
    }

    async fn delete(&self, route: &RouteKey, message: &MessageRef) -> Result<(), SendError> {
        info!(route = %route, message = %message, "chat delete");
        Ok(())
    }
}

struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, route: &RouteKey, notice: SessionNotice) {
        info!(route = %route, notice = ?notice, "session notice");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = BridgeConfig::from_env();
    info!(
        tmux_session = %config.tmux_session,
        state_dir = %config.state_dir.display(),
        "bridge starting"
    );

    let channel: Arc<dyn TerminalChannel> = Arc::new(Tmux::new(config.tmux_session.clone()).await?);
    let registry = Arc::new(SessionRegistry::open(&config.state_dir).await?);
    let notifier: Arc<dyn Notifier> = Arc::new(LoggingNotifier);
    let outbox = Arc::new(Outbox::new(Arc::new(LoggingSender::default()), &config));
    let session_map = SessionMap::new(&config.state_dir);

    let supervisor = Arc::new(Supervisor::new(
        config.clone(),
        Arc::clone(&channel),
        Arc::clone(&registry),
        outbox,
        Arc::clone(&notifier),
    ));

    let adopted = supervisor.adopt_running().await;
    info!(adopted, "adopted sessions from previous run");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = Reaper::new(
        Arc::clone(&registry),
        channel,
        notifier,
        session_map,
        config.reap_interval,
    );
    let reaper_task = tokio::spawn(reaper.run(shutdown_rx));

    if let Some(dir) = std::env::args().nth(1) {
        let route = RouteKey::new("demo");
        if registry.get(&route).await.is_none() {
            let session = supervisor.start(route, PathBuf::from(dir)).await?;
            info!(surface = %session.surface, "demo session started");
        } else {
            info!("demo route already has a session, skipping start");
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("detaching; agent windows keep running");
    let _ = shutdown_tx.send(true);
    reaper_task.abort();
    supervisor.detach_all().await;
    Ok(())
}
