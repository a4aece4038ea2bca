//! Session supervisor.
//!
//! Owns the inbound command surface (start/stop/attach, user input,
//! decision keystrokes) and the two per-session background tasks: the
//! transcript tail loop and the terminal scan loop. Collaborators are
//! injected; the supervisor itself never talks to a concrete chat
//! platform or multiplexer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tether_core::{
    AgentEvent, BridgeConfig, ChannelError, Notifier, RouteKey, SessionNotice, SurfaceId,
    TerminalChannel, ToolStatus,
};
use tether_outbox::{Outbox, OutboundTask};
use tether_tail::{LogTailer, ParseError, parse_line, resolve_log_path};
use tether_term::{PromptTransition, PromptWatch, detect_idle_prompt, detect_prompt, detect_status};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::registry::{RegistryError, Session, SessionRegistry};
use crate::session_map::SessionMap;

/// Pause between pasting text into the agent composer and pressing
/// Enter; without it the submit races the paste.
const COMPOSER_PAUSE: Duration = Duration::from_millis(500);
/// Pause after Escape before `/exit`, letting the TUI drop any modal.
const ESCAPE_PAUSE: Duration = Duration::from_millis(500);
/// Grace period for the agent to exit cleanly after `/exit`.
const EXIT_GRACE: Duration = Duration::from_secs(1);
/// Pause between successive decision keystrokes so the TUI repaints.
const KEY_PAUSE: Duration = Duration::from_millis(100);

/// Foreground commands that mean the agent is no longer running in the
/// window.
const SHELLS: [&str; 4] = ["bash", "zsh", "fish", "sh"];
/// Consecutive transcript poll failures after which the log is treated
/// as permanently unreadable and the session is retired.
const TAIL_FAULT_LIMIT: u32 = 5;

/// Supervisor failure modes.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("terminal error: {0}")]
    Channel(#[from] ChannelError),
    #[error("no session for route {0}")]
    NoSession(RouteKey),
    #[error("command {0} is blocked for bridged sessions")]
    BlockedCommand(String),
}

/// Handles for one session's background tasks.
struct SessionTasks {
    shutdown: watch::Sender<bool>,
    tailer: Option<JoinHandle<()>>,
    scanner: JoinHandle<()>,
}

/// Scan-loop state that outlives the scan task itself, so a respawn
/// (agent relaunch in the same session) does not re-raise a prompt or
/// status that was already notified.
#[derive(Default)]
struct ScanState {
    watch: PromptWatch,
    status: Option<String>,
    agent_exited: bool,
}

/// Session orchestrator. One per bridge process.
pub struct Supervisor {
    config: BridgeConfig,
    channel: Arc<dyn TerminalChannel>,
    registry: Arc<SessionRegistry>,
    outbox: Arc<Outbox>,
    notifier: Arc<dyn Notifier>,
    session_map: SessionMap,
    tasks: Mutex<HashMap<RouteKey, SessionTasks>>,
    scan_states: Mutex<HashMap<RouteKey, Arc<Mutex<ScanState>>>>,
}

impl Supervisor {
    /// Wire up a supervisor from its collaborators.
    #[must_use]
    pub fn new(
        config: BridgeConfig,
        channel: Arc<dyn TerminalChannel>,
        registry: Arc<SessionRegistry>,
        outbox: Arc<Outbox>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let session_map = SessionMap::new(&config.state_dir);
        Self {
            config,
            channel,
            registry,
            outbox,
            notifier,
            session_map,
            tasks: Mutex::new(HashMap::new()),
            scan_states: Mutex::new(HashMap::new()),
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Create a session for a route: allocate a window, launch the
    /// agent, bind its announced session id, and spawn the forwarding
    /// tasks.
    ///
    /// A missing announcement is not fatal: the session stays usable for
    /// input and prompt scanning, transcript forwarding stays off until
    /// a restart binds an id.
    ///
    /// # Errors
    /// Returns registry conflicts (`RouteBound`, `SurfaceBound`) and
    /// terminal failures. On failure the freshly allocated window is
    /// cleaned up.
    pub async fn start(
        &self,
        route: RouteKey,
        working_dir: PathBuf,
    ) -> Result<Session, SupervisorError> {
        let surface = self.channel.allocate(route.as_str(), &working_dir).await?;
        if let Err(err) = self
            .registry
            .create(route.clone(), surface.clone(), working_dir)
            .await
        {
            // The window was allocated for this attempt only; no live
            // session owns it.
            let _ = self.channel.kill(&surface).await;
            return Err(err.into());
        }
        self.reset_scan_state(&route).await;
        info!(route = %route, surface = %surface, "session created");

        if let Err(err) = self.send_line(&surface, &self.config.agent_command).await {
            let _ = self.channel.kill(&surface).await;
            let _ = self.registry.stop(route.clone()).await;
            return Err(err.into());
        }
        self.await_announce(&route, &surface).await;

        let session = self
            .registry
            .get(&route)
            .await
            .ok_or_else(|| SupervisorError::NoSession(route.clone()))?;
        self.spawn_tasks(session.clone(), true).await;
        self.notifier.notify(&route, SessionNotice::Created).await;
        Ok(session)
    }

    /// Resume a previously stopped agent session in a fresh window.
    ///
    /// The relaunched agent usually announces a new session id; when the
    /// announcement never lands the requested id is bound instead.
    ///
    /// # Errors
    /// Same failure modes as [`Supervisor::start`].
    pub async fn attach(
        &self,
        route: RouteKey,
        working_dir: PathBuf,
        agent_session_id: String,
    ) -> Result<Session, SupervisorError> {
        let surface = self.channel.allocate(route.as_str(), &working_dir).await?;
        if let Err(err) = self
            .registry
            .create(route.clone(), surface.clone(), working_dir)
            .await
        {
            let _ = self.channel.kill(&surface).await;
            return Err(err.into());
        }
        self.reset_scan_state(&route).await;
        info!(route = %route, surface = %surface, resume = %agent_session_id, "session resumed");

        let relaunch = format!("{} --resume {agent_session_id}", self.config.agent_command);
        if let Err(err) = self.send_line(&surface, &relaunch).await {
            let _ = self.channel.kill(&surface).await;
            let _ = self.registry.stop(route.clone()).await;
            return Err(err.into());
        }

        let announced = self
            .session_map
            .wait_for_agent_id(
                &surface,
                self.config.announce_timeout,
                self.config.announce_poll,
            )
            .await
            .unwrap_or(agent_session_id);
        self.registry.bind_agent_id(route.clone(), announced).await?;

        let session = self
            .registry
            .get(&route)
            .await
            .ok_or_else(|| SupervisorError::NoSession(route.clone()))?;
        self.spawn_tasks(session.clone(), true).await;
        self.notifier.notify(&route, SessionNotice::Created).await;
        Ok(session)
    }

    /// Stop a session: cancel its tasks, ask the agent to exit, destroy
    /// the window, and retire the registry entry. Idempotent; only the
    /// call that actually retires the entry notifies `Stopped`.
    ///
    /// # Errors
    /// Returns an error when the registry cannot be updated. Terminal
    /// failures during teardown are logged and swallowed; the window may
    /// already be gone.
    pub async fn stop(&self, route: RouteKey) -> Result<Option<Session>, SupervisorError> {
        self.cancel_tasks(&route).await;
        self.outbox.shutdown_route(&route).await;
        self.scan_states.lock().await.remove(&route);

        if let Some(session) = self.registry.get(&route).await {
            if let Err(err) = self.quit_agent(&session.surface).await {
                warn!(route = %route, error = %err, "graceful agent exit failed");
            }
            if let Err(err) = self.channel.kill(&session.surface).await {
                warn!(route = %route, error = %err, "window kill failed");
            }
        }
        let stopped = self.registry.stop(route.clone()).await?;
        if stopped.is_some() {
            info!(route = %route, "session stopped");
            self.notifier.notify(&route, SessionNotice::Stopped).await;
        }
        Ok(stopped)
    }

    /// Forward user text to the agent composer.
    ///
    /// # Errors
    /// Returns `BlockedCommand` for slash commands that would open an
    /// interactive UI in a headless window, `NoSession` for unknown
    /// routes, and terminal failures otherwise.
    pub async fn submit_input(&self, route: &RouteKey, text: &str) -> Result<(), SupervisorError> {
        if self.config.is_blocked_command(text) {
            let command = text
                .trim_start()
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
            debug!(route = %route, command = %command, "refusing blocked command");
            return Err(SupervisorError::BlockedCommand(command));
        }
        let session = self
            .registry
            .get(route)
            .await
            .ok_or_else(|| SupervisorError::NoSession(route.clone()))?;
        self.send_line(&session.surface, text).await?;
        self.registry.touch(route.clone()).await?;
        Ok(())
    }

    /// Answer an interactive prompt with a keystroke sequence.
    ///
    /// The shape of the decision (which keys fit which prompt) is the
    /// caller's concern; this just delivers the keys in order.
    ///
    /// # Errors
    /// Returns `NoSession` for unknown routes and terminal failures
    /// otherwise.
    pub async fn submit_decision(
        &self,
        route: &RouteKey,
        keys: &[&str],
    ) -> Result<(), SupervisorError> {
        let session = self
            .registry
            .get(route)
            .await
            .ok_or_else(|| SupervisorError::NoSession(route.clone()))?;
        for key in keys {
            self.channel.send_key(&session.surface, key).await?;
            tokio::time::sleep(KEY_PAUSE).await;
        }
        self.registry.touch(route.clone()).await?;
        Ok(())
    }

    /// Relaunch the agent inside an existing session window, resuming
    /// the bound agent session when one is known. Used after the agent
    /// process died but the window survived.
    ///
    /// # Errors
    /// Returns `NoSession` for unknown routes and terminal failures
    /// otherwise.
    pub async fn restart_agent(&self, route: &RouteKey) -> Result<(), SupervisorError> {
        let session = self
            .registry
            .get(route)
            .await
            .ok_or_else(|| SupervisorError::NoSession(route.clone()))?;
        self.cancel_tasks(route).await;

        if let Err(err) = self.quit_agent(&session.surface).await {
            warn!(route = %route, error = %err, "graceful exit before relaunch failed");
        }
        let relaunch = match &session.agent_session_id {
            Some(id) => format!("{} --resume {id}", self.config.agent_command),
            None => self.config.agent_command.clone(),
        };
        self.send_line(&session.surface, &relaunch).await?;
        self.await_announce(route, &session.surface).await;

        let session = self
            .registry
            .get(route)
            .await
            .ok_or_else(|| SupervisorError::NoSession(route.clone()))?;
        self.spawn_tasks(session, true).await;
        info!(route = %route, "agent relaunched");
        Ok(())
    }

    /// Respawn tasks for sessions persisted by an earlier process whose
    /// windows are still alive. Transcript forwarding resumes from the
    /// persisted cursor. Sessions with dead windows are left for the
    /// reaper. Returns the number of adopted sessions.
    pub async fn adopt_running(&self) -> usize {
        let mut adopted = 0;
        for session in self.registry.list_active().await {
            if self.channel.exists(&session.surface).await {
                info!(route = %session.route, surface = %session.surface, "adopting running session");
                self.spawn_tasks(session, false).await;
                adopted += 1;
            }
        }
        adopted
    }

    /// Cancel every session's tasks without touching the windows or the
    /// registry. The agents keep running; a later process adopts them.
    pub async fn detach_all(&self) {
        let mut tasks = self.tasks.lock().await;
        for (route, handles) in tasks.drain() {
            debug!(route = %route, "detaching session tasks");
            stop_tasks(handles);
        }
    }

    /// Literal text, a composer pause, then Enter.
    async fn send_line(&self, surface: &SurfaceId, text: &str) -> Result<(), ChannelError> {
        self.channel.send_text(surface, text).await?;
        tokio::time::sleep(COMPOSER_PAUSE).await;
        self.channel.send_key(surface, "Enter").await
    }

    /// Escape out of any modal, then `/exit`, then wait for the agent
    /// to wind down.
    async fn quit_agent(&self, surface: &SurfaceId) -> Result<(), ChannelError> {
        self.channel.send_key(surface, "Escape").await?;
        tokio::time::sleep(ESCAPE_PAUSE).await;
        self.send_line(surface, "/exit").await?;
        tokio::time::sleep(EXIT_GRACE).await;
        Ok(())
    }

    /// Wait for the in-window start hook to announce the agent session
    /// id and bind it. Best effort.
    async fn await_announce(&self, route: &RouteKey, surface: &SurfaceId) {
        let announced = self
            .session_map
            .wait_for_agent_id(
                surface,
                self.config.announce_timeout,
                self.config.announce_poll,
            )
            .await;
        match announced {
            Some(agent_id) => {
                if let Err(err) = self.registry.bind_agent_id(route.clone(), agent_id).await {
                    warn!(route = %route, error = %err, "could not persist announced agent id");
                }
            }
            None => warn!(
                route = %route,
                surface = %surface,
                "agent never announced a session id; transcript forwarding stays off"
            ),
        }
    }

    /// Spawn the tail and scan tasks for a session, replacing any
    /// existing ones. With `skip_history` the transcript cursor jumps
    /// to the current end of file first, so pre-existing records are
    /// never forwarded.
    async fn spawn_tasks(&self, session: Session, skip_history: bool) {
        self.cancel_tasks(&session.route).await;

        let (shutdown, shutdown_rx) = watch::channel(false);

        let tailer = if let Some(agent_id) = session.agent_session_id.clone() {
            let path =
                resolve_log_path(&self.config.projects_dir, &session.working_dir, &agent_id).await;
            let mut tailer = LogTailer::new(path, session.log_offset);
            if skip_history {
                match tailer.skip_to_end().await {
                    Ok(()) => {
                        if let Err(err) = self
                            .registry
                            .advance_offset(session.route.clone(), tailer.offset())
                            .await
                        {
                            warn!(route = %session.route, error = %err, "could not persist transcript cursor");
                        }
                    }
                    Err(err) => {
                        warn!(route = %session.route, error = %err, "could not seek transcript to end");
                    }
                }
            }
            tailer.start();
            let task = TailTask {
                route: session.route.clone(),
                tailer,
                registry: Arc::clone(&self.registry),
                outbox: Arc::clone(&self.outbox),
                notifier: Arc::clone(&self.notifier),
                poll: self.config.poll_interval,
                show_reasoning: self.config.show_reasoning,
                shutdown: shutdown_rx.clone(),
                failures: 0,
            };
            Some(tokio::spawn(task.run()))
        } else {
            None
        };

        let state = Arc::clone(
            self.scan_states
                .lock()
                .await
                .entry(session.route.clone())
                .or_default(),
        );
        let scan = ScanTask {
            route: session.route.clone(),
            surface: session.surface.clone(),
            channel: Arc::clone(&self.channel),
            registry: Arc::clone(&self.registry),
            outbox: Arc::clone(&self.outbox),
            notifier: Arc::clone(&self.notifier),
            interval: self.config.scan_interval,
            shutdown: shutdown_rx,
            state,
        };
        let scanner = tokio::spawn(scan.run());

        self.tasks.lock().await.insert(
            session.route,
            SessionTasks {
                shutdown,
                tailer,
                scanner,
            },
        );
    }

    async fn cancel_tasks(&self, route: &RouteKey) {
        if let Some(handles) = self.tasks.lock().await.remove(route) {
            stop_tasks(handles);
        }
    }

    /// Fresh scan state for a route, discarding anything carried over
    /// from a previous session on the same route.
    async fn reset_scan_state(&self, route: &RouteKey) {
        self.scan_states
            .lock()
            .await
            .insert(route.clone(), Arc::default());
    }
}

fn stop_tasks(handles: SessionTasks) {
    let _ = handles.shutdown.send(true);
    if let Some(tailer) = handles.tailer {
        tailer.abort();
    }
    handles.scanner.abort();
}

/// Transcript forwarding loop for one session.
struct TailTask {
    route: RouteKey,
    tailer: LogTailer,
    registry: Arc<SessionRegistry>,
    outbox: Arc<Outbox>,
    notifier: Arc<dyn Notifier>,
    poll: Duration,
    show_reasoning: bool,
    shutdown: watch::Receiver<bool>,
    failures: u32,
}

impl TailTask {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.poll);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = ticker.tick() => {
                    if self.registry.get(&self.route).await.is_none() {
                        break;
                    }
                    self.drain().await;
                }
            }
        }
        debug!(route = %self.route, "transcript task stopped");
    }

    async fn drain(&mut self) {
        let boundary = self.tailer.offset();
        let lines = match self.tailer.poll().await {
            Ok(lines) => {
                self.failures = 0;
                lines
            }
            Err(err) => {
                self.failures += 1;
                if self.failures < TAIL_FAULT_LIMIT {
                    warn!(route = %self.route, error = %err, "transcript poll failed");
                    return;
                }
                warn!(route = %self.route, error = %err, "transcript unreadable, retiring session");
                match self.registry.stop(self.route.clone()).await {
                    Ok(Some(_)) => {
                        self.notifier
                            .notify(&self.route, SessionNotice::Crashed)
                            .await;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        error!(route = %self.route, error = %err, "failed to retire session");
                    }
                }
                return;
            }
        };
        if lines.is_empty() {
            return;
        }
        // Persist the cursor before forwarding: a crash in between drops
        // these records instead of replaying them into the chat. A
        // persisted cursor behind delivered records would replay them
        // after a restart, so a failed persist holds the batch back and
        // rewinds the cursor for a retry on the next tick.
        if let Err(err) = self
            .registry
            .advance_offset(self.route.clone(), self.tailer.offset())
            .await
        {
            error!(route = %self.route, error = %err, "cursor persist failed, holding records back");
            self.tailer.rewind(boundary);
            return;
        }
        for line in &lines {
            match parse_line(line) {
                Ok(events) => {
                    for event in events {
                        self.forward(event).await;
                    }
                }
                Err(err @ ParseError::Malformed(_)) => {
                    warn!(route = %self.route, error = %err, "skipping malformed transcript record");
                }
                Err(ParseError::UnknownKind(kind)) => {
                    debug!(route = %self.route, kind = %kind, "skipping unknown transcript record");
                }
            }
        }
    }

    async fn forward(&self, event: AgentEvent) {
        let task = match event {
            AgentEvent::Narration { text } => OutboundTask::Content { text },
            AgentEvent::Reasoning { text } => {
                if !self.show_reasoning {
                    return;
                }
                OutboundTask::Content { text }
            }
            AgentEvent::ToolStart {
                tool_id,
                tool_name,
                args_summary,
            } => {
                let text = if args_summary.is_empty() {
                    tool_name
                } else {
                    format!("{tool_name} ({args_summary})")
                };
                OutboundTask::ToolUse { text, tool_id }
            }
            AgentEvent::ToolResult {
                tool_id,
                status,
                summary,
            } => {
                let text = match (status, summary.is_empty()) {
                    (ToolStatus::Ok, true) => "✓".to_string(),
                    (ToolStatus::Ok, false) => format!("✓ {summary}"),
                    (ToolStatus::Failed, true) => "✗".to_string(),
                    (ToolStatus::Failed, false) => format!("✗ {summary}"),
                };
                let tool_id = (!tool_id.is_empty()).then_some(tool_id);
                OutboundTask::ToolResult { text, tool_id }
            }
        };
        self.outbox.enqueue(&self.route, task).await;
    }
}

/// Terminal scan loop for one session: decision prompts, working
/// status, and agent-exit detection. The mutable state lives in the
/// supervisor's scan-state map so a respawned task picks up where the
/// previous one left off.
struct ScanTask {
    route: RouteKey,
    surface: SurfaceId,
    channel: Arc<dyn TerminalChannel>,
    registry: Arc<SessionRegistry>,
    outbox: Arc<Outbox>,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
    state: Arc<Mutex<ScanState>>,
}

impl ScanTask {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = ticker.tick() => {
                    if self.registry.get(&self.route).await.is_none() {
                        break;
                    }
                    self.scan_once().await;
                }
            }
        }
        debug!(route = %self.route, "scan task stopped");
    }

    async fn scan_once(&self) {
        let snapshot = match self.channel.capture(&self.surface).await {
            Ok(text) => text,
            Err(err) => {
                // A vanished window is the reaper's business.
                debug!(route = %self.route, error = %err, "pane capture failed");
                return;
            }
        };
        let mut state = self.state.lock().await;

        match state.watch.observe(detect_prompt(&snapshot)) {
            Some(PromptTransition::Raised(prompt)) => {
                info!(route = %self.route, kind = prompt.kind(), "decision prompt raised");
                self.notifier
                    .notify(&self.route, SessionNotice::DecisionNeeded { prompt })
                    .await;
            }
            Some(PromptTransition::Cleared) => {
                self.notifier
                    .notify(&self.route, SessionNotice::DecisionResolved)
                    .await;
            }
            None => {}
        }

        let status = if detect_idle_prompt(&snapshot) {
            None
        } else {
            detect_status(&snapshot)
        };
        if status != state.status {
            match &status {
                Some(text) => {
                    self.outbox
                        .enqueue(&self.route, OutboundTask::Status { text: text.clone() })
                        .await;
                    self.notifier
                        .notify(&self.route, SessionNotice::Status { text: text.clone() })
                        .await;
                }
                None => {
                    self.outbox.enqueue(&self.route, OutboundTask::StatusClear).await;
                    self.notifier
                        .notify(&self.route, SessionNotice::StatusCleared)
                        .await;
                }
            }
            state.status = status;
        }

        match self.channel.current_command(&self.surface).await {
            Ok(Some(command)) => {
                let at_shell = SHELLS.contains(&command.as_str());
                if at_shell && !state.agent_exited {
                    state.agent_exited = true;
                    warn!(route = %self.route, command = %command, "agent exited, window still alive");
                    self.notifier.notify(&self.route, SessionNotice::AgentExited).await;
                } else if !at_shell {
                    state.agent_exited = false;
                }
            }
            Ok(None) => {}
            Err(err) => debug!(route = %self.route, error = %err, "foreground command probe failed"),
        }
    }
}
