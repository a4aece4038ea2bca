//! Runtime configuration for the bridge.

use std::path::PathBuf;
use std::time::Duration;

/// Slash commands that open interactive UIs the agent cannot drive
/// headlessly; submitting them over the bridge would wedge the window.
const BLOCKED_COMMANDS: &[&str] = &[
    "/mcp",
    "/help",
    "/settings",
    "/config",
    "/model",
    "/compact",
    "/cost",
    "/doctor",
    "/init",
    "/login",
    "/logout",
    "/memory",
    "/permissions",
    "/pr",
    "/review",
    "/terminal",
    "/vim",
    "/approved-tools",
    "/listen",
];

/// Bridge tunables. Plain data; construct with [`Default`] and adjust,
/// or pick up `TETHER_*` environment overrides via [`BridgeConfig::from_env`].
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Name of the tmux session hosting all agent windows.
    pub tmux_session: String,
    /// Command line used to launch the agent inside a window.
    pub agent_command: String,
    /// Transcript polling cadence.
    pub poll_interval: Duration,
    /// Terminal prompt/status scan cadence.
    pub scan_interval: Duration,
    /// Dead-surface sweep cadence.
    pub reap_interval: Duration,
    /// Hard upper bound for one outbound message.
    pub max_message_len: usize,
    /// Upper bound when coalescing adjacent narration.
    pub merge_max_len: usize,
    /// How long the sequencer waits for more narration before flushing.
    pub merge_window: Duration,
    /// Delivery attempts before a message is dropped.
    pub send_attempts: u32,
    /// How long to wait for the agent to announce its session id.
    pub announce_timeout: Duration,
    /// Announcement poll cadence within that window.
    pub announce_poll: Duration,
    /// Forward reasoning blocks to the chat layer.
    pub show_reasoning: bool,
    /// Directory for bridge state (session table, announce map).
    pub state_dir: PathBuf,
    /// Directory where the agent writes per-project transcripts.
    pub projects_dir: PathBuf,
    /// Slash commands refused by `submit_input`.
    pub blocked_commands: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            tmux_session: "tether".to_string(),
            agent_command: "claude".to_string(),
            poll_interval: Duration::from_secs(2),
            scan_interval: Duration::from_secs(2),
            reap_interval: Duration::from_secs(30),
            max_message_len: 4096,
            merge_max_len: 3800,
            merge_window: Duration::from_millis(500),
            send_attempts: 3,
            announce_timeout: Duration::from_secs(10),
            announce_poll: Duration::from_millis(1500),
            show_reasoning: false,
            state_dir: home.join(".tether"),
            projects_dir: home.join(".claude").join("projects"),
            blocked_commands: BLOCKED_COMMANDS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl BridgeConfig {
    /// Defaults with `TETHER_*` environment overrides applied.
    ///
    /// Unparseable values keep the default and log at debug.
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("TETHER_TMUX_SESSION") {
            if !v.is_empty() {
                cfg.tmux_session = v;
            }
        }
        if let Ok(v) = std::env::var("TETHER_AGENT_COMMAND") {
            if !v.is_empty() {
                cfg.agent_command = v;
            }
        }
        if let Some(d) = env_secs("TETHER_POLL_SECS") {
            cfg.poll_interval = d;
        }
        if let Some(d) = env_secs("TETHER_SCAN_SECS") {
            cfg.scan_interval = d;
        }
        if let Some(d) = env_secs("TETHER_REAP_SECS") {
            cfg.reap_interval = d;
        }
        if let Ok(v) = std::env::var("TETHER_STATE_DIR") {
            if !v.is_empty() {
                cfg.state_dir = PathBuf::from(v);
            }
        }
        if let Ok(v) = std::env::var("TETHER_PROJECTS_DIR") {
            if !v.is_empty() {
                cfg.projects_dir = PathBuf::from(v);
            }
        }
        if let Ok(v) = std::env::var("TETHER_SHOW_REASONING") {
            cfg.show_reasoning = matches!(v.as_str(), "1" | "true" | "yes");
        }
        cfg
    }

    /// Whether `text` starts with a slash command the bridge refuses.
    #[must_use]
    pub fn is_blocked_command(&self, text: &str) -> bool {
        let first = text.trim_start().split_whitespace().next().unwrap_or("");
        self.blocked_commands.iter().any(|b| b == first)
    }
}

fn env_secs(var: &str) -> Option<Duration> {
    let raw = std::env::var(var).ok()?;
    match raw.parse::<f64>() {
        Ok(secs) if secs > 0.0 => Some(Duration::from_secs_f64(secs)),
        _ => {
            tracing::debug!(var, value = %raw, "ignoring unparseable duration override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.poll_interval, Duration::from_secs(2));
        assert_eq!(cfg.max_message_len, 4096);
        assert_eq!(cfg.merge_max_len, 3800);
        assert!(!cfg.show_reasoning);
        assert!(cfg.state_dir.ends_with(".tether"));
    }

    #[test]
    fn test_blocked_commands() {
        let cfg = BridgeConfig::default();
        assert!(cfg.is_blocked_command("/help"));
        assert!(cfg.is_blocked_command("  /vim  "));
        assert!(cfg.is_blocked_command("/model sonnet"));
        assert!(!cfg.is_blocked_command("/helpme"));
        assert!(!cfg.is_blocked_command("run /help for info"));
        assert!(!cfg.is_blocked_command("fix the bug"));
    }
}
