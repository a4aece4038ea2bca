//! Terminal channel over the tmux CLI.
//!
//! One tmux session hosts all agent windows; every bridge session owns
//! one window. Keystrokes go through `send-keys -l` (literal mode) so
//! the multiplexer never reinterprets payload text, with named keys on
//! a separate interpreted path.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use tether_core::{ChannelError, SurfaceId, TerminalChannel};

const TMUX_TIMEOUT: Duration = Duration::from_secs(5);

/// Sanitize a string for use as a tmux window name.
///
/// Keeps lowercase alphanumerics, `-` and `_`; everything else becomes
/// `-`. Capped at 30 chars; an empty result falls back to `"session"`.
#[must_use]
pub fn sanitize_window_name(name: &str) -> String {
    let clean: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let clean: String = clean.trim_matches('-').chars().take(30).collect();
    if clean.is_empty() {
        "session".to_string()
    } else {
        clean
    }
}

/// Pick a window name not present in `existing`, suffixing `-2`, `-3`,
/// ... on collision.
#[must_use]
pub fn next_window_name(base: &str, existing: &[String]) -> String {
    if !existing.iter().any(|w| w == base) {
        return base.to_string();
    }
    let mut counter = 2u32;
    loop {
        let candidate = format!("{base}-{counter}");
        if !existing.iter().any(|w| w == &candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Whether `surface` names a live window of the hosting session.
/// A surface addressed to a different tmux session is never alive
/// here, even when this session has a window of the same name.
fn window_alive(hosting: &str, windows: &[String], surface: &SurfaceId) -> bool {
    surface.session == hosting && windows.iter().any(|w| w == &surface.window)
}

/// tmux-backed [`TerminalChannel`].
pub struct Tmux {
    binary: PathBuf,
    session: String,
}

impl Tmux {
    /// Create a channel for the given tmux session name.
    ///
    /// # Errors
    /// Returns [`ChannelError::Multiplexer`] if no tmux binary is on PATH.
    pub async fn new(session: impl Into<String>) -> Result<Self, ChannelError> {
        let binary = tokio::task::spawn_blocking(|| which::which("tmux"))
            .await
            .map_err(|e| ChannelError::Multiplexer(format!("lookup task failed: {e}")))?
            .map_err(|e| ChannelError::Multiplexer(format!("tmux not found: {e}")))?;
        Ok(Self {
            binary,
            session: session.into(),
        })
    }

    /// Run a tmux subcommand and return trimmed stdout.
    async fn run(&self, args: &[&str]) -> Result<String, ChannelError> {
        let output = tokio::time::timeout(
            TMUX_TIMEOUT,
            Command::new(&self.binary)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ChannelError::Multiplexer(format!("tmux {} timed out", args.join(" "))))??;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout)
                .trim_end_matches('\n')
                .to_string())
        } else {
            Err(ChannelError::Multiplexer(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    /// Get or create the hosting tmux session.
    async fn ensure_session(&self) -> Result<(), ChannelError> {
        if self.run(&["has-session", "-t", &self.session]).await.is_ok() {
            return Ok(());
        }
        self.run(&["new-session", "-d", "-s", &self.session]).await?;
        tracing::info!(session = %self.session, "created tmux session");
        Ok(())
    }

    /// Names of all windows in the hosting session.
    async fn window_names(&self) -> Result<Vec<String>, ChannelError> {
        let out = self
            .run(&["list-windows", "-t", &self.session, "-F", "#{window_name}"])
            .await?;
        Ok(out.lines().map(ToString::to_string).collect())
    }

    /// Re-classify a failure: if the surface vanished, report that
    /// instead of the raw tmux error.
    async fn classify(&self, surface: &SurfaceId, err: ChannelError) -> ChannelError {
        if self.exists(surface).await {
            err
        } else {
            ChannelError::SurfaceMissing(surface.clone())
        }
    }
}

#[async_trait]
impl TerminalChannel for Tmux {
    async fn allocate(
        &self,
        base_name: &str,
        working_dir: &Path,
    ) -> Result<SurfaceId, ChannelError> {
        if !working_dir.is_dir() {
            return Err(ChannelError::Multiplexer(format!(
                "working directory does not exist: {}",
                working_dir.display()
            )));
        }
        self.ensure_session().await?;

        let base = sanitize_window_name(base_name);
        let existing = self.window_names().await?;
        let name = next_window_name(&base, &existing);
        if name != base {
            tracing::info!(requested = %base, using = %name, "window name taken");
        }

        let cwd = working_dir.display().to_string();
        self.run(&[
            "new-window",
            "-d",
            "-t",
            &self.session,
            "-n",
            &name,
            "-c",
            &cwd,
        ])
        .await?;
        tracing::info!(window = %name, cwd = %cwd, "created window");
        Ok(SurfaceId::new(self.session.clone(), name))
    }

    async fn kill(&self, surface: &SurfaceId) -> Result<(), ChannelError> {
        if !self.exists(surface).await {
            return Ok(());
        }
        self.run(&["kill-window", "-t", &surface.target()]).await?;
        tracing::info!(surface = %surface, "killed window");
        Ok(())
    }

    async fn send_text(&self, surface: &SurfaceId, text: &str) -> Result<(), ChannelError> {
        let target = surface.target();
        match self.run(&["send-keys", "-t", &target, "-l", "--", text]).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.classify(surface, e).await),
        }
    }

    async fn send_key(&self, surface: &SurfaceId, key: &str) -> Result<(), ChannelError> {
        let target = surface.target();
        match self.run(&["send-keys", "-t", &target, key]).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.classify(surface, e).await),
        }
    }

    async fn capture(&self, surface: &SurfaceId) -> Result<String, ChannelError> {
        let target = surface.target();
        match self.run(&["capture-pane", "-p", "-t", &target]).await {
            Ok(content) => Ok(content),
            Err(e) => Err(self.classify(surface, e).await),
        }
    }

    async fn exists(&self, surface: &SurfaceId) -> bool {
        if surface.session != self.session {
            return false;
        }
        match self.window_names().await {
            Ok(names) => window_alive(&self.session, &names, surface),
            Err(_) => false,
        }
    }

    async fn current_command(&self, surface: &SurfaceId) -> Result<Option<String>, ChannelError> {
        let target = surface.target();
        match self
            .run(&[
                "display-message",
                "-p",
                "-t",
                &target,
                "#{pane_current_command}",
            ])
            .await
        {
            Ok(cmd) if cmd.is_empty() => Ok(None),
            Ok(cmd) => Ok(Some(cmd)),
            Err(e) => Err(self.classify(surface, e).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_window_name() {
        assert_eq!(sanitize_window_name("My Project!"), "my-project");
        assert_eq!(sanitize_window_name("  hello  "), "hello");
        assert_eq!(sanitize_window_name("fix/parser #12"), "fix-parser--12");
        assert_eq!(sanitize_window_name("___"), "___");
        assert_eq!(sanitize_window_name("---"), "session");
        assert_eq!(sanitize_window_name(""), "session");
    }

    #[test]
    fn test_sanitize_caps_length() {
        let long = "a".repeat(100);
        assert_eq!(sanitize_window_name(&long).len(), 30);
    }

    #[test]
    fn test_next_window_name_no_collision() {
        assert_eq!(next_window_name("api", &[]), "api");
        assert_eq!(next_window_name("api", &["web".into()]), "api");
    }

    #[test]
    fn test_next_window_name_suffixes() {
        let existing = vec!["api".to_string(), "api-2".to_string()];
        assert_eq!(next_window_name("api", &existing), "api-3");
    }

    #[test]
    fn test_window_alive_requires_matching_session() {
        let windows = vec!["api".to_string()];
        assert!(window_alive("tether", &windows, &SurfaceId::new("tether", "api")));
        // Same window name under a different tmux session is not ours.
        assert!(!window_alive("tether", &windows, &SurfaceId::new("other", "api")));
        assert!(!window_alive("tether", &windows, &SurfaceId::new("tether", "web")));
    }
}
