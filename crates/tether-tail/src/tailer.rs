//! Byte-offset polling cursor over the agent's transcript file.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Transcript read error.
#[derive(Debug, Error)]
pub enum TailError {
    #[error("transcript read failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Polling,
    Closed,
}

/// Polling cursor over one append-only JSONL transcript.
///
/// The cursor only advances through the last complete record: bytes
/// after the final newline are an unfinished write and are re-read on
/// the next tick. A persisted offset therefore always sits on a record
/// boundary, so a restart resumes cleanly mid-file.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
    state: State,
}

impl LogTailer {
    /// Cursor over `path`, starting at a previously persisted offset
    /// (0 for a fresh session).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            state: State::Idle,
        }
    }

    /// Begin polling.
    pub fn start(&mut self) {
        self.state = State::Polling;
    }

    /// Stop polling; subsequent polls yield nothing.
    pub fn stop(&mut self) {
        self.state = State::Closed;
    }

    /// Current byte offset (always on a record boundary).
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// The transcript path being tailed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all complete records appended since the last poll, in
    /// write order. Each is returned exactly once.
    ///
    /// A missing file is not an error (the agent has not written yet).
    /// A shrunken file means the transcript was rewritten (agent
    /// `/clear`); the cursor resets to the start.
    ///
    /// # Errors
    /// Returns [`TailError`] when the file exists but cannot be read.
    pub async fn poll(&mut self) -> Result<Vec<String>, TailError> {
        if self.state != State::Polling {
            return Ok(Vec::new());
        }
        let size = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TailError::Io(e)),
        };
        if size < self.offset {
            tracing::info!(
                path = %self.path.display(),
                offset = self.offset,
                size,
                "transcript truncated, resetting cursor"
            );
            self.offset = 0;
        }
        if size == self.offset {
            return Ok(Vec::new());
        }

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;

        // Everything past the last newline is an unfinished record;
        // hold it back so the cursor stays on a record boundary.
        let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
            return Ok(Vec::new());
        };
        let consumed = last_newline + 1;
        self.offset += consumed as u64;

        let records = String::from_utf8_lossy(&buf[..consumed])
            .split('\n')
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        Ok(records)
    }

    /// Move the cursor back to an earlier record boundary; everything
    /// after it is re-read on the next poll. Used when the caller could
    /// not persist the advanced cursor and wants the records retried.
    pub fn rewind(&mut self, offset: u64) {
        self.offset = offset;
    }

    /// Jump the cursor to the end of the file, so an adopted session
    /// does not replay its history.
    ///
    /// # Errors
    /// Returns [`TailError`] when the file exists but cannot be stat'd.
    pub async fn skip_to_end(&mut self) -> Result<(), TailError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => {
                self.offset = meta.len();
                tracing::info!(
                    path = %self.path.display(),
                    offset = self.offset,
                    "skipped transcript to end"
                );
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.offset = 0;
                Ok(())
            }
            Err(e) => Err(TailError::Io(e)),
        }
    }
}

/// The agent derives its per-project directory name by replacing every
/// non-alphanumeric character of the absolute working dir with `-`.
#[must_use]
pub fn munge_working_dir(working_dir: &Path) -> String {
    working_dir
        .to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Locate the transcript for an agent session.
///
/// Prefers an existing `<id>.jsonl` anywhere under `projects_dir`
/// (sessions can outlive directory renames), then falls back to the
/// path derived from the working dir — the file may not exist yet,
/// the agent creates it on first interaction.
pub async fn resolve_log_path(
    projects_dir: &Path,
    working_dir: &Path,
    agent_session_id: &str,
) -> PathBuf {
    let file_name = format!("{agent_session_id}.jsonl");
    if let Ok(mut entries) = tokio::fs::read_dir(projects_dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let candidate = entry.path().join(&file_name);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return candidate;
            }
        }
    }
    let derived = projects_dir.join(munge_working_dir(working_dir));
    tracing::debug!(dir = %derived.display(), "using derived project dir");
    derived.join(file_name)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    fn append(path: &Path, bytes: &[u8]) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(bytes).unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let mut tailer = LogTailer::new(dir.path().join("absent.jsonl"), 0);
        tailer.start();
        assert!(tailer.poll().await.unwrap().is_empty());
        assert_eq!(tailer.offset(), 0);
    }

    #[tokio::test]
    async fn test_records_surface_exactly_once_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.jsonl");
        append(&path, b"{\"n\":1}\n{\"n\":2}\n");

        let mut tailer = LogTailer::new(&path, 0);
        tailer.start();
        assert_eq!(
            tailer.poll().await.unwrap(),
            vec!["{\"n\":1}".to_owned(), "{\"n\":2}".to_owned()]
        );
        assert!(tailer.poll().await.unwrap().is_empty());

        append(&path, b"{\"n\":3}\n");
        assert_eq!(tailer.poll().await.unwrap(), vec!["{\"n\":3}".to_owned()]);
    }

    #[tokio::test]
    async fn test_partial_record_held_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.jsonl");
        append(&path, b"{\"n\":1}\n{\"n\":2,\"body\":\"tru");

        let mut tailer = LogTailer::new(&path, 0);
        tailer.start();
        assert_eq!(tailer.poll().await.unwrap(), vec!["{\"n\":1}".to_owned()]);
        assert_eq!(tailer.offset(), 8);

        // Completing the record makes the whole line surface at once.
        append(&path, b"ncated\"}\n");
        assert_eq!(
            tailer.poll().await.unwrap(),
            vec!["{\"n\":2,\"body\":\"truncated\"}".to_owned()]
        );
    }

    #[tokio::test]
    async fn test_mid_record_write_split_across_ticks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.jsonl");
        append(&path, b"{\"half\":");

        let mut tailer = LogTailer::new(&path, 0);
        tailer.start();
        assert!(tailer.poll().await.unwrap().is_empty());
        assert_eq!(tailer.offset(), 0);

        append(&path, b"true}\n");
        assert_eq!(
            tailer.poll().await.unwrap(),
            vec!["{\"half\":true}".to_owned()]
        );
    }

    #[tokio::test]
    async fn test_restart_resumes_from_persisted_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.jsonl");
        append(&path, b"{\"n\":1}\n{\"n\":2}\n{\"n\":3}\n{\"n\":4,\"tail\":");

        let mut tailer = LogTailer::new(&path, 0);
        tailer.start();
        assert_eq!(tailer.poll().await.unwrap().len(), 3);
        let persisted = tailer.offset();
        assert_eq!(persisted, 24);

        // A new cursor at the persisted offset picks up exactly the
        // record that finishes later, no replays.
        append(&path, b"0}\n");
        let mut resumed = LogTailer::new(&path, persisted);
        resumed.start();
        assert_eq!(
            resumed.poll().await.unwrap(),
            vec!["{\"n\":4,\"tail\":0}".to_owned()]
        );
        assert_eq!(resumed.offset(), 41);
    }

    #[tokio::test]
    async fn test_truncation_resets_cursor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.jsonl");
        append(&path, b"{\"n\":1}\n{\"n\":2}\n");

        let mut tailer = LogTailer::new(&path, 0);
        tailer.start();
        assert_eq!(tailer.poll().await.unwrap().len(), 2);

        // Rewritten shorter, as after an agent /clear.
        std::fs::write(&path, b"{\"fresh\":1}\n").unwrap();
        assert_eq!(
            tailer.poll().await.unwrap(),
            vec!["{\"fresh\":1}".to_owned()]
        );
        assert_eq!(tailer.offset(), 12);
    }

    #[tokio::test]
    async fn test_blank_lines_skipped_but_consumed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.jsonl");
        append(&path, b"\n\n{\"n\":1}\n");

        let mut tailer = LogTailer::new(&path, 0);
        tailer.start();
        assert_eq!(tailer.poll().await.unwrap(), vec!["{\"n\":1}".to_owned()]);
        assert_eq!(tailer.offset(), 10);
    }

    #[tokio::test]
    async fn test_rewind_re_reads_from_boundary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.jsonl");
        append(&path, b"{\"n\":1}\n{\"n\":2}\n");

        let mut tailer = LogTailer::new(&path, 0);
        tailer.start();
        assert_eq!(tailer.poll().await.unwrap().len(), 2);

        // Rewinding to a record boundary surfaces everything after it
        // again on the next poll.
        tailer.rewind(8);
        assert_eq!(tailer.poll().await.unwrap(), vec!["{\"n\":2}".to_owned()]);
        assert_eq!(tailer.offset(), 16);
    }

    #[tokio::test]
    async fn test_skip_to_end_suppresses_history() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.jsonl");
        append(&path, b"{\"old\":1}\n{\"old\":2}\n");

        let mut tailer = LogTailer::new(&path, 0);
        tailer.start();
        tailer.skip_to_end().await.unwrap();
        assert!(tailer.poll().await.unwrap().is_empty());

        append(&path, b"{\"new\":1}\n");
        assert_eq!(tailer.poll().await.unwrap(), vec!["{\"new\":1}".to_owned()]);
    }

    #[tokio::test]
    async fn test_lifecycle_gates_polling() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.jsonl");
        append(&path, b"{\"n\":1}\n");

        let mut tailer = LogTailer::new(&path, 0);
        assert!(tailer.poll().await.unwrap().is_empty(), "idle");

        tailer.start();
        assert_eq!(tailer.poll().await.unwrap().len(), 1);

        tailer.stop();
        append(&path, b"{\"n\":2}\n");
        assert!(tailer.poll().await.unwrap().is_empty(), "closed");
    }

    #[tokio::test]
    async fn test_resolve_prefers_existing_transcript() {
        let dir = TempDir::new().unwrap();
        let other = dir.path().join("-home-user-other");
        std::fs::create_dir_all(&other).unwrap();
        std::fs::write(other.join("abc123.jsonl"), b"{}\n").unwrap();

        let found = resolve_log_path(dir.path(), Path::new("/home/user/proj"), "abc123").await;
        assert_eq!(found, other.join("abc123.jsonl"));
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_derived_dir() {
        let dir = TempDir::new().unwrap();
        let found = resolve_log_path(dir.path(), Path::new("/home/user/my_proj"), "abc123").await;
        assert_eq!(
            found,
            dir.path().join("-home-user-my-proj").join("abc123.jsonl")
        );
    }

    #[test]
    fn test_munge_replaces_non_alphanumerics() {
        assert_eq!(
            munge_working_dir(Path::new("/home/user/a.b c")),
            "-home-user-a-b-c"
        );
    }
}
