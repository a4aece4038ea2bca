//! Per-route outbound delivery workers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use tether_core::{BridgeConfig, ChatSender, MessageRef, RouteKey, SendError};

use crate::split::split_message;

/// One unit of outbound work, in transcript order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundTask {
    /// Plain text; adjacent content coalesces inside the merge window.
    Content { text: String },
    /// Tool invocation line; its message is remembered for the result.
    ToolUse { text: String, tool_id: String },
    /// Tool outcome; edits the matching `ToolUse` message in place.
    ToolResult {
        text: String,
        tool_id: Option<String>,
    },
    /// Transient working status; one status message per route.
    Status { text: String },
    /// Remove the route's status message.
    StatusClear,
}

#[derive(Debug, Clone, Copy)]
struct Tuning {
    merge_window: Duration,
    merge_max_len: usize,
    max_message_len: usize,
    send_attempts: u32,
}

impl From<&BridgeConfig> for Tuning {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            merge_window: config.merge_window,
            merge_max_len: config.merge_max_len,
            max_message_len: config.max_message_len,
            send_attempts: config.send_attempts,
        }
    }
}

struct RouteHandle {
    tx: mpsc::UnboundedSender<OutboundTask>,
    worker: JoinHandle<()>,
}

/// Outbound sequencing queue: one FIFO worker per route, delivery in
/// enqueue order, merge/split/pair/retry applied per the task type.
pub struct Outbox {
    sender: Arc<dyn ChatSender>,
    tuning: Tuning,
    routes: Mutex<HashMap<RouteKey, RouteHandle>>,
}

impl Outbox {
    #[must_use]
    pub fn new(sender: Arc<dyn ChatSender>, config: &BridgeConfig) -> Self {
        Self {
            sender,
            tuning: Tuning::from(config),
            routes: Mutex::new(HashMap::new()),
        }
    }

    /// Queue a task for the route, starting its worker on first use.
    pub async fn enqueue(&self, route: &RouteKey, task: OutboundTask) {
        let mut routes = self.routes.lock().await;
        let entry = routes
            .entry(route.clone())
            .or_insert_with(|| self.spawn_worker(route.clone()));
        if let Err(rejected) = entry.tx.send(task) {
            // Worker is gone (aborted or panicked); replace it and
            // requeue, with fresh pairing state.
            let fresh = self.spawn_worker(route.clone());
            let _ = fresh.tx.send(rejected.0);
            *entry = fresh;
        }
    }

    /// Drop the route's worker, abandoning queued tasks and any
    /// in-flight retry. Used when the session stops.
    pub async fn shutdown_route(&self, route: &RouteKey) {
        if let Some(handle) = self.routes.lock().await.remove(route) {
            handle.worker.abort();
            tracing::debug!(route = %route, "outbox worker stopped");
        }
    }

    fn spawn_worker(&self, route: RouteKey) -> RouteHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = RouteWorker {
            route: route.clone(),
            sender: Arc::clone(&self.sender),
            tuning: self.tuning,
            tool_refs: HashMap::new(),
            status_ref: None,
        };
        tracing::debug!(route = %route, "outbox worker started");
        RouteHandle {
            tx,
            worker: tokio::spawn(worker.run(rx)),
        }
    }
}

/// Sequencing state owned by one route's worker task.
struct RouteWorker {
    route: RouteKey,
    sender: Arc<dyn ChatSender>,
    tuning: Tuning,
    /// tool_id -> (message, original text), consumed by the result.
    tool_refs: HashMap<String, (MessageRef, String)>,
    status_ref: Option<MessageRef>,
}

impl RouteWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<OutboundTask>) {
        let mut pending: Option<OutboundTask> = None;
        loop {
            let task = match pending.take() {
                Some(task) => task,
                None => match rx.recv().await {
                    Some(task) => task,
                    None => break,
                },
            };
            match task {
                OutboundTask::Content { text } => {
                    let (merged, follow) = self.merge_content(text, &mut rx).await;
                    pending = follow;
                    self.deliver_content(&merged).await;
                }
                OutboundTask::ToolUse { text, tool_id } => {
                    self.deliver_tool_use(text, tool_id).await;
                }
                OutboundTask::ToolResult { text, tool_id } => {
                    self.deliver_tool_result(&text, tool_id.as_deref()).await;
                }
                OutboundTask::Status { text } => self.deliver_status(&text).await,
                OutboundTask::StatusClear => self.clear_status().await,
            }
        }
    }

    /// Wait out the merge window, then coalesce directly following
    /// content. A non-content task or the merge bound ends the run;
    /// the task that ended it is handed back for the next iteration.
    async fn merge_content(
        &self,
        first: String,
        rx: &mut mpsc::UnboundedReceiver<OutboundTask>,
    ) -> (String, Option<OutboundTask>) {
        tokio::time::sleep(self.tuning.merge_window).await;
        let mut text = first;
        loop {
            match rx.try_recv() {
                Ok(OutboundTask::Content { text: next }) => {
                    if !text.is_empty() && text.len() + 1 + next.len() > self.tuning.merge_max_len {
                        return (text, Some(OutboundTask::Content { text: next }));
                    }
                    text.push('\n');
                    text.push_str(&next);
                }
                Ok(other) => return (text, Some(other)),
                Err(_) => return (text, None),
            }
        }
    }

    async fn deliver_content(&self, text: &str) {
        for chunk in split_message(text, self.tuning.max_message_len) {
            if let Some(msg) = self.send_with_retry(&chunk, None).await {
                tracing::debug!(route = %self.route, message = %msg, len = chunk.len(), "content delivered");
            }
        }
    }

    async fn deliver_tool_use(&mut self, text: String, tool_id: String) {
        if let Some(msg) = self.send_with_retry(&text, None).await {
            if !tool_id.is_empty() {
                self.tool_refs.insert(tool_id, (msg, text));
            }
        }
    }

    async fn deliver_tool_result(&mut self, outcome: &str, tool_id: Option<&str>) {
        let Some(tool_id) = tool_id else {
            self.send_with_retry(outcome, None).await;
            return;
        };
        let Some((msg, header)) = self.tool_refs.remove(tool_id) else {
            tracing::debug!(route = %self.route, tool_id, "no tracked tool message, dropping result");
            return;
        };
        let text = format!("{header}\n{outcome}");
        if let Err(e) = self.sender.send(&self.route, &text, Some(&msg)).await {
            tracing::warn!(route = %self.route, error = %e, "tool message edit failed, sending fresh");
            self.send_with_retry(&text, None).await;
        }
    }

    async fn deliver_status(&mut self, text: &str) {
        if let Some(existing) = self.status_ref.clone() {
            match self.sender.send(&self.route, text, Some(&existing)).await {
                Ok(_) => return,
                Err(e) => {
                    // Stale ref (message deleted or expired); recreate.
                    tracing::debug!(route = %self.route, error = %e, "status edit failed, recreating");
                    self.status_ref = None;
                }
            }
        }
        self.status_ref = self.send_with_retry(text, None).await;
    }

    async fn clear_status(&mut self) {
        if let Some(msg) = self.status_ref.take() {
            if let Err(e) = self.sender.delete(&self.route, &msg).await {
                tracing::debug!(route = %self.route, error = %e, "status delete failed");
            }
        }
    }

    /// Deliver with exponential backoff on transient failures
    /// (honoring a server-provided retry-after). Permanent rejection
    /// or exhausted attempts drop the message so the queue advances.
    async fn send_with_retry(&self, text: &str, update_of: Option<&MessageRef>) -> Option<MessageRef> {
        for attempt in 0..self.tuning.send_attempts {
            match self.sender.send(&self.route, text, update_of).await {
                Ok(msg) => return Some(msg),
                Err(SendError::Transient { retry_after }) => {
                    if attempt + 1 == self.tuning.send_attempts {
                        tracing::error!(
                            route = %self.route,
                            attempts = self.tuning.send_attempts,
                            "message dropped after repeated transient failures"
                        );
                        return None;
                    }
                    let wait = retry_after.unwrap_or_else(|| Duration::from_secs(1 << attempt));
                    tracing::warn!(
                        route = %self.route,
                        attempt = attempt + 1,
                        wait = ?wait,
                        "transient send failure, backing off"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(SendError::Permanent { reason }) => {
                    tracing::error!(route = %self.route, reason = %reason, "message rejected, dropping");
                    return None;
                }
            }
        }
        None
    }
}
