//! In-process fan-out of execution events, backed by a `tokio::sync::broadcast`
//! channel.
//!
//! Delivery is best-effort: there is no replay, so a subscriber only sees
//! events published after it subscribed. Publishing never blocks; when a
//! subscriber falls more than the channel capacity behind, its oldest
//! undelivered events are dropped and it observes `RecvError::Lagged`.

use crate::models::{ExecutionLog, ExecutionStatus, LogKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

pub const STATUS_TOPIC: &str = "/topic/status";
pub const PROGRESS_TOPIC: &str = "/topic/progress";
pub const CONSOLE_TOPIC: &str = "/topic/console";

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub execution_id: String,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub execution_id: String,
    pub progress: f64,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleOutput {
    pub execution_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: LogKind,
}

impl From<ExecutionLog> for ConsoleOutput {
    fn from(log: ExecutionLog) -> Self {
        Self {
            execution_id: log.execution_id,
            message: log.message,
            timestamp: log.timestamp,
            kind: log.kind,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum EventPayload {
    Status(StatusUpdate),
    Progress(ProgressUpdate),
    Output(ConsoleOutput),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub topic: String,
    pub payload: EventPayload,
}

#[derive(Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<Notification>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes to every current subscriber. With no subscribers the event is dropped.
    pub fn publish(&self, topic: &str, payload: EventPayload) {
        let notification = Notification {
            topic: topic.to_string(),
            payload,
        };
        // SendError only means there are zero receivers.
        let _ = self.sender.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn send_status_update(&self, execution_id: &str, status: ExecutionStatus) {
        tracing::debug!(execution_id, status = status.as_str(), "Sending status update");
        self.publish(
            STATUS_TOPIC,
            EventPayload::Status(StatusUpdate {
                execution_id: execution_id.to_string(),
                status,
            }),
        );
    }

    pub fn send_progress_update(&self, execution_id: &str, progress: f64, status: ExecutionStatus) {
        tracing::debug!(execution_id, progress, "Sending progress update");
        self.publish(
            PROGRESS_TOPIC,
            EventPayload::Progress(ProgressUpdate {
                execution_id: execution_id.to_string(),
                progress,
                status,
            }),
        );
    }

    pub fn send_console_output(&self, output: ConsoleOutput) {
        self.publish(CONSOLE_TOPIC, EventPayload::Output(output));
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
