use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::ConnectionState;
use crate::journal::JournalEntry;

/// Detail attached to a status notification raised by the inactivity watchdog.
pub const IDLE_TIMEOUT_DETAIL: &str = "idle-timeout";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: u64,
}

impl StatusUpdate {
    pub fn new(state: ConnectionState, timestamp: u64) -> Self {
        Self {
            state,
            code: None,
            reason: None,
            detail: None,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorNotice {
    pub message: String,
    pub timestamp: u64,
}

/// Pushed to observers for every journal append and state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Message(JournalEntry),
    Status(StatusUpdate),
    Error(ErrorNotice),
}

impl Notification {
    /// Event name on the push stream.
    pub fn event_name(&self) -> &'static str {
        match self {
            Notification::Message(_) => "message",
            Notification::Status(_) => "status",
            Notification::Error(_) => "error",
        }
    }

    pub fn payload_json(&self) -> Result<String, sonic_rs::Error> {
        match self {
            Notification::Message(entry) => sonic_rs::to_string(entry),
            Notification::Status(status) => sonic_rs::to_string(status),
            Notification::Error(error) => sonic_rs::to_string(error),
        }
    }
}

/// Fan-out target for notifications.
pub trait NotificationSink: Send + Sync + 'static {
    fn broadcast(&self, notification: Notification);
}

impl NotificationSink for broadcast::Sender<Notification> {
    fn broadcast(&self, notification: Notification) {
        // No subscribers is not an error.
        let _ = self.send(notification);
    }
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn broadcast(&self, _notification: Notification) {}
}
