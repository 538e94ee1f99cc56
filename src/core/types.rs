use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::CodecError;

/// Convenience result alias for websocket operations.
pub type WebSocketResult<T> = Result<T, WebSocketError>;

/// Canonical error surface shared across the console.
#[derive(Debug, Error)]
pub enum WebSocketError {
    #[error("Invalid configuration: {}", errors.join(", "))]
    ConfigInvalid { errors: Vec<String> },

    #[error("not connected")]
    NotConnected,

    #[error("Transport error ({context}): {error}")]
    TransportFailure {
        context: &'static str,
        error: String,
    },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error(transparent)]
    Format(#[from] CodecError),

    #[error("Payload too large: {size} bytes (max {max} bytes)")]
    CapacityExceeded { size: usize, max: usize },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(String),
}

impl WebSocketError {
    /// Individual messages for reporting, one per violated invariant when the
    /// error is a validation failure.
    pub fn messages(&self) -> Vec<String> {
        match self {
            WebSocketError::ConfigInvalid { errors } => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}

impl From<sonic_rs::Error> for WebSocketError {
    fn from(err: sonic_rs::Error) -> Self {
        WebSocketError::Serde(err.to_string())
    }
}

/// State of the single upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Closing,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Closing => "CLOSING",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle and traffic events emitted by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Open,
    Close { code: u16, reason: String },
    /// Inbound data frame. Binary payloads are base64 encoded.
    Message { payload: String, is_binary: bool },
    /// Operator-initiated outbound data frame.
    Sent { payload: String, is_binary: bool },
    /// Inbound protocol ping, or an on-demand outbound probe.
    Ping { payload: String },
    Pong { payload: String },
    /// Keep-alive message sent in `message` mode.
    Heartbeat { payload: String },
    Error { message: String },
    IdleTimeout,
}

impl ConnectionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::Open => "open",
            ConnectionEvent::Close { .. } => "close",
            ConnectionEvent::Message { .. } => "message",
            ConnectionEvent::Sent { .. } => "sent",
            ConnectionEvent::Ping { .. } => "ping",
            ConnectionEvent::Pong { .. } => "pong",
            ConnectionEvent::Heartbeat { .. } => "heartbeat",
            ConnectionEvent::Error { .. } => "error",
            ConnectionEvent::IdleTimeout => "idle-timeout",
        }
    }
}

/// A manager event stamped with its emission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Unix epoch milliseconds.
    pub timestamp: u64,
    pub event: ConnectionEvent,
}

impl EventEnvelope {
    pub fn now(event: ConnectionEvent) -> Self {
        Self {
            timestamp: now_epoch_ms(),
            event,
        }
    }
}

/// Best-effort current time as Unix epoch milliseconds.
#[inline]
pub fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}

/// Transport-independent buffer sizing parameters used for websocket configuration.
#[derive(Clone, Copy, Debug)]
pub struct WebSocketBufferConfig {
    pub write_buffer_bytes: usize,
    pub max_write_buffer_bytes: usize,
    pub max_message_bytes: usize,
    pub max_frame_bytes: usize,
}

impl Default for WebSocketBufferConfig {
    fn default() -> Self {
        Self {
            write_buffer_bytes: 128 << 10,
            max_write_buffer_bytes: 64 * 1024 * 1024,
            max_message_bytes: 64 * 1024 * 1024,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

/// TLS configuration for websocket connections.
///
/// Safe-by-default: certificate validation is enabled unless explicitly disabled for development /
/// controlled environments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WsTlsConfig {
    pub validate_certs: bool,
}

impl Default for WsTlsConfig {
    fn default() -> Self {
        Self {
            validate_certs: true,
        }
    }
}

/// Connection statistics snapshot.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WsConnectionStats {
    #[serde(serialize_with = "as_millis")]
    pub uptime: Duration,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub errors: u64,
    pub reconnects: u64,
    #[serde(serialize_with = "as_millis")]
    pub last_activity_age: Duration,
    pub p50_rtt_us: u64,
    pub p99_rtt_us: u64,
    pub rtt_samples: u64,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis().min(u64::MAX as u128) as u64)
}

/// Snapshot answered by the manager for status queries.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub keep_alive_running: bool,
    pub stats: WsConnectionStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_list_every_violation() {
        let err = WebSocketError::ConfigInvalid {
            errors: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Invalid configuration: a, b");
        assert_eq!(err.messages(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(WebSocketError::NotConnected.messages(), vec!["not connected"]);
    }

    #[test]
    fn state_serializes_uppercase() {
        let json = sonic_rs::to_string(&ConnectionState::Connecting).unwrap();
        assert_eq!(json, "\"CONNECTING\"");
        assert_eq!(ConnectionState::Closing.to_string(), "CLOSING");
    }
}
