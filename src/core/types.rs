use std::time::Duration;

use thiserror::Error;

/// Convenience result alias for websocket operations.
pub type WebSocketResult<T> = Result<T, WebSocketError>;

/// Canonical websocket error surface shared across the notification client.
#[derive(Debug, Error)]
pub enum WebSocketError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error ({context}): {error}")]
    TransportError {
        context: &'static str,
        error: String,
    },

    #[error("Parse failed: {0}")]
    ParseFailed(String),

    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    #[error("Actor error: {0}")]
    ActorError(String),
}

/// High-level websocket connection status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WsConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Canonical disconnect causes enumerated by the connection manager.
#[derive(Debug, Clone)]
pub enum WsDisconnectCause {
    RemoteClosed { code: Option<u16>, reason: String },
    ReadFailure { error: String },
    HandshakeFailed { message: String },
    StreamEnded,
}

impl WsDisconnectCause {
    /// Errors worth surfacing to listeners; clean closes are not errors.
    pub fn error_description(&self) -> Option<String> {
        match self {
            WsDisconnectCause::ReadFailure { error } => Some(format!("read failure: {error}")),
            WsDisconnectCause::HandshakeFailed { message } => {
                Some(format!("handshake failed: {message}"))
            }
            WsDisconnectCause::RemoteClosed { .. } | WsDisconnectCause::StreamEnded => None,
        }
    }
}

/// Reconnect policy consulted by the connection manager after an unexpected close.
pub trait WsReconnectStrategy: Send + Sync + 'static {
    /// Count the next attempt and return how long to wait before making it.
    fn next_delay(&mut self) -> Duration;
    /// Forget previous attempts (successful open or explicit disconnect).
    fn reset(&mut self);
    fn should_retry(&self) -> bool;
    /// Attempts counted since the last reset.
    fn attempts(&self) -> u32;
}

/// Basic connection statistics snapshot.
#[derive(Clone, Debug, Default)]
pub struct WsConnectionStats {
    pub uptime: Duration,
    pub messages: u64,
    pub notifications: u64,
    pub dropped_frames: u64,
    pub errors: u64,
    pub reconnects: u64,
    pub pings_sent: u64,
    pub last_message_age: Duration,
    pub p50_heartbeat_rtt_us: u64,
    pub p99_heartbeat_rtt_us: u64,
    pub rtt_samples: u64,
}
