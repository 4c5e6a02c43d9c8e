use std::time::{Duration, Instant};

use super::frame::WsFrame;
use super::protocol::PING_FRAME;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Heartbeat contract used by the connection manager.
///
/// The manager decides *when* to ping (interval ticks while connected); the strategy
/// decides *what* to send and how to interpret pongs.
pub trait WsPingPongStrategy: Send + Sync + 'static {
    fn create_ping(&mut self) -> Option<WsFrame>;
    /// Record a pong and return the round trip since the last ping, if one is outstanding.
    fn record_pong(&mut self) -> Option<Duration>;
    fn reset(&mut self);
    fn interval(&self) -> Duration;
}

/// Application-level heartbeat: `{"type":"ping"}` out, `{"type":"pong"}` back.
#[derive(Debug, Clone)]
pub struct JsonHeartbeat {
    interval: Duration,
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
}

impl JsonHeartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_ping: None,
            last_pong: None,
        }
    }

    pub fn last_pong(&self) -> Option<Instant> {
        self.last_pong
    }
}

impl Default for JsonHeartbeat {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}

impl WsPingPongStrategy for JsonHeartbeat {
    fn create_ping(&mut self) -> Option<WsFrame> {
        self.last_ping = Some(Instant::now());
        Some(WsFrame::text_static(PING_FRAME))
    }

    fn record_pong(&mut self) -> Option<Duration> {
        let now = Instant::now();
        // Only the first pong after a ping yields a sample.
        let rtt = match (self.last_ping, self.last_pong) {
            (Some(sent), Some(prev)) if prev >= sent => None,
            (Some(sent), _) => Some(now.saturating_duration_since(sent)),
            (None, _) => None,
        };
        self.last_pong = Some(now);
        rtt
    }

    fn reset(&mut self) {
        self.last_ping = None;
        self.last_pong = None;
    }

    fn interval(&self) -> Duration {
        self.interval
    }
}
