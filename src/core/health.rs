use hdrhistogram::Histogram;
use std::time::{Duration, Instant};

use super::types::WsConnectionStats;

/// Connection health counters owned by the connection manager.
#[derive(Debug)]
pub struct WsHealthMonitor {
    connection_started: Instant,
    last_message_received: Instant,
    message_count: u64,
    notification_count: u64,
    dropped_frames: u64,
    error_count: u64,
    reconnect_count: u64,
    pings_sent: u64,
    rtt_histogram: Option<Histogram<u64>>,
}

impl Default for WsHealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl WsHealthMonitor {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            connection_started: now,
            last_message_received: now,
            message_count: 0,
            notification_count: 0,
            dropped_frames: 0,
            error_count: 0,
            reconnect_count: 0,
            pings_sent: 0,
            // 1us..60s at 3 significant figures; these bounds are always valid.
            rtt_histogram: Histogram::new_with_bounds(1, 60_000_000, 3).ok(),
        }
    }

    /// Restart uptime/age tracking for a freshly opened socket.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.connection_started = now;
        self.last_message_received = now;
    }

    pub fn record_message(&mut self) {
        self.last_message_received = Instant::now();
        self.message_count = self.message_count.saturating_add(1);
    }

    pub fn record_notification(&mut self) {
        self.notification_count = self.notification_count.saturating_add(1);
    }

    pub fn record_dropped_frame(&mut self) {
        self.dropped_frames = self.dropped_frames.saturating_add(1);
    }

    pub fn record_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }

    pub fn record_ping(&mut self) {
        self.pings_sent = self.pings_sent.saturating_add(1);
    }

    pub fn record_rtt(&mut self, rtt: Duration) {
        let micros = rtt.as_micros().clamp(1, u64::MAX as u128) as u64;
        if let Some(histogram) = self.rtt_histogram.as_mut() {
            let _ = histogram.saturating_record(micros);
        }
    }

    pub fn increment_reconnect(&mut self) {
        self.reconnect_count = self.reconnect_count.saturating_add(1);
    }

    pub fn get_stats(&self) -> WsConnectionStats {
        let (samples, p50, p99) = match self.rtt_histogram.as_ref() {
            Some(h) if h.len() > 0 => (
                h.len(),
                h.value_at_percentile(50.0),
                h.value_at_percentile(99.0),
            ),
            _ => (0, 0, 0),
        };

        WsConnectionStats {
            uptime: self.connection_started.elapsed(),
            messages: self.message_count,
            notifications: self.notification_count,
            dropped_frames: self.dropped_frames,
            errors: self.error_count,
            reconnects: self.reconnect_count,
            pings_sent: self.pings_sent,
            last_message_age: self.last_message_received.elapsed(),
            p50_heartbeat_rtt_us: p50,
            p99_heartbeat_rtt_us: p99,
            rtt_samples: samples,
        }
    }
}
