use std::time::Duration;

use super::types::WsReconnectStrategy;

pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Linear backoff with a bounded number of attempts.
///
/// Attempt `n` waits `n * base`. No jitter. Once `max_attempts` have been counted the
/// strategy refuses further retries until `reset`.
#[derive(Clone, Debug)]
pub struct LinearBackoffReconnect {
    base: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl LinearBackoffReconnect {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempts: 0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for LinearBackoffReconnect {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_BASE_DELAY, DEFAULT_MAX_RECONNECT_ATTEMPTS)
    }
}

impl WsReconnectStrategy for LinearBackoffReconnect {
    fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        self.base.saturating_mul(self.attempts)
    }

    fn reset(&mut self) {
        self.attempts = 0;
    }

    fn should_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    fn attempts(&self) -> u32 {
        self.attempts
    }
}
