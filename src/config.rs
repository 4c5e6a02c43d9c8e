//! Client configuration.
//!
//! Values come from environment variables (`GALA_API_URL`, `GALA_WS_HOST`,
//! `GALA_WS_SECURE`, `GALA_ENV`, `GALA_WS_RECONNECT_BASE_MS`,
//! `GALA_WS_MAX_RECONNECT_ATTEMPTS`, `GALA_WS_HEARTBEAT_SECS`) with defaults for anything unset.

use std::time::Duration;

use thiserror::Error;

use crate::core::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY,
};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
const ANALYTICS_EVENTS_PATH: &str = "/api/analytics/events/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidEnv(&'static str, &'static str),
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Backend origin, e.g. `https://api.readyrent.gala`.
    pub api_base_url: String,
    /// Websocket host (`host[:port]`). Inferred from `api_base_url` when unset.
    pub ws_host: Option<String>,
    /// Force `wss`/`ws`. Inferred from the `api_base_url` scheme when unset.
    pub ws_secure: Option<bool>,
    pub reconnect_base_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
    /// Development build: analytics delivery failures are logged instead of swallowed.
    pub dev_mode: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            ws_host: None,
            ws_secure: None,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            dev_mode: false,
        }
    }
}

impl RealtimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` uses the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("GALA_API_URL")
            && !url.trim().is_empty()
        {
            config.api_base_url = url.trim().trim_end_matches('/').to_string();
        }

        if let Some(host) = lookup("GALA_WS_HOST")
            && !host.trim().is_empty()
        {
            config.ws_host = Some(host.trim().to_string());
        }

        if let Some(secure) = lookup("GALA_WS_SECURE") {
            config.ws_secure = Some(
                parse_bool(&secure)
                    .ok_or(ConfigError::InvalidEnv("GALA_WS_SECURE", "expected true/false"))?,
            );
        }

        if let Some(ms) = lookup("GALA_WS_RECONNECT_BASE_MS") {
            let ms: u64 = ms
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("GALA_WS_RECONNECT_BASE_MS", "expected u64"))?;
            config.reconnect_base_delay = Duration::from_millis(ms);
        }

        if let Some(attempts) = lookup("GALA_WS_MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = attempts.trim().parse().map_err(|_| {
                ConfigError::InvalidEnv("GALA_WS_MAX_RECONNECT_ATTEMPTS", "expected u32")
            })?;
        }

        if let Some(secs) = lookup("GALA_WS_HEARTBEAT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("GALA_WS_HEARTBEAT_SECS", "expected u64"))?;
            config.heartbeat_interval = Duration::from_secs(secs);
        }

        if let Some(env) = lookup("GALA_ENV") {
            config.dev_mode = env.trim().eq_ignore_ascii_case("development");
        }

        Ok(config)
    }

    pub fn notification_endpoint(&self) -> NotificationEndpoint {
        let secure = self
            .ws_secure
            .unwrap_or_else(|| self.api_base_url.starts_with("https://"));
        let host = self
            .ws_host
            .clone()
            .unwrap_or_else(|| host_of(&self.api_base_url).to_string());
        NotificationEndpoint::new(host, secure)
    }

    pub fn analytics_events_url(&self) -> String {
        format!(
            "{}{}",
            self.api_base_url.trim_end_matches('/'),
            ANALYTICS_EVENTS_PATH
        )
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// `host[:port]` part of an absolute URL.
fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    &rest[..end]
}

/// Address of the per-user notification socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEndpoint {
    host: String,
    secure: bool,
}

impl NotificationEndpoint {
    pub fn new(host: impl Into<String>, secure: bool) -> Self {
        Self {
            host: host.into(),
            secure,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn url(&self, user_id: u64) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}/ws/notifications/{user_id}/", self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_policy() {
        let config = RealtimeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.reconnect_base_delay, Duration::from_millis(1000));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(!config.dev_mode);
        assert_eq!(
            config.notification_endpoint().url(7),
            "ws://localhost:8000/ws/notifications/7/"
        );
        assert_eq!(
            config.analytics_events_url(),
            "http://localhost:8000/api/analytics/events/"
        );
    }

    #[test]
    fn secure_scheme_is_inferred_from_api_url() {
        let config = RealtimeConfig::from_lookup(lookup(&[(
            "GALA_API_URL",
            "https://api.readyrent.gala/",
        )]))
        .unwrap();
        let endpoint = config.notification_endpoint();
        assert!(endpoint.is_secure());
        assert_eq!(
            endpoint.url(12),
            "wss://api.readyrent.gala/ws/notifications/12/"
        );
        assert_eq!(
            config.analytics_events_url(),
            "https://api.readyrent.gala/api/analytics/events/"
        );
    }

    #[test]
    fn explicit_host_and_scheme_win() {
        let config = RealtimeConfig::from_lookup(lookup(&[
            ("GALA_API_URL", "https://api.readyrent.gala"),
            ("GALA_WS_HOST", "ws.readyrent.gala:9443"),
            ("GALA_WS_SECURE", "false"),
            ("GALA_ENV", "development"),
        ]))
        .unwrap();
        assert_eq!(
            config.notification_endpoint().url(3),
            "ws://ws.readyrent.gala:9443/ws/notifications/3/"
        );
        assert!(config.dev_mode);
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = RealtimeConfig::from_lookup(lookup(&[("GALA_WS_MAX_RECONNECT_ATTEMPTS", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv("GALA_WS_MAX_RECONNECT_ATTEMPTS", _)
        ));
    }

    #[test]
    fn host_extraction_ignores_path_and_query() {
        assert_eq!(host_of("http://example.com:8000/api?x=1"), "example.com:8000");
        assert_eq!(host_of("example.com"), "example.com");
    }
}
