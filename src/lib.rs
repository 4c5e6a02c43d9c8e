//! Realtime notifications and best-effort conversion tracking for the rental storefront.
//!
//! [`ws::NotificationClient`] keeps one authenticated notification socket alive and fans
//! its events out to listeners. [`analytics`] records the purchase funnel and experiment
//! assignments and mirrors them to the backend collector without ever blocking the caller.

pub mod analytics;
pub mod config;
pub mod core;
pub mod testing;
pub mod transport;
pub mod ws;

pub use config::{ConfigError, NotificationEndpoint, RealtimeConfig};
pub use crate::core::{EventDispatcher, RealtimeEvent, RealtimeEventKind, Subscription};
pub use ws::{NotificationClient, NotificationInbox};
