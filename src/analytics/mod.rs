//! Best-effort conversion funnel and experiment tracking.

pub mod collector;
pub mod error;
pub mod experiments;
pub mod funnel;
pub mod storage;

pub use collector::{
    AnalyticsEvent, AnalyticsEventType, AnalyticsSink, ConversionData, Delivery, EventData,
    FunnelStageData, HttpCollector, Metadata, SinkFuture,
};
pub use error::{AnalyticsError, StorageError};
pub use experiments::{
    AB_TESTS_KEY, CONVERSION_EVENT_NAME, ConversionHook, DEFAULT_VARIANTS, ExperimentService,
    weighted_index,
};
pub use funnel::{
    EVENTS_KEY, FunnelData, FunnelEvent, FunnelStage, FunnelTracker, SESSION_ID_KEY,
};
pub use storage::{FileStore, MemoryStore, StateStore};
