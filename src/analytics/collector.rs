//! Best-effort delivery of analytics events to the backend collector.
//!
//! Delivery runs on a spawned task and never blocks the caller. The returned
//! [`Delivery`] may be dropped; awaiting it yields the outcome. Failures are logged only in
//! dev mode.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::warn;

use super::error::AnalyticsError;
use crate::config::RealtimeConfig;

/// Free-form event attributes, flattened into the collector payload.
pub type Metadata = BTreeMap<String, sonic_rs::Value>;

pub type SinkFuture = Pin<Box<dyn Future<Output = Result<(), AnalyticsError>> + Send>>;

const COLLECTOR_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsEventType {
    Conversion,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelStageData {
    pub event: &'static str,
    pub stage: &'static str,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionData {
    pub test_name: String,
    pub variant: String,
    #[serde(flatten)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventData {
    FunnelStage(FunnelStageData),
    Conversion(ConversionData),
}

/// Body of `POST /api/analytics/events/`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsEvent {
    pub event_type: AnalyticsEventType,
    pub event_data: EventData,
}

/// Destination for analytics events.
pub trait AnalyticsSink: Send + Sync + 'static {
    fn submit(&self, event: AnalyticsEvent) -> SinkFuture;
}

/// Posts events as JSON to the backend collector.
#[derive(Debug, Clone)]
pub struct HttpCollector {
    client: reqwest::Client,
    url: String,
}

impl HttpCollector {
    pub fn new(url: impl Into<String>) -> Result<Self, AnalyticsError> {
        let client = reqwest::Client::builder()
            .timeout(COLLECTOR_TIMEOUT)
            .build()
            .map_err(|err| AnalyticsError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_config(config: &RealtimeConfig) -> Result<Self, AnalyticsError> {
        Self::new(config.analytics_events_url())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl AnalyticsSink for HttpCollector {
    fn submit(&self, event: AnalyticsEvent) -> SinkFuture {
        let client = self.client.clone();
        let url = self.url.clone();
        Box::pin(async move {
            let body =
                sonic_rs::to_vec(&event).map_err(|err| AnalyticsError::Encode(err.to_string()))?;
            let response = client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await
                .map_err(|err| AnalyticsError::Transport(err.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(AnalyticsError::Status(status.as_u16()));
            }
            Ok(())
        })
    }
}

/// Outcome of a fire-and-forget delivery.
#[derive(Debug)]
pub struct Delivery {
    task: Option<JoinHandle<Result<(), AnalyticsError>>>,
}

impl Delivery {
    pub async fn outcome(self) -> Result<(), AnalyticsError> {
        match self.task {
            Some(task) => task
                .await
                .map_err(|err| AnalyticsError::Transport(err.to_string()))?,
            None => Err(AnalyticsError::NoRuntime),
        }
    }
}

pub(crate) fn dispatch<C>(sink: &C, event: AnalyticsEvent, dev_mode: bool) -> Delivery
where
    C: AnalyticsSink + ?Sized,
{
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        report_failure(dev_mode, &AnalyticsError::NoRuntime);
        return Delivery { task: None };
    };

    let submission = sink.submit(event);
    let task = runtime.spawn(async move {
        let result = submission.await;
        if let Err(err) = &result {
            report_failure(dev_mode, err);
        }
        result
    });
    Delivery { task: Some(task) }
}

pub(crate) fn report_failure(dev_mode: bool, err: &AnalyticsError) {
    if dev_mode {
        warn!(error = %err, "analytics delivery failed");
    }
}
