//! Per-session purchase funnel.
//!
//! Every tracked stage is appended to an in-memory log mirrored into the session
//! [`StateStore`], then posted to the collector without waiting for the result.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::collector::{
    AnalyticsEvent, AnalyticsEventType, AnalyticsSink, Delivery, EventData, FunnelStageData,
    Metadata, dispatch,
};
use super::error::StorageError;
use super::storage::StateStore;

pub const SESSION_ID_KEY: &str = "funnel_session_id";
pub const EVENTS_KEY: &str = "funnel_events";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelStage {
    Landing,
    ProductView,
    CartAdd,
    CheckoutStart,
    PaymentInitiated,
    BookingCompleted,
}

impl FunnelStage {
    /// Stages in funnel order.
    pub const ALL: [FunnelStage; 6] = [
        FunnelStage::Landing,
        FunnelStage::ProductView,
        FunnelStage::CartAdd,
        FunnelStage::CheckoutStart,
        FunnelStage::PaymentInitiated,
        FunnelStage::BookingCompleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FunnelStage::Landing => "landing",
            FunnelStage::ProductView => "product_view",
            FunnelStage::CartAdd => "cart_add",
            FunnelStage::CheckoutStart => "checkout_start",
            FunnelStage::PaymentInitiated => "payment_initiated",
            FunnelStage::BookingCompleted => "booking_completed",
        }
    }

    pub fn previous(self) -> Option<FunnelStage> {
        let index = Self::ALL.iter().position(|stage| *stage == self)?;
        index.checked_sub(1).map(|prev| Self::ALL[prev])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelEvent {
    pub stage: FunnelStage,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunnelData {
    pub stages: BTreeMap<FunnelStage, u64>,
    /// Percentage lost relative to the previous stage.
    pub drop_off_rates: BTreeMap<FunnelStage, f64>,
    pub conversion_rate: f64,
}

impl FunnelData {
    pub fn from_events(events: &[FunnelEvent]) -> Self {
        let mut stages: BTreeMap<FunnelStage, u64> =
            FunnelStage::ALL.iter().map(|stage| (*stage, 0)).collect();
        for event in events {
            *stages.entry(event.stage).or_default() += 1;
        }

        let drop_off_rates = FunnelStage::ALL
            .iter()
            .map(|stage| {
                let current = stages[stage];
                let rate = match stage.previous().map(|prev| stages[&prev]) {
                    Some(previous) if previous > 0 => {
                        (previous as f64 - current as f64) / previous as f64 * 100.0
                    }
                    _ => 0.0,
                };
                (*stage, rate)
            })
            .collect();

        let landings = stages[&FunnelStage::Landing];
        let conversion_rate = if landings > 0 {
            stages[&FunnelStage::BookingCompleted] as f64 / landings as f64 * 100.0
        } else {
            0.0
        };

        Self {
            stages,
            drop_off_rates,
            conversion_rate,
        }
    }

    pub fn count(&self, stage: FunnelStage) -> u64 {
        self.stages.get(&stage).copied().unwrap_or(0)
    }

    pub fn drop_off(&self, stage: FunnelStage) -> f64 {
        self.drop_off_rates.get(&stage).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Default)]
struct FunnelState {
    session_id: Option<String>,
    events: Vec<FunnelEvent>,
}

pub struct FunnelTracker<S, C> {
    store: S,
    sink: C,
    dev_mode: bool,
    state: Mutex<FunnelState>,
}

impl<S, C> FunnelTracker<S, C>
where
    S: StateStore,
    C: AnalyticsSink,
{
    /// Resumes the session already recorded in `store`, if any.
    pub fn new(store: S, sink: C, dev_mode: bool) -> Self {
        let session_id = store.get(SESSION_ID_KEY).unwrap_or_else(|err| {
            warn!(error = %err, "failed to read funnel session id");
            None
        });
        let events = load_events(&store).unwrap_or_else(|err| {
            warn!(error = %err, "discarding unreadable funnel log");
            Vec::new()
        });

        Self {
            store,
            sink,
            dev_mode,
            state: Mutex::new(FunnelState { session_id, events }),
        }
    }

    pub fn track_stage(&self, stage: FunnelStage, metadata: Option<Metadata>) -> Delivery {
        let event = {
            let mut state = self.state.lock();
            let session_id = self.ensure_session_id(&mut state);
            let event = FunnelEvent {
                stage,
                session_id,
                timestamp: Utc::now(),
                metadata,
            };
            state.events.push(event.clone());
            if let Err(err) = persist_events(&self.store, &state.events) {
                warn!(error = %err, stage = stage.as_str(), "failed to persist funnel log");
            }
            event
        };

        debug!(stage = stage.as_str(), session_id = %event.session_id, "funnel stage tracked");

        let payload = AnalyticsEvent {
            event_type: AnalyticsEventType::Other,
            event_data: EventData::FunnelStage(FunnelStageData {
                event: "funnel_stage",
                stage: stage.as_str(),
                session_id: event.session_id,
                timestamp: event.timestamp,
                metadata: event.metadata.unwrap_or_default(),
            }),
        };
        dispatch(&self.sink, payload, self.dev_mode)
    }

    pub fn funnel_data(&self) -> FunnelData {
        FunnelData::from_events(&self.state.lock().events)
    }

    pub fn events(&self) -> Vec<FunnelEvent> {
        self.state.lock().events.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.lock().session_id.clone()
    }

    /// Forgets the log and the session id; the next tracked stage starts a new session.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.events.clear();
        state.session_id = None;
        for key in [EVENTS_KEY, SESSION_ID_KEY] {
            if let Err(err) = self.store.remove(key) {
                warn!(error = %err, key, "failed to clear funnel storage");
            }
        }
    }

    fn ensure_session_id(&self, state: &mut FunnelState) -> String {
        if let Some(id) = &state.session_id {
            return id.clone();
        }

        let id = Uuid::new_v4().to_string();
        if let Err(err) = self.store.set(SESSION_ID_KEY, &id) {
            warn!(error = %err, "failed to persist funnel session id");
        }
        state.session_id = Some(id.clone());
        id
    }
}

fn load_events<S: StateStore>(store: &S) -> Result<Vec<FunnelEvent>, StorageError> {
    match store.get(EVENTS_KEY)? {
        Some(raw) => sonic_rs::from_str(&raw).map_err(|err| StorageError::Corrupt {
            key: EVENTS_KEY.to_string(),
            message: err.to_string(),
        }),
        None => Ok(Vec::new()),
    }
}

fn persist_events<S: StateStore>(store: &S, events: &[FunnelEvent]) -> Result<(), StorageError> {
    let raw = sonic_rs::to_string(events).map_err(|err| StorageError::Corrupt {
        key: EVENTS_KEY.to_string(),
        message: err.to_string(),
    })?;
    store.set(EVENTS_KEY, &raw)
}
