//! Stable A/B/n variant assignment.
//!
//! Assignments are memoized in memory, pre-loaded from the durable store at
//! construction, and written back (merged with whatever else is stored) before a new
//! assignment is returned.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use super::collector::{
    AnalyticsEvent, AnalyticsEventType, AnalyticsSink, ConversionData, Delivery, EventData,
    Metadata, dispatch,
};
use super::error::StorageError;
use super::storage::StateStore;

pub const AB_TESTS_KEY: &str = "ab_tests";
pub const DEFAULT_VARIANTS: [&str; 2] = ["A", "B"];
pub const CONVERSION_EVENT_NAME: &str = "ab_test_conversion";

/// In-process analytics hook notified on every conversion.
pub trait ConversionHook: Send + Sync + 'static {
    fn record(&self, event_name: &str, test_name: &str, variant: &str, metadata: &Metadata);
}

pub struct ExperimentService<S, C> {
    store: S,
    sink: C,
    dev_mode: bool,
    hook: Option<Box<dyn ConversionHook>>,
    assignments: Mutex<HashMap<String, String>>,
    rng: Mutex<SmallRng>,
}

impl<S, C> ExperimentService<S, C>
where
    S: StateStore,
    C: AnalyticsSink,
{
    pub fn new(store: S, sink: C, dev_mode: bool) -> Self {
        let assignments = load_assignments(&store)
            .unwrap_or_else(|err| {
                warn!(error = %err, "ignoring unreadable experiment assignments");
                BTreeMap::new()
            })
            .into_iter()
            .collect();

        Self {
            store,
            sink,
            dev_mode,
            hook: None,
            assignments: Mutex::new(assignments),
            rng: Mutex::new(SmallRng::from_entropy()),
        }
    }

    pub fn with_hook(mut self, hook: impl ConversionHook) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Deterministic draws, for tests and replays.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(SmallRng::seed_from_u64(seed));
        self
    }

    /// Variant for `test_name`; drawn and persisted on first use, returned unchanged after.
    ///
    /// An empty `variants` slice means `["A", "B"]`. `weights` are ignored unless there is one
    /// per variant and their total is positive.
    pub fn variant(&self, test_name: &str, variants: &[&str], weights: Option<&[f64]>) -> String {
        let mut assignments = self.assignments.lock();
        if let Some(existing) = assignments.get(test_name) {
            return existing.clone();
        }

        let variants = if variants.is_empty() {
            &DEFAULT_VARIANTS[..]
        } else {
            variants
        };

        let index = {
            let mut rng = self.rng.lock();
            match usable_weights(test_name, variants, weights) {
                Some((weights, total)) => weighted_index(weights, rng.r#gen::<f64>() * total),
                None => rng.gen_range(0..variants.len()),
            }
        };
        let chosen = variants[index].to_string();

        assignments.insert(test_name.to_string(), chosen.clone());
        if let Err(err) = self.persist(test_name, &chosen) {
            warn!(error = %err, test = test_name, "failed to persist experiment assignment");
        }

        debug!(test = test_name, variant = %chosen, "experiment variant assigned");
        chosen
    }

    pub fn assignments(&self) -> BTreeMap<String, String> {
        self.assignments
            .lock()
            .iter()
            .map(|(test, variant)| (test.clone(), variant.clone()))
            .collect()
    }

    /// Notifies the hook, then posts a `conversion` event to the collector.
    pub fn track_conversion(
        &self,
        test_name: &str,
        variant: &str,
        metadata: Option<Metadata>,
    ) -> Delivery {
        let metadata = metadata.unwrap_or_default();
        if let Some(hook) = &self.hook {
            hook.record(CONVERSION_EVENT_NAME, test_name, variant, &metadata);
        }

        let event = AnalyticsEvent {
            event_type: AnalyticsEventType::Conversion,
            event_data: EventData::Conversion(ConversionData {
                test_name: test_name.to_string(),
                variant: variant.to_string(),
                metadata,
            }),
        };
        dispatch(&self.sink, event, self.dev_mode)
    }

    fn persist(&self, test_name: &str, variant: &str) -> Result<(), StorageError> {
        // Another writer may have stored tests this instance has never seen.
        let mut stored = load_assignments(&self.store).unwrap_or_default();
        stored.insert(test_name.to_string(), variant.to_string());

        let raw = sonic_rs::to_string(&stored).map_err(|err| StorageError::Corrupt {
            key: AB_TESTS_KEY.to_string(),
            message: err.to_string(),
        })?;
        self.store.set(AB_TESTS_KEY, &raw)
    }
}

fn usable_weights<'a>(
    test_name: &str,
    variants: &[&str],
    weights: Option<&'a [f64]>,
) -> Option<(&'a [f64], f64)> {
    let weights = weights?;
    if weights.len() != variants.len() {
        warn!(
            test = test_name,
            variants = variants.len(),
            weights = weights.len(),
            "weight count does not match variants; drawing uniformly"
        );
        return None;
    }

    let total: f64 = weights.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        warn!(test = test_name, total, "weights do not sum to a positive total; drawing uniformly");
        return None;
    }
    Some((weights, total))
}

/// Single pass over `weights`, subtracting each from `roll` until it reaches zero.
/// Falls back to the first index when rounding leaves `roll` positive.
pub fn weighted_index(weights: &[f64], roll: f64) -> usize {
    let mut remaining = roll;
    for (index, weight) in weights.iter().enumerate() {
        remaining -= weight;
        if remaining <= 0.0 {
            return index;
        }
    }
    0
}

fn load_assignments<S: StateStore>(store: &S) -> Result<BTreeMap<String, String>, StorageError> {
    match store.get(AB_TESTS_KEY)? {
        Some(raw) => sonic_rs::from_str(&raw).map_err(|err| StorageError::Corrupt {
            key: AB_TESTS_KEY.to_string(),
            message: err.to_string(),
        }),
        None => Ok(BTreeMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::analytics::storage::MemoryStore;
    use crate::testing::RecordingSink;

    fn service(store: Arc<MemoryStore>) -> ExperimentService<Arc<MemoryStore>, RecordingSink> {
        ExperimentService::new(store, RecordingSink::new(), false).with_seed(7)
    }

    #[test]
    fn weighted_index_walks_weights_in_order() {
        let weights = [90.0, 10.0];
        assert_eq!(weighted_index(&weights, 0.0), 0);
        assert_eq!(weighted_index(&weights, 45.0), 0);
        assert_eq!(weighted_index(&weights, 90.0), 0);
        assert_eq!(weighted_index(&weights, 90.5), 1);
        assert_eq!(weighted_index(&weights, 100.0), 1);
        // Rounding overshoot.
        assert_eq!(weighted_index(&weights, 100.000001), 0);
    }

    #[test]
    fn assignment_is_memoized() {
        let service = service(Arc::new(MemoryStore::new()));
        let first = service.variant("banner_test", &["A", "B"], None);
        for _ in 0..20 {
            assert_eq!(service.variant("banner_test", &["A", "B"], None), first);
        }
    }

    #[test]
    fn assignments_persist_and_merge() {
        let store = Arc::new(MemoryStore::new());
        store.set(AB_TESTS_KEY, r#"{"legacy_test":"control"}"#).unwrap();

        let first = service(Arc::clone(&store));
        let chosen = first.variant("checkout_copy", &["short", "long"], None);
        drop(first);

        let raw = store.get(AB_TESTS_KEY).unwrap().unwrap();
        let stored: BTreeMap<String, String> = sonic_rs::from_str(&raw).unwrap();
        assert_eq!(stored.get("legacy_test").map(String::as_str), Some("control"));
        assert_eq!(stored.get("checkout_copy"), Some(&chosen));

        let reloaded = service(store);
        assert_eq!(
            reloaded.variant("checkout_copy", &["short", "long"], None),
            chosen
        );
        assert_eq!(reloaded.assignments().len(), 2);
    }

    #[test]
    fn empty_variants_default_to_a_b() {
        let service = service(Arc::new(MemoryStore::new()));
        let chosen = service.variant("default_test", &[], None);
        assert!(chosen == "A" || chosen == "B");
    }

    #[test]
    fn mismatched_or_zero_weights_draw_uniformly() {
        let service = service(Arc::new(MemoryStore::new()));
        let variants = ["A", "B", "C"];
        for i in 0..30 {
            let chosen = service.variant(&format!("mismatch_{i}"), &variants, Some(&[1.0]));
            assert!(variants.contains(&chosen.as_str()));
            let chosen = service.variant(&format!("zero_{i}"), &variants, Some(&[0.0, 0.0, 0.0]));
            assert!(variants.contains(&chosen.as_str()));
        }
    }

    #[test]
    fn single_weighted_variant_always_wins() {
        let service = service(Arc::new(MemoryStore::new()));
        for i in 0..50 {
            assert_eq!(
                service.variant(&format!("t{i}"), &["A", "B"], Some(&[0.0, 5.0])),
                "B"
            );
        }
    }

    #[test]
    fn ninety_ten_split_is_roughly_ninety_percent_a() {
        let service = service(Arc::new(MemoryStore::new()));
        let draws = 2_000;
        let a_count = (0..draws)
            .filter(|i| {
                service.variant(&format!("weighted_test_{i}"), &["A", "B"], Some(&[90.0, 10.0]))
                    == "A"
            })
            .count();

        let share = a_count as f64 / draws as f64;
        assert!((0.86..=0.94).contains(&share), "A share was {share}");
    }

    #[tokio::test]
    async fn conversion_notifies_hook_then_posts() {
        #[derive(Clone, Default)]
        struct Hook(Arc<Mutex<Vec<(String, String, String)>>>);
        impl ConversionHook for Hook {
            fn record(&self, event_name: &str, test_name: &str, variant: &str, _: &Metadata) {
                self.0.lock().push((
                    event_name.to_string(),
                    test_name.to_string(),
                    variant.to_string(),
                ));
            }
        }

        let hook = Hook::default();
        let sink = RecordingSink::new();
        let service = ExperimentService::new(Arc::new(MemoryStore::new()), sink.clone(), false)
            .with_hook(hook.clone());

        service
            .track_conversion("banner_test", "B", None)
            .outcome()
            .await
            .unwrap();

        assert_eq!(
            hook.0.lock().as_slice(),
            &[(
                CONVERSION_EVENT_NAME.to_string(),
                "banner_test".to_string(),
                "B".to_string()
            )]
        );
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AnalyticsEventType::Conversion);
    }
}
