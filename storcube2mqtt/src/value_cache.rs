use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Local;

use crate::metrics::{MetricKey, Sample, TelemetryReport};

/// Latest-sample store shared between the ingestion loop and whatever
/// presentation layer polls it.
///
/// The whole map sits behind an `ArcSwap`: readers load the current snapshot
/// without taking any lock, so a reader can never stall `store`. A store
/// builds the next map and swaps it in whole; a reader holding the previous
/// snapshot keeps a consistent view, and each key's `Sample` is replaced as
/// one unit, never a partially written mix.
#[derive(Clone)]
pub struct ValueCache {
    inner: Arc<ArcSwap<HashMap<MetricKey, Sample>>>,
}

impl Default for ValueCache {
    fn default() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(HashMap::new())),
        }
    }
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot read of the latest sample for one metric.
    pub fn get(&self, key: MetricKey) -> Option<Sample> {
        self.inner.load().get(&key).cloned()
    }

    /// Overwrites the entry of every metric present in the report; metrics
    /// absent from the report keep their previous sample. `rcu` re-runs the
    /// update if another writer swapped in between, though in practice the
    /// session manager is the only writer.
    pub fn store(&self, report: &TelemetryReport) {
        let received_at = Local::now();
        self.inner.rcu(|current| {
            let mut next = HashMap::clone(current);
            for (key, value) in &report.metrics {
                next.insert(
                    *key,
                    Sample {
                        value: value.clone(),
                        unit: key.unit(),
                        received_at,
                    },
                );
            }
            next
        });
    }

    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::codec::{self, Frame};
    use crate::metrics::MetricValue;

    fn report(frame: &str) -> TelemetryReport {
        match codec::decode(frame.as_bytes()).unwrap() {
            Frame::Report(report) => report,
            Frame::Ack => panic!("expected a report"),
        }
    }

    #[test]
    fn stored_samples_are_readable() {
        let cache = ValueCache::new();
        cache.store(&report(r#"{"equipId":"E1","soc":87,"pv1power":120}"#));

        let soc = cache.get(MetricKey::StateOfCharge).unwrap();
        assert_eq!(soc.value, MetricValue::Number(87.0));
        assert_eq!(soc.unit, Some("%"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn partial_report_keeps_unmentioned_keys() {
        let cache = ValueCache::new();
        cache.store(&report(r#"{"equipId":"E1","power":-250,"soc":90}"#));
        cache.store(&report(r#"{"equipId":"E1","soc":87,"pv1power":120}"#));

        assert_eq!(
            cache.get(MetricKey::StateOfCharge).unwrap().value,
            MetricValue::Number(87.0)
        );
        assert_eq!(
            cache.get(MetricKey::Pv1Power).unwrap().value,
            MetricValue::Number(120.0)
        );
        // battery power was absent from the second frame and must survive
        assert_eq!(
            cache.get(MetricKey::BatteryPower).unwrap().value,
            MetricValue::Number(-250.0)
        );
    }

    #[test]
    fn a_store_proceeds_while_a_reader_holds_the_old_snapshot() {
        let cache = ValueCache::new();
        cache.store(&report(r#"{"equipId":"E1","soc":90}"#));

        // the reader's sample stays valid across the swap and the write
        // completes without waiting on it
        let before = cache.get(MetricKey::StateOfCharge).unwrap();
        cache.store(&report(r#"{"equipId":"E1","soc":10}"#));

        assert_eq!(before.value, MetricValue::Number(90.0));
        assert_eq!(
            cache.get(MetricKey::StateOfCharge).unwrap().value,
            MetricValue::Number(10.0)
        );
    }

    #[test]
    fn writes_are_visible_to_a_concurrent_reader() {
        let cache = ValueCache::new();
        cache.store(&report(r#"{"equipId":"E1","temp":33.5}"#));

        let reader = {
            let cache = cache.clone();
            thread::spawn(move || cache.get(MetricKey::Temperature))
        };
        let seen = reader.join().unwrap().expect("sample must be visible");
        assert_eq!(seen.value, MetricValue::Number(33.5));
        assert_eq!(seen.unit, Some("°C"));
    }
}
