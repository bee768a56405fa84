// =============================================================================
// Health Store — Per-timeframe tracker registry
// =============================================================================
//
// One `HealthTracker` per configured timeframe, each behind its own
// parking_lot::RwLock so outcome ingestion on one timeframe never blocks
// scoring reads on another.  The key set is fixed at construction; the map
// itself is never mutated afterwards and needs no outer lock.
//
// Reads are infallible: an unknown timeframe yields `None` and callers fall
// back to the warm-up floor.  Writes to an unknown timeframe are errors.
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::engine_config::HealthParams;
use crate::health::tracker::{CoverageHit, HealthMetrics, HealthTracker, PredictionSample};
use crate::types::Timeframe;

/// Storage seam for health trackers.
pub trait HealthStore: Send + Sync {
    /// Timeframes this store owns, fastest first.
    fn timeframes(&self) -> Vec<Timeframe>;

    fn health_score(&self, timeframe: Timeframe) -> Option<f64>;

    fn metrics(&self, timeframe: Timeframe) -> Option<HealthMetrics>;

    /// Fold one sample into the timeframe's tracker and return its new metrics.
    fn record(
        &self,
        timeframe: Timeframe,
        sample: &PredictionSample,
        hit: CoverageHit,
    ) -> Result<HealthMetrics>;

    /// Clone every tracker for persistence.
    fn export(&self) -> BTreeMap<Timeframe, HealthTracker>;

    /// Replace trackers from a previous export. Timeframes the store does not
    /// own are skipped; returns how many were restored.
    fn import(&self, trackers: BTreeMap<Timeframe, HealthTracker>) -> usize;
}

/// Health for `timeframe`, or the configured warm-up floor when unknown.
pub fn health_or_floor(store: &dyn HealthStore, timeframe: Timeframe, floor: f64) -> f64 {
    store.health_score(timeframe).unwrap_or(floor)
}

// =============================================================================
// InMemoryHealthStore
// =============================================================================

pub struct InMemoryHealthStore {
    trackers: HashMap<Timeframe, RwLock<HealthTracker>>,
}

impl InMemoryHealthStore {
    pub fn new(timeframes: &[Timeframe], params: &HealthParams) -> Self {
        let trackers = timeframes
            .iter()
            .map(|tf| (*tf, RwLock::new(HealthTracker::new(params.clone()))))
            .collect();
        Self { trackers }
    }
}

impl HealthStore for InMemoryHealthStore {
    fn timeframes(&self) -> Vec<Timeframe> {
        let mut tfs: Vec<Timeframe> = self.trackers.keys().copied().collect();
        tfs.sort();
        tfs
    }

    fn health_score(&self, timeframe: Timeframe) -> Option<f64> {
        self.trackers
            .get(&timeframe)
            .map(|t| t.read().health_score())
    }

    fn metrics(&self, timeframe: Timeframe) -> Option<HealthMetrics> {
        self.trackers.get(&timeframe).map(|t| t.read().metrics())
    }

    fn record(
        &self,
        timeframe: Timeframe,
        sample: &PredictionSample,
        hit: CoverageHit,
    ) -> Result<HealthMetrics> {
        let lock = self
            .trackers
            .get(&timeframe)
            .ok_or_else(|| anyhow!("no health tracker for timeframe {timeframe}"))?;

        let mut tracker = lock.write();
        tracker.add(sample, hit)?;
        let metrics = tracker.metrics();

        debug!(
            timeframe = %timeframe,
            n = metrics.n,
            score = format!("{:.3}", metrics.score),
            p80 = format!("{:.3}", metrics.p80_coverage),
            "health tracker updated"
        );
        Ok(metrics)
    }

    fn export(&self) -> BTreeMap<Timeframe, HealthTracker> {
        self.trackers
            .iter()
            .map(|(tf, t)| (*tf, t.read().clone()))
            .collect()
    }

    fn import(&self, trackers: BTreeMap<Timeframe, HealthTracker>) -> usize {
        let mut restored = 0;
        for (tf, tracker) in trackers {
            match self.trackers.get(&tf) {
                Some(lock) => {
                    *lock.write() = tracker;
                    restored += 1;
                }
                None => warn!(timeframe = %tf, "snapshot tracker for unconfigured timeframe skipped"),
            }
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(z: f64, correct: bool) -> PredictionSample {
        PredictionSample {
            z,
            realized_sigma: 1.0,
            predicted_sigma: 1.0,
            direction_correct: correct,
        }
    }

    fn store() -> InMemoryHealthStore {
        InMemoryHealthStore::new(&[Timeframe::M5, Timeframe::H1], &HealthParams::default())
    }

    #[test]
    fn unknown_timeframe_reads_fall_back() {
        let s = store();
        assert!(s.health_score(Timeframe::D1).is_none());
        assert!((health_or_floor(&s, Timeframe::D1, 0.6) - 0.6).abs() < 1e-12);
        assert!((health_or_floor(&s, Timeframe::M5, 0.0) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn record_on_unknown_timeframe_errors() {
        let s = store();
        assert!(s
            .record(Timeframe::D1, &sample(0.0, true), CoverageHit::default())
            .is_err());
    }

    #[test]
    fn records_are_isolated_per_timeframe() {
        let s = store();
        for _ in 0..40 {
            s.record(Timeframe::M5, &sample(6.0, false), CoverageHit::default())
                .unwrap();
        }
        assert!(s.health_score(Timeframe::M5).unwrap() < 0.1);
        assert!((s.health_score(Timeframe::H1).unwrap() - 0.6).abs() < 1e-12);
        assert_eq!(s.timeframes(), vec![Timeframe::M5, Timeframe::H1]);
    }

    #[test]
    fn export_import_roundtrip() {
        let s = store();
        for i in 0..35 {
            let z = if i % 2 == 0 { 0.8 } else { -1.1 };
            s.record(Timeframe::H1, &sample(z, i % 3 != 0), CoverageHit::default())
                .unwrap();
        }
        let exported = s.export();

        let fresh = store();
        assert_eq!(fresh.import(exported), 2);
        assert_eq!(fresh.metrics(Timeframe::H1), s.metrics(Timeframe::H1));

        let mut foreign = BTreeMap::new();
        foreign.insert(Timeframe::D1, HealthTracker::default());
        assert_eq!(fresh.import(foreign), 0);
    }
}
