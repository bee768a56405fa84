// =============================================================================
// Engine State — Hurricane confidence engine
// =============================================================================
//
// Ties the subsystems together and owns all persistent state:
//   - one health tracker per timeframe (behind the `HealthStore` seam)
//   - the feedback loop's weight maps and per-signal accuracy windows
//   - the weight-adjustment audit log
//   - the recent prediction-id window used to reject replayed outcomes
//
// Thread safety:
//   - Atomic counters for lock-free statistics.
//   - parking_lot::RwLock inside each subsystem.
//   - Scoring only reads; outcome ingestion is the single write path, and
//     a per-timeframe mutex makes it one writer per timeframe, so tracker
//     update and weight adjustment land together.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::{AdjustmentLog, RecentIds};
use crate::confidence::ConfidenceScorer;
use crate::engine_config::{write_atomic, EngineConfig};
use crate::health::{
    FeedbackSnapshot, HealthFeedbackLoop, HealthMetrics, HealthStore, HealthTracker, InMemoryHealthStore,
    OutcomeRecord, WeightAdjustment,
};
use crate::pipeline::{run_cycle, CycleContext, CycleReport, CycleRequest};
use crate::signals::{SignalFusionEngine, SignalWeights};
use crate::sizing::{PositionSizer, VolatilityAwareKelly};
use crate::types::Timeframe;

/// Snapshot format version written to disk.
const SNAPSHOT_VERSION: u32 = 1;

// =============================================================================
// Serialisable views
// =============================================================================

/// Everything needed to resume calibration after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub version: u32,
    /// RFC 3339.
    pub created_at: String,
    pub trackers: BTreeMap<Timeframe, HealthTracker>,
    pub feedback: FeedbackSnapshot,
    #[serde(default)]
    pub recent_prediction_ids: Vec<String>,
}

/// Result of ingesting one outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeReceipt {
    pub prediction_id: String,
    pub timeframe: Timeframe,
    pub metrics: HealthMetrics,
    pub adjustments: Vec<WeightAdjustment>,
}

/// Dashboard view of the engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineMetrics {
    pub health: BTreeMap<Timeframe, HealthMetrics>,
    pub weights: BTreeMap<Timeframe, SignalWeights>,
    pub recent_adjustments: Vec<WeightAdjustment>,
    /// Prediction ids currently held for replay detection.
    pub tracked_prediction_ids: usize,
    pub cycles_scored: u64,
    pub outcomes_recorded: u64,
    pub outcomes_rejected: u64,
    pub uptime_secs: u64,
}

// =============================================================================
// EngineState
// =============================================================================

pub struct EngineState {
    config: EngineConfig,
    store: Arc<dyn HealthStore>,
    feedback: HealthFeedbackLoop,
    fusion: SignalFusionEngine,
    scorer: ConfidenceScorer,
    sizer: Box<dyn PositionSizer>,

    adjustments: AdjustmentLog,
    recent_ids: RecentIds,
    ingest_locks: HashMap<Timeframe, Mutex<()>>,

    cycles_scored: AtomicU64,
    outcomes_recorded: AtomicU64,
    outcomes_rejected: AtomicU64,
    start_time: std::time::Instant,
}

impl EngineState {
    /// Build an engine with in-memory trackers for every configured timeframe.
    pub fn new(config: EngineConfig) -> Self {
        let store = Arc::new(InMemoryHealthStore::new(&config.timeframes, &config.health));
        Self::with_store(config, store)
    }

    /// Build an engine on top of an injected health store.
    pub fn with_store(config: EngineConfig, store: Arc<dyn HealthStore>) -> Self {
        let timeframes = store.timeframes();
        let feedback = HealthFeedbackLoop::new(config.feedback.clone(), &timeframes);
        Self {
            fusion: SignalFusionEngine::new(config.fusion.clone()),
            scorer: ConfidenceScorer::new(&config.health),
            sizer: Box::new(VolatilityAwareKelly::new(config.kelly.clone())),
            feedback,
            store,
            adjustments: AdjustmentLog::default(),
            recent_ids: RecentIds::default(),
            ingest_locks: timeframes.into_iter().map(|tf| (tf, Mutex::new(()))).collect(),
            cycles_scored: AtomicU64::new(0),
            outcomes_recorded: AtomicU64::new(0),
            outcomes_rejected: AtomicU64::new(0),
            start_time: std::time::Instant::now(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn HealthStore> {
        &self.store
    }

    // ── Scoring ─────────────────────────────────────────────────────────────

    /// Run one scoring cycle. Never fails; degraded input degrades the report.
    pub fn score_cycle(&self, request: &CycleRequest) -> CycleReport {
        let ctx = CycleContext {
            config: &self.config,
            store: self.store.as_ref(),
            feedback: &self.feedback,
            fusion: &self.fusion,
            scorer: &self.scorer,
            sizer: self.sizer.as_ref(),
        };
        let report = run_cycle(&ctx, request);
        self.cycles_scored.fetch_add(1, Ordering::Relaxed);
        report
    }

    // ── Outcome ingestion ───────────────────────────────────────────────────

    /// Fold a realized outcome into its timeframe's tracker, then run the
    /// feedback loop for that timeframe.
    ///
    /// Errors on an unknown timeframe, a replayed prediction id, or a
    /// malformed record; state is left untouched in each case.
    pub fn record_outcome(&self, outcome: &OutcomeRecord) -> Result<OutcomeReceipt> {
        let result = self.ingest(outcome);
        if let Err(e) = &result {
            self.outcomes_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(prediction = %outcome.prediction_id, error = %e, "outcome rejected");
        }
        result
    }

    fn ingest(&self, outcome: &OutcomeRecord) -> Result<OutcomeReceipt> {
        let tf = outcome.timeframe;
        let (Some(lock), Some(_)) = (self.ingest_locks.get(&tf), self.store.health_score(tf)) else {
            bail!("no health tracker for timeframe {tf}");
        };
        let (sample, hit) = outcome.to_sample()?;
        let _writer = lock.lock();

        if !self.recent_ids.insert(&outcome.prediction_id) {
            bail!("duplicate outcome for prediction {}", outcome.prediction_id);
        }
        let metrics = match self.store.record(tf, &sample, hit) {
            Ok(m) => m,
            Err(e) => {
                self.recent_ids.remove(&outcome.prediction_id);
                return Err(e);
            }
        };

        self.feedback
            .record_signal_outcomes(tf, &outcome.signal_votes, outcome.realized_move());
        let adjustments = self.feedback.adjust_signal_weights(tf, &metrics);
        self.adjustments.extend(&adjustments);
        self.outcomes_recorded.fetch_add(1, Ordering::Relaxed);

        info!(
            prediction = %outcome.prediction_id,
            timeframe = %tf,
            health = format!("{:.3}", metrics.score),
            adjustments = adjustments.len(),
            "outcome recorded"
        );

        Ok(OutcomeReceipt {
            prediction_id: outcome.prediction_id.clone(),
            timeframe: tf,
            metrics,
            adjustments,
        })
    }

    // ── Introspection ───────────────────────────────────────────────────────

    pub fn metrics(&self) -> EngineMetrics {
        let timeframes = self.store.timeframes();
        EngineMetrics {
            health: timeframes
                .iter()
                .filter_map(|tf| self.store.metrics(*tf).map(|m| (*tf, m)))
                .collect(),
            weights: timeframes
                .iter()
                .map(|tf| (*tf, self.feedback.weights_for(*tf)))
                .collect(),
            recent_adjustments: self.adjustments.recent(),
            tracked_prediction_ids: self.recent_ids.len(),
            cycles_scored: self.cycles_scored.load(Ordering::Relaxed),
            outcomes_recorded: self.outcomes_recorded.load(Ordering::Relaxed),
            outcomes_rejected: self.outcomes_rejected.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            version: SNAPSHOT_VERSION,
            created_at: Utc::now().to_rfc3339(),
            trackers: self.store.export(),
            feedback: self.feedback.snapshot(),
            recent_prediction_ids: self.recent_ids.ids(),
        }
    }

    pub fn restore(&self, snapshot: EngineSnapshot) -> Result<()> {
        if snapshot.version != SNAPSHOT_VERSION {
            bail!(
                "unsupported snapshot version {} (expected {})",
                snapshot.version,
                SNAPSHOT_VERSION
            );
        }
        let restored = self.store.import(snapshot.trackers);
        self.feedback.restore(snapshot.feedback);
        for id in &snapshot.recent_prediction_ids {
            self.recent_ids.insert(id);
        }
        info!(
            trackers = restored,
            taken_at = %snapshot.created_at,
            "engine snapshot restored"
        );
        Ok(())
    }

    /// Persist a snapshot to `path` using an atomic write.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string(&self.snapshot()).context("failed to serialise engine snapshot")?;
        write_atomic(path, &content)?;
        info!(path = %path.display(), "engine snapshot saved (atomic)");
        Ok(())
    }

    /// Restore from a snapshot file. Returns `Ok(false)` if none exists.
    pub fn load_snapshot(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(false);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot from {}", path.display()))?;
        let snapshot: EngineSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse snapshot from {}", path.display()))?;
        self.restore(snapshot)?;
        Ok(true)
    }
}
