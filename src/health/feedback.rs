// =============================================================================
// Health Feedback Loop — Re-weight signals from realized accuracy
// =============================================================================
//
// Closes the loop between outcome realization and signal fusion.  After each
// outcome the loop reads the timeframe's health metrics (never mutating the
// tracker) together with per-signal rolling accuracy, and rewrites that
// timeframe's weight map.  The fusion engine picks the new map up on the
// next cycle.
//
// Per cycle, for each catalogue signal:
//   1. Timeframe level
//        health < 0.5                       → w × (0.5 + health)
//        health > 0.8 and accuracy > 0.7    → w × (1 + 0.1·g),
//                                             g = clamp((health − 0.8)/0.2)
//   2. Signal level (≥ 20 attributed outcomes in a 50-outcome window)
//        accuracy < 0.4 → w × 0.5
//        accuracy > 0.7 → w × 1.2
//   3. Clamp to [0.05, 0.35], then renormalise to sum 1.
//
// Every weight that moves is recorded as a `WeightAdjustment` and logged.
// =============================================================================

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine_config::FeedbackParams;
use crate::health::outcome::{SignalVote, NEUTRAL_BAND};
use crate::health::tracker::HealthMetrics;
use crate::signals::{SignalSource, SignalWeights};
use crate::types::Timeframe;

/// Smallest weight change worth recording.
const MIN_RECORDED_CHANGE: f64 = 1e-9;

// =============================================================================
// Types
// =============================================================================

/// One recorded weight change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightAdjustment {
    pub timeframe: Timeframe,
    pub source: SignalSource,
    pub old_weight: f64,
    pub new_weight: f64,
    pub cause: String,
    /// RFC 3339 timestamp.
    pub at: String,
}

/// Persisted rolling accuracy window for one (timeframe, signal) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalAccuracyWindow {
    pub timeframe: Timeframe,
    pub source: SignalSource,
    /// Oldest first.
    pub outcomes: Vec<bool>,
}

/// Serializable state of the feedback loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSnapshot {
    pub weights: BTreeMap<Timeframe, SignalWeights>,
    #[serde(default)]
    pub signal_accuracy: Vec<SignalAccuracyWindow>,
}

// =============================================================================
// HealthFeedbackLoop
// =============================================================================

pub struct HealthFeedbackLoop {
    params: FeedbackParams,
    weights: RwLock<BTreeMap<Timeframe, SignalWeights>>,
    accuracy: RwLock<HashMap<(Timeframe, SignalSource), VecDeque<bool>>>,
}

impl HealthFeedbackLoop {
    pub fn new(params: FeedbackParams, timeframes: &[Timeframe]) -> Self {
        let weights = timeframes
            .iter()
            .map(|tf| (*tf, SignalWeights::default()))
            .collect();
        Self {
            params,
            weights: RwLock::new(weights),
            accuracy: RwLock::new(HashMap::new()),
        }
    }

    pub fn params(&self) -> &FeedbackParams {
        &self.params
    }

    /// Current weight map for `timeframe` (uniform when none is learned yet).
    pub fn weights_for(&self, timeframe: Timeframe) -> SignalWeights {
        self.weights
            .read()
            .get(&timeframe)
            .cloned()
            .unwrap_or_default()
    }

    /// Attribute a realized move to the signals that voted on the prediction.
    ///
    /// A vote is correct when its sign matches the move.  Moves inside the
    /// neutral band carry no directional information and are skipped.
    pub fn record_signal_outcomes(&self, timeframe: Timeframe, votes: &[SignalVote], realized_move: f64) {
        if !realized_move.is_finite() || realized_move.abs() <= NEUTRAL_BAND {
            return;
        }
        let window = self.params.accuracy_window.max(1);
        let mut acc = self.accuracy.write();
        for vote in votes {
            if !vote.value.is_finite() || vote.value == 0.0 {
                continue;
            }
            let correct = vote.value.signum() == realized_move.signum();
            let entry = acc.entry((timeframe, vote.source)).or_default();
            entry.push_back(correct);
            while entry.len() > window {
                entry.pop_front();
            }
        }
    }

    /// Rolling accuracy and sample count for one signal.
    pub fn signal_accuracy(&self, timeframe: Timeframe, source: SignalSource) -> Option<(f64, usize)> {
        let acc = self.accuracy.read();
        let window = acc.get(&(timeframe, source))?;
        if window.is_empty() {
            return None;
        }
        let hits = window.iter().filter(|c| **c).count();
        Some((hits as f64 / window.len() as f64, window.len()))
    }

    /// Rewrite the weight map for `timeframe` from its health and signal
    /// accuracy.  Returns every change made.
    ///
    /// The weight map stays write-locked from read to write-back, so
    /// concurrent adjustments apply one after the other.
    pub fn adjust_signal_weights(&self, timeframe: Timeframe, metrics: &HealthMetrics) -> Vec<WeightAdjustment> {
        let p = &self.params;
        let health = metrics.score;
        let mut weights = self.weights.write();
        let old = weights.get(&timeframe).cloned().unwrap_or_default();
        let mut next = old.clone();
        let mut causes: BTreeMap<SignalSource, Vec<String>> = BTreeMap::new();

        // ── Timeframe-level scale ───────────────────────────────────────────
        let mut tf_scale = 1.0;
        let mut tf_cause = None;
        if health < p.low_health {
            tf_scale = 0.5 + health;
            tf_cause = Some(format!("timeframe health {health:.2} below {:.2}", p.low_health));
        } else if health > p.high_health && metrics.directional_accuracy > p.high_accuracy {
            let span = (1.0 - p.high_health).max(f64::EPSILON);
            let g = ((health - p.high_health) / span).clamp(0.0, 1.0);
            tf_scale = 1.0 + p.adjustment_factor * g;
            tf_cause = Some(format!(
                "timeframe health {health:.2} with accuracy {:.2}",
                metrics.directional_accuracy
            ));
        }

        for source in SignalSource::CATALOGUE {
            let mut w = next.get(source) * tf_scale;
            let reasons = causes.entry(source).or_default();
            if let Some(c) = &tf_cause {
                reasons.push(c.clone());
            }

            // ── Signal-level scale ──────────────────────────────────────────
            if let Some((accuracy, n)) = self.signal_accuracy(timeframe, source) {
                if n >= p.min_signal_samples {
                    if accuracy < p.poor_signal_accuracy {
                        w *= 0.5;
                        reasons.push(format!("signal accuracy {accuracy:.2} over {n}"));
                    } else if accuracy > p.strong_signal_accuracy {
                        w *= p.strong_signal_boost;
                        reasons.push(format!("signal accuracy {accuracy:.2} over {n}"));
                    }
                }
            }

            next.weights.insert(source, w.clamp(p.min_weight, p.max_weight));
        }
        next.normalize();

        let at = Utc::now().to_rfc3339();
        let mut adjustments = Vec::new();
        for source in SignalSource::CATALOGUE {
            let (before, after) = (old.get(source), next.get(source));
            if (after - before).abs() <= MIN_RECORDED_CHANGE {
                continue;
            }
            let cause = match causes.get(&source) {
                Some(r) if !r.is_empty() => r.join("; "),
                _ => "renormalised".to_string(),
            };
            info!(
                timeframe = %timeframe,
                signal = %source,
                old = format!("{before:.4}"),
                new = format!("{after:.4}"),
                cause = %cause,
                "signal weight adjusted"
            );
            adjustments.push(WeightAdjustment {
                timeframe,
                source,
                old_weight: before,
                new_weight: after,
                cause,
                at: at.clone(),
            });
        }

        weights.insert(timeframe, next);
        drop(weights);

        debug!(
            timeframe = %timeframe,
            health = format!("{health:.3}"),
            changes = adjustments.len(),
            "feedback cycle complete"
        );
        adjustments
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> FeedbackSnapshot {
        let mut signal_accuracy: Vec<SignalAccuracyWindow> = self
            .accuracy
            .read()
            .iter()
            .map(|((tf, source), window)| SignalAccuracyWindow {
                timeframe: *tf,
                source: *source,
                outcomes: window.iter().copied().collect(),
            })
            .collect();
        signal_accuracy.sort_by_key(|w| (w.timeframe, w.source));

        FeedbackSnapshot {
            weights: self.weights.read().clone(),
            signal_accuracy,
        }
    }

    pub fn restore(&self, snapshot: FeedbackSnapshot) {
        let window = self.params.accuracy_window.max(1);
        {
            let mut weights = self.weights.write();
            for (tf, mut w) in snapshot.weights {
                if !w.total().is_finite() || (w.total() - 1.0).abs() > 1e-9 {
                    w.normalize();
                }
                weights.insert(tf, w);
            }
        }
        let mut acc = self.accuracy.write();
        for entry in snapshot.signal_accuracy {
            let skip = entry.outcomes.len().saturating_sub(window);
            acc.insert(
                (entry.timeframe, entry.source),
                entry.outcomes.into_iter().skip(skip).collect(),
            );
        }
    }
}
