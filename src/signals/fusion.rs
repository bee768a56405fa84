// =============================================================================
// Signal Fusion Engine — Bounded weighted composite with majority vote
// =============================================================================
//
// Pipeline for one timeframe:
//   1. Drop non-finite signals.
//   2. Scale each weight by the learned multiplier, clamp to ±W_max.
//   3. raw = Σ w·v / Σ |w|
//   4. Majority vote: the winning side needs >= MIN_CONFIRMATIONS signals.
//   5. disagreement = 1 − |mean(sign(v))|
//   6. confidence = 0.3 + (1 − disagreement)·0.4, + up to 0.15 for strong
//      signals agreeing with the composite.
//   7. Trade only when disagreement < ABSTAIN_THRESHOLD and the vote is
//      non-zero; otherwise report half the confidence.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine_config::FusionParams;
use crate::regime::Regime;
use crate::signals::generator::{Signal, SignalSource};
use crate::signals::weights::SignalWeights;
use crate::types::{floor_denominator, Direction};

const BASE_CONFIDENCE: f64 = 0.3;
const AGREEMENT_CONFIDENCE: f64 = 0.4;
const STRONG_SIGNAL_MAGNITUDE: f64 = 1.0;
const STRONG_SIGNAL_BONUS: f64 = 0.05;
const MAX_STRONG_BONUS: f64 = 0.15;
const MAX_REASONS: usize = 3;

/// The contribution of a single signal to the fused composite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalContribution {
    pub source: SignalSource,
    pub value: f64,
    /// Effective weight after the learned multiplier and clamping.
    pub weight: f64,
    pub contribution: f64,
}

/// Fused view of all signals on one timeframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedSignal {
    pub direction: Direction,
    pub raw_signal: f64,
    pub confidence: f64,
    pub regime: Regime,
    /// Up to three most influential signal reasons.
    pub reasons: Vec<String>,
    pub disagreement: f64,
    pub should_trade: bool,
    /// +1, -1 or 0 from the majority vote.
    pub vote: i32,
    pub bullish_count: usize,
    pub bearish_count: usize,
    pub contributions: Vec<SignalContribution>,
}

impl FusedSignal {
    /// Neutral, abstaining result used when nothing usable was supplied.
    pub fn neutral(regime: Regime) -> Self {
        Self {
            direction: Direction::Neutral,
            raw_signal: 0.0,
            confidence: (BASE_CONFIDENCE * 0.5).clamp(0.0, 1.0),
            regime,
            reasons: Vec::new(),
            disagreement: 1.0,
            should_trade: false,
            vote: 0,
            bullish_count: 0,
            bearish_count: 0,
            contributions: Vec::new(),
        }
    }
}

/// Stateless fusion engine; the weight map is supplied per call.
#[derive(Debug, Clone, Default)]
pub struct SignalFusionEngine {
    params: FusionParams,
}

impl SignalFusionEngine {
    pub fn new(params: FusionParams) -> Self {
        Self { params }
    }

    /// Clamp a weight into `[-W_max, W_max]`.
    pub fn clamp_weight(&self, weight: f64) -> f64 {
        let cap = self.params.max_signal_weight.abs();
        weight.clamp(-cap, cap)
    }

    /// Fuse the signals of one timeframe under `regime`.
    pub fn fuse(&self, signals: &[Signal], regime: Regime, weights: Option<&SignalWeights>) -> FusedSignal {
        // ── 1-2. Validate and bound ─────────────────────────────────────────
        let mut contributions: Vec<(SignalContribution, &Signal)> = Vec::with_capacity(signals.len());
        for signal in signals {
            if !signal.value.is_finite() || !signal.weight.is_finite() || !signal.confidence.is_finite() {
                debug!(source = %signal.source, "non-finite signal dropped before fusion");
                continue;
            }
            let multiplier = weights.map(|w| w.multiplier(signal.source)).unwrap_or(1.0);
            let weight = self.clamp_weight(signal.weight * multiplier);
            contributions.push((
                SignalContribution {
                    source: signal.source,
                    value: signal.value,
                    weight,
                    contribution: weight * signal.value,
                },
                signal,
            ));
        }

        if contributions.is_empty() {
            return FusedSignal::neutral(regime);
        }

        // ── 3. Weighted composite ───────────────────────────────────────────
        let weighted_sum: f64 = contributions.iter().map(|(c, _)| c.contribution).sum();
        let abs_weight: f64 = contributions.iter().map(|(c, _)| c.weight.abs()).sum();
        let raw_signal = weighted_sum / floor_denominator(abs_weight);

        // ── 4. Majority vote ────────────────────────────────────────────────
        let bullish_count = contributions.iter().filter(|(c, _)| c.value > 0.0).count();
        let bearish_count = contributions.iter().filter(|(c, _)| c.value < 0.0).count();
        let min_conf = self.params.min_confirmations;
        let vote = if bullish_count > bearish_count && bullish_count >= min_conf {
            1
        } else if bearish_count > bullish_count && bearish_count >= min_conf {
            -1
        } else {
            0
        };

        // ── 5. Disagreement ─────────────────────────────────────────────────
        let n = contributions.len() as f64;
        let sign_mean = (bullish_count as f64 - bearish_count as f64) / n;
        let disagreement = (1.0 - sign_mean.abs()).clamp(0.0, 1.0);

        // ── 6. Confidence ───────────────────────────────────────────────────
        let composite_sign = raw_signal.signum();
        let strong_agreeing = contributions
            .iter()
            .filter(|(c, _)| c.value.abs() > STRONG_SIGNAL_MAGNITUDE && raw_signal != 0.0 && c.value.signum() == composite_sign)
            .count();
        let strong_bonus = (strong_agreeing as f64 * STRONG_SIGNAL_BONUS).min(MAX_STRONG_BONUS);
        let mut confidence = BASE_CONFIDENCE + (1.0 - disagreement) * AGREEMENT_CONFIDENCE + strong_bonus;

        // ── 7. Trade / abstain ──────────────────────────────────────────────
        let should_trade = disagreement < self.params.abstain_threshold && vote != 0;
        if !should_trade {
            confidence *= 0.5;
        }
        let confidence = confidence.clamp(0.0, 1.0);

        let direction = self.band(raw_signal, vote);

        // Top reasons by absolute contribution.
        let mut ranked: Vec<&(SignalContribution, &Signal)> = contributions.iter().collect();
        ranked.sort_by(|a, b| {
            b.0.contribution
                .abs()
                .partial_cmp(&a.0.contribution.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let reasons: Vec<String> = ranked
            .iter()
            .take(MAX_REASONS)
            .map(|(_, s)| s.reason.clone())
            .collect();

        debug!(
            regime = %regime,
            raw = format!("{:.3}", raw_signal),
            vote,
            disagreement = format!("{:.3}", disagreement),
            confidence = format!("{:.3}", confidence),
            should_trade,
            direction = %direction,
            "signals fused"
        );

        FusedSignal {
            direction,
            raw_signal,
            confidence,
            regime,
            reasons,
            disagreement,
            should_trade,
            vote,
            bullish_count,
            bearish_count,
            contributions: contributions.into_iter().map(|(c, _)| c).collect(),
        }
    }

    /// Five-band direction: directional only when the vote agrees in sign.
    fn band(&self, raw_signal: f64, vote: i32) -> Direction {
        let agrees = vote != 0 && (raw_signal > 0.0) == (vote > 0);
        let magnitude = raw_signal.abs();
        if !agrees || magnitude <= self.params.directional_threshold {
            return Direction::Neutral;
        }
        match (raw_signal > 0.0, magnitude > self.params.strong_threshold) {
            (true, true) => Direction::StrongBuy,
            (true, false) => Direction::Buy,
            (false, true) => Direction::StrongSell,
            (false, false) => Direction::Sell,
        }
    }
}
