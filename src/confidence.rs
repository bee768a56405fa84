// =============================================================================
// Confidence Scorer — Calibrated confidence for one fused timeframe
// =============================================================================
//
// Blends six component scores, each in [0, 1]:
//
//   Component               Weight   Source
//   ─────────────────────   ──────   ───────────────────────────────────────
//   fusion strength          0.30    fused confidence
//   regime alignment         0.15    call type vs. current regime
//   timeframe agreement      0.20    share of peer timeframes on the same side
//   volume confirmation      0.10    volume ratio
//   historical accuracy      0.15    tracker directional accuracy
//   volatility suitability   0.10    VIX level
//
// The blend is then calibrated by timeframe health:
//
//   confidence = blend × (0.5 + 0.5·health)
//
// When the fusion engine abstained, every component is halved exactly once:
// fusion strength arrives halved, the other five are halved here.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine_config::HealthParams;
use crate::health::HealthMetrics;
use crate::regime::Regime;
use crate::signals::FusedSignal;
use crate::types::Side;

const W_FUSION: f64 = 0.30;
const W_REGIME: f64 = 0.15;
const W_AGREEMENT: f64 = 0.20;
const W_VOLUME: f64 = 0.10;
const W_ACCURACY: f64 = 0.15;
const W_VOLATILITY: f64 = 0.10;

/// Everything the scorer looks at for one timeframe.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceInputs<'a> {
    pub fused: &'a FusedSignal,
    /// Sides called by the other timeframes in the same cycle.
    pub peer_sides: &'a [Side],
    pub volume_ratio: Option<f64>,
    pub health: f64,
    pub metrics: Option<&'a HealthMetrics>,
    pub vix: Option<f64>,
}

/// Component scores and the final calibrated confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub fusion_strength: f64,
    pub regime_alignment: f64,
    pub timeframe_agreement: f64,
    pub volume_confirmation: f64,
    pub historical_accuracy: f64,
    pub volatility_suitability: f64,
    pub blend: f64,
    pub health: f64,
    pub abstained: bool,
    pub confidence: f64,
}

pub struct ConfidenceScorer {
    min_samples: u64,
    fallback_health: f64,
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new(&HealthParams::default())
    }
}

impl ConfidenceScorer {
    pub fn new(health: &HealthParams) -> Self {
        Self {
            min_samples: health.min_samples,
            fallback_health: health.warmup_score,
        }
    }

    pub fn score(&self, inputs: &ConfidenceInputs<'_>) -> ConfidenceBreakdown {
        let fused = inputs.fused;
        let side = fused.direction.side();

        let fusion_strength = unit(fused.confidence, 0.0);
        let regime_alignment = regime_alignment(fused.regime, side);
        let timeframe_agreement = timeframe_agreement(side, inputs.peer_sides);
        let volume_confirmation = volume_confirmation(inputs.volume_ratio);
        let historical_accuracy = match inputs.metrics {
            Some(m) if m.n >= self.min_samples => unit(m.directional_accuracy, 0.5),
            _ => 0.5,
        };
        let volatility_suitability = volatility_suitability(inputs.vix);

        let blend = W_FUSION * fusion_strength
            + W_REGIME * regime_alignment
            + W_AGREEMENT * timeframe_agreement
            + W_VOLUME * volume_confirmation
            + W_ACCURACY * historical_accuracy
            + W_VOLATILITY * volatility_suitability;

        // Fused confidence already carries the abstention halving, so only
        // the remaining components are halved here.
        let abstained = !fused.should_trade;
        let penalised = if abstained {
            W_FUSION * fusion_strength + 0.5 * (blend - W_FUSION * fusion_strength)
        } else {
            blend
        };
        let health = unit(inputs.health, self.fallback_health);
        let confidence = (penalised * (0.5 + 0.5 * health)).clamp(0.0, 1.0);

        debug!(
            direction = %fused.direction,
            regime = %fused.regime,
            blend = format!("{:.3}", blend),
            health = format!("{:.3}", health),
            confidence = format!("{:.3}", confidence),
            abstained,
            "confidence scored"
        );

        ConfidenceBreakdown {
            fusion_strength,
            regime_alignment,
            timeframe_agreement,
            volume_confirmation,
            historical_accuracy,
            volatility_suitability,
            blend,
            health,
            abstained,
            confidence,
        }
    }
}

// ── Components ──────────────────────────────────────────────────────────────

/// Clamp into [0, 1], substituting `fallback` for non-finite input.
fn unit(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

fn regime_alignment(regime: Regime, side: Side) -> f64 {
    match (side, regime) {
        (Side::Neutral, Regime::Range) => 0.7,
        (Side::Neutral, _) => 0.5,
        (_, Regime::Trend) => 0.85,
        (_, Regime::Range) => 0.55,
        (_, Regime::VolExp) => 0.45,
        (_, Regime::Flux) => 0.5,
    }
}

fn timeframe_agreement(side: Side, peers: &[Side]) -> f64 {
    if peers.is_empty() {
        return 0.5;
    }
    let same = peers.iter().filter(|p| **p == side).count();
    same as f64 / peers.len() as f64
}

fn volume_confirmation(ratio: Option<f64>) -> f64 {
    match ratio {
        Some(r) if r.is_finite() && r >= 1.5 => 1.0,
        Some(r) if r.is_finite() && r >= 1.0 => 0.7,
        Some(r) if r.is_finite() => 0.4,
        _ => 0.5,
    }
}

fn volatility_suitability(vix: Option<f64>) -> f64 {
    match vix {
        Some(v) if !v.is_finite() => 0.7,
        Some(v) if v < 12.0 => 0.8,
        Some(v) if v <= 25.0 => 1.0,
        Some(v) if v <= 35.0 => 0.6,
        Some(_) => 0.3,
        None => 0.7,
    }
}
