// =============================================================================
// Volatility-Aware Kelly — Fractional Kelly sized for the volatility regime
// =============================================================================
//
//   f*    = (p·b − q) / b                    (negative edge → 0)
//   λ     = fraction by VIX percentile       (0.15 … 0.35)
//   size  = f* · λ · m_vix · m_conf · m_regime, clamped to [0.01, 0.25]
//
//   VIX percentile   λ      m_vix
//   ≥ 90             0.15   0.50
//   ≥ 75             0.20   0.70
//   ≥ 50             0.25   0.85
//   ≥ 25             0.30   1.00
//   < 25             0.35   1.20
//
//   m_conf    linear 0.5 → 1.2 across confidence 50% → 90%
//   m_regime  by VIX level: < 12 → 1.1, < 20 → 1.0, < 30 → 0.9, else 0.7
//
// Any degenerate input returns the minimum size.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine_config::KellyParams;
use crate::types::EPSILON;

/// Inputs to one sizing decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KellyParameters {
    /// Probability of a winning trade in [0, 1].
    pub win_rate: f64,
    pub win_amount: f64,
    pub loss_amount: f64,
    /// Calibrated confidence in [0, 1].
    pub confidence: f64,
    pub vix: f64,
    /// VIX percentile in [0, 100].
    pub vix_percentile: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KellySizeResult {
    pub base_kelly: f64,
    /// λ applied to the full Kelly fraction.
    pub kelly_fraction: f64,
    pub fractional_kelly: f64,
    pub vix_multiplier: f64,
    pub confidence_multiplier: f64,
    pub regime_multiplier: f64,
    pub vol_adjusted_kelly: f64,
    pub final_size: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degenerate: Option<String>,
}

/// Position sizing seam.
pub trait PositionSizer: Send + Sync {
    fn size(&self, params: &KellyParameters) -> KellySizeResult;
}

pub struct VolatilityAwareKelly {
    params: KellyParams,
}

impl Default for VolatilityAwareKelly {
    fn default() -> Self {
        Self::new(KellyParams::default())
    }
}

impl VolatilityAwareKelly {
    pub fn new(params: KellyParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &KellyParams {
        &self.params
    }

    fn floor_result(&self, reason: String) -> KellySizeResult {
        warn!(reason = %reason, "degenerate sizing input; using minimum size");
        KellySizeResult {
            base_kelly: 0.0,
            kelly_fraction: 0.0,
            fractional_kelly: 0.0,
            vix_multiplier: 0.0,
            confidence_multiplier: 0.0,
            regime_multiplier: 0.0,
            vol_adjusted_kelly: 0.0,
            final_size: self.params.min_size,
            degenerate: Some(reason),
        }
    }
}

impl PositionSizer for VolatilityAwareKelly {
    fn size(&self, k: &KellyParameters) -> KellySizeResult {
        let finite = [k.win_rate, k.win_amount, k.loss_amount, k.confidence, k.vix, k.vix_percentile]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return self.floor_result("non-finite input".to_string());
        }
        if !(0.0..=1.0).contains(&k.win_rate) {
            return self.floor_result(format!("win rate {} outside [0, 1]", k.win_rate));
        }
        if k.win_amount <= 0.0 || k.loss_amount < 0.0 {
            return self.floor_result(format!(
                "payoffs win={} loss={} not usable",
                k.win_amount, k.loss_amount
            ));
        }

        let b = (k.win_amount / k.loss_amount.max(EPSILON)).max(EPSILON);
        let p = k.win_rate;
        let q = 1.0 - p;
        let base_kelly = ((p * b - q) / b).max(0.0);

        let (kelly_fraction, vix_multiplier) = percentile_schedule(k.vix_percentile);
        let confidence_multiplier = confidence_multiplier(k.confidence);
        let regime_multiplier = regime_multiplier(k.vix);

        let fractional_kelly = base_kelly * kelly_fraction;
        let vol_adjusted_kelly = fractional_kelly * vix_multiplier * confidence_multiplier * regime_multiplier;
        let final_size = vol_adjusted_kelly.clamp(self.params.min_size, self.params.max_size);

        debug!(
            base = format!("{:.4}", base_kelly),
            lambda = kelly_fraction,
            adjusted = format!("{:.4}", vol_adjusted_kelly),
            size = format!("{:.4}", final_size),
            "kelly size computed"
        );

        KellySizeResult {
            base_kelly,
            kelly_fraction,
            fractional_kelly,
            vix_multiplier,
            confidence_multiplier,
            regime_multiplier,
            vol_adjusted_kelly,
            final_size,
            degenerate: None,
        }
    }
}

/// (λ, VIX multiplier) for a VIX percentile.
fn percentile_schedule(percentile: f64) -> (f64, f64) {
    if percentile >= 90.0 {
        (0.15, 0.5)
    } else if percentile >= 75.0 {
        (0.20, 0.7)
    } else if percentile >= 50.0 {
        (0.25, 0.85)
    } else if percentile >= 25.0 {
        (0.30, 1.0)
    } else {
        (0.35, 1.2)
    }
}

fn confidence_multiplier(confidence: f64) -> f64 {
    let t = (confidence.clamp(0.5, 0.9) - 0.5) / 0.4;
    0.5 + 0.7 * t
}

fn regime_multiplier(vix: f64) -> f64 {
    match vix {
        v if v < 12.0 => 1.1,
        v if v < 20.0 => 1.0,
        v if v < 30.0 => 0.9,
        _ => 0.7,
    }
}
