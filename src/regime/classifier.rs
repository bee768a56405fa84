// =============================================================================
// Market Regime Classifier
// =============================================================================
//
// Classifies the last bar of a timeframe into one of four regimes using the
// ATR percentage, ADX and Bollinger Band width ratio.
//
// Classification hierarchy (evaluated top-to-bottom; first match wins):
//
//   1. VOL_EXP: ATR% > 1.5                     (volatility expansion)
//   2. TREND  : ADX >= 25 AND BB width < 5%    (persistent directional move)
//   3. RANGE  : BB width <= 3% AND ADX < 20    (compressed, mean-reverting)
//   4. FLUX   : everything else, and any malformed input
//
// The classifier is stateless: the regime is recomputed every cycle.

use serde::{Deserialize, Serialize};
use tracing::trace;

// =============================================================================
// Thresholds
// =============================================================================

const VOL_EXP_ATR_PCT: f64 = 1.5;
const TREND_MIN_ADX: f64 = 25.0;
const TREND_MAX_BB_WIDTH_PCT: f64 = 5.0;
const RANGE_MAX_BB_WIDTH_PCT: f64 = 3.0;
const RANGE_MAX_ADX: f64 = 20.0;

// =============================================================================
// Types
// =============================================================================

/// Coarse market-behaviour classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    /// Strong directional move with contained bands.
    Trend,
    /// Compressed, sideways, mean-reverting action.
    Range,
    /// Volatility expansion: wide bars.
    VolExp,
    /// No clear structure; the conservative default.
    Flux,
}

impl Default for Regime {
    fn default() -> Self {
        Self::Flux
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trend => write!(f, "TREND"),
            Self::Range => write!(f, "RANGE"),
            Self::VolExp => write!(f, "VOL_EXP"),
            Self::Flux => write!(f, "FLUX"),
        }
    }
}

/// Classified regime plus the inputs that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeReading {
    pub regime: Regime,
    /// Confidence in the classification [0.0, 1.0].
    pub confidence: f64,
    pub atr_pct: Option<f64>,
    pub adx: Option<f64>,
    pub bb_width_pct: Option<f64>,
}

// =============================================================================
// Classification logic
// =============================================================================

/// Classify a regime from the last-bar ATR percentage, ADX and Bollinger
/// width (both percentages, e.g. 1.2 means 1.2 %).
///
/// Missing or non-finite inputs classify as [`Regime::Flux`].
pub fn classify(atr_pct: Option<f64>, adx: Option<f64>, bb_width_pct: Option<f64>) -> RegimeReading {
    let (regime, confidence) = match (finite(atr_pct), finite(adx), finite(bb_width_pct)) {
        (Some(atr), Some(adx_v), Some(bbw)) => classify_values(atr, adx_v, bbw),
        _ => {
            trace!(?atr_pct, ?adx, ?bb_width_pct, "Regime: malformed input, defaulting to FLUX");
            (Regime::Flux, 0.0)
        }
    };

    RegimeReading {
        regime,
        confidence,
        atr_pct,
        adx,
        bb_width_pct,
    }
}

fn classify_values(atr_pct: f64, adx: f64, bbw: f64) -> (Regime, f64) {
    if atr_pct > VOL_EXP_ATR_PCT {
        let confidence = remap(atr_pct, VOL_EXP_ATR_PCT, 3.0, 0.6, 1.0);
        return (Regime::VolExp, confidence);
    }

    if adx >= TREND_MIN_ADX && bbw < TREND_MAX_BB_WIDTH_PCT {
        let confidence = remap(adx, TREND_MIN_ADX, 45.0, 0.6, 1.0);
        return (Regime::Trend, confidence);
    }

    if bbw <= RANGE_MAX_BB_WIDTH_PCT && adx < RANGE_MAX_ADX {
        let bbw_conf = remap(bbw, RANGE_MAX_BB_WIDTH_PCT, 1.0, 0.5, 1.0);
        let adx_conf = remap(adx, RANGE_MAX_ADX, 10.0, 0.5, 1.0);
        return (Regime::Range, (bbw_conf + adx_conf) / 2.0);
    }

    trace!(
        atr_pct = format!("{:.3}", atr_pct),
        adx = format!("{:.2}", adx),
        bbw = format!("{:.3}", bbw),
        "Regime: no rule matched, defaulting to FLUX"
    );
    (Regime::Flux, 0.3)
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

/// Linearly remap `value` from `[in_lo, in_hi]` to `[out_lo, out_hi]`, clamped
/// to the output range. Works regardless of whether `in_lo < in_hi` or vice
/// versa.
fn remap(value: f64, in_lo: f64, in_hi: f64, out_lo: f64, out_hi: f64) -> f64 {
    let t = if (in_hi - in_lo).abs() < f64::EPSILON {
        0.5
    } else {
        (value - in_lo) / (in_hi - in_lo)
    };
    let clamped = t.clamp(0.0, 1.0);
    out_lo + clamped * (out_hi - out_lo)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_vol_exp() {
        let r = classify(Some(2.0), Some(30.0), Some(4.0));
        assert_eq!(r.regime, Regime::VolExp);
        assert!(r.confidence > 0.6);
    }

    #[test]
    fn test_vol_exp_priority_over_trend() {
        let r = classify(Some(1.6), Some(40.0), Some(2.0));
        assert_eq!(r.regime, Regime::VolExp);
    }

    #[test]
    fn test_classify_trend() {
        let r = classify(Some(0.8), Some(32.0), Some(4.0));
        assert_eq!(r.regime, Regime::Trend);
    }

    #[test]
    fn test_trend_requires_narrow_bands() {
        let r = classify(Some(0.8), Some(32.0), Some(5.0));
        assert_eq!(r.regime, Regime::Flux);
    }

    #[test]
    fn test_classify_range() {
        let r = classify(Some(0.5), Some(15.0), Some(2.5));
        assert_eq!(r.regime, Regime::Range);
        assert!(r.confidence >= 0.5 && r.confidence <= 1.0);
    }

    #[test]
    fn test_range_boundary_inclusive_width() {
        let r = classify(Some(0.5), Some(19.9), Some(3.0));
        assert_eq!(r.regime, Regime::Range);
    }

    #[test]
    fn test_classify_default_flux() {
        let r = classify(Some(1.0), Some(22.0), Some(3.5));
        assert_eq!(r.regime, Regime::Flux);
        assert!((r.confidence - 0.30).abs() < 1e-10);
    }

    #[test]
    fn test_malformed_input_is_flux() {
        assert_eq!(classify(None, Some(30.0), Some(2.0)).regime, Regime::Flux);
        assert_eq!(classify(Some(f64::NAN), Some(30.0), Some(2.0)).regime, Regime::Flux);
        assert_eq!(classify(Some(0.5), Some(f64::INFINITY), Some(2.0)).regime, Regime::Flux);
    }

    #[test]
    fn test_regime_display() {
        assert_eq!(format!("{}", Regime::VolExp), "VOL_EXP");
        assert_eq!(format!("{}", Regime::Trend), "TREND");
    }

    #[test]
    fn test_remap() {
        assert!((remap(0.5, 0.0, 1.0, 0.0, 10.0) - 5.0).abs() < 1e-10);
        assert!((remap(2.0, 0.0, 1.0, 0.0, 10.0) - 10.0).abs() < 1e-10);
        assert!((remap(-1.0, 0.0, 1.0, 0.0, 10.0) - 0.0).abs() < 1e-10);
    }
}
