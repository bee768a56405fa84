// =============================================================================
// Feature Bundle — Typed per-timeframe indicator snapshot
// =============================================================================
//
// The upstream indicator collaborator supplies one bundle per timeframe.  The
// bundle is a closed schema: every optional indicator is `Option<f64>` and
// `sanitized()` drops anything non-finite or out of range at the boundary,
// so the generator and scorer never see NaN.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::Timeframe;

/// MACD line vs. signal line crossover state on the last bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MacdCross {
    Bullish,
    Bearish,
    None,
}

impl Default for MacdCross {
    fn default() -> Self {
        Self::None
    }
}

/// Last-bar technical features for one timeframe.
///
/// Percent fields are expressed in percent units (1.2 means 1.2 %).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureBundle {
    pub timeframe: Timeframe,
    /// Last close.
    pub price: f64,
    #[serde(default)]
    pub rsi: Option<f64>,
    #[serde(default)]
    pub macd_histogram: Option<f64>,
    #[serde(default)]
    pub macd_cross: MacdCross,
    /// Bollinger %B (0 = lower band, 1 = upper band).
    #[serde(default)]
    pub bb_percent_b: Option<f64>,
    /// Bollinger width as a percentage of the middle band.
    #[serde(default)]
    pub bb_width_pct: Option<f64>,
    #[serde(default)]
    pub adx: Option<f64>,
    /// Current volume / average volume.
    #[serde(default)]
    pub volume_ratio: Option<f64>,
    #[serde(default)]
    pub ema_fast: Option<f64>,
    #[serde(default)]
    pub ema_slow: Option<f64>,
    #[serde(default)]
    pub sma_50: Option<f64>,
    /// (price − VWAP) / VWAP in percent.
    #[serde(default)]
    pub vwap_distance_pct: Option<f64>,
    #[serde(default)]
    pub atr_pct: Option<f64>,
}

impl FeatureBundle {
    /// Return a copy with every malformed field removed.
    ///
    /// A non-finite or non-positive price invalidates every price-relative
    /// feature; the generator then emits no signals and fusion degrades to
    /// NEUTRAL.
    pub fn sanitized(&self) -> FeatureBundle {
        let mut dropped: Vec<&'static str> = Vec::new();

        let mut keep = |name: &'static str, v: Option<f64>, lo: f64, hi: f64| -> Option<f64> {
            match v {
                Some(x) if x.is_finite() && x >= lo && x <= hi => Some(x),
                Some(_) => {
                    dropped.push(name);
                    None
                }
                None => None,
            }
        };

        let price_ok = self.price.is_finite() && self.price > 0.0;
        let price = if price_ok { self.price } else { 0.0 };

        let out = FeatureBundle {
            timeframe: self.timeframe,
            price,
            rsi: keep("rsi", self.rsi, 0.0, 100.0),
            macd_histogram: keep("macd_histogram", self.macd_histogram, f64::MIN, f64::MAX),
            macd_cross: self.macd_cross,
            bb_percent_b: keep("bb_percent_b", self.bb_percent_b, f64::MIN, f64::MAX),
            bb_width_pct: keep("bb_width_pct", self.bb_width_pct, 0.0, f64::MAX),
            adx: keep("adx", self.adx, 0.0, 100.0),
            volume_ratio: keep("volume_ratio", self.volume_ratio, 0.0, f64::MAX),
            ema_fast: keep("ema_fast", self.ema_fast, f64::MIN_POSITIVE, f64::MAX),
            ema_slow: keep("ema_slow", self.ema_slow, f64::MIN_POSITIVE, f64::MAX),
            sma_50: keep("sma_50", self.sma_50, f64::MIN_POSITIVE, f64::MAX),
            vwap_distance_pct: keep("vwap_distance_pct", self.vwap_distance_pct, f64::MIN, f64::MAX),
            atr_pct: keep("atr_pct", self.atr_pct, 0.0, f64::MAX),
        };

        if !price_ok || !dropped.is_empty() {
            warn!(
                timeframe = %self.timeframe,
                price_ok,
                dropped = ?dropped,
                "malformed features dropped at boundary"
            );
        }

        out
    }

    /// True when the bundle carries a usable price.
    pub fn has_price(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}
