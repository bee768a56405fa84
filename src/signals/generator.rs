// =============================================================================
// Signal Generator — Regime-conditioned primitive signals
// =============================================================================
//
// Evaluates a fixed catalogue of indicator checks against one timeframe's
// feature bundle.  Every triggered check emits a `Signal` whose magnitude and
// weight come from a per-regime conditioning table, e.g. an oversold RSI is
// a +1.5 buy while trending but only +1.0 while ranging, and a Bollinger band
// breach is faded in a range but followed in a trend.
//
// Catalogue:
//   rsi           : RSI extremes (< 30 / > 70)
//   macd          : MACD crossover, else histogram sign
//   bollinger     : %B at or beyond the bands
//   adx_trend     : ADX >= 25 in the direction of the EMA stack
//   ema_alignment : fast/slow EMA stack confirmed by price
//   sma_trend     : price vs. SMA(50)
//   vwap          : distance from VWAP
//   volume        : volume surge in the direction of the EMA stack
//   squeeze       : narrow bands with a MACD momentum lean
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::features::{FeatureBundle, MacdCross};
use crate::regime::Regime;

// =============================================================================
// Types
// =============================================================================

/// Identifier of a catalogue check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Rsi,
    Macd,
    Bollinger,
    AdxTrend,
    EmaAlignment,
    SmaTrend,
    Vwap,
    Volume,
    Squeeze,
}

impl SignalSource {
    pub const CATALOGUE: [SignalSource; 9] = [
        Self::Rsi,
        Self::Macd,
        Self::Bollinger,
        Self::AdxTrend,
        Self::EmaAlignment,
        Self::SmaTrend,
        Self::Vwap,
        Self::Volume,
        Self::Squeeze,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rsi => "rsi",
            Self::Macd => "macd",
            Self::Bollinger => "bollinger",
            Self::AdxTrend => "adx_trend",
            Self::EmaAlignment => "ema_alignment",
            Self::SmaTrend => "sma_trend",
            Self::Vwap => "vwap",
            Self::Volume => "volume",
            Self::Squeeze => "squeeze",
        }
    }
}

impl std::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single primitive signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub source: SignalSource,
    /// Signed magnitude: positive is bullish, negative is bearish.
    pub value: f64,
    pub weight: f64,
    pub confidence: f64,
    pub reason: String,
}

/// Magnitude and weight a check carries in a given regime.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Conditioning {
    scale: f64,
    weight: f64,
}

const fn cond(scale: f64, weight: f64) -> Option<Conditioning> {
    Some(Conditioning { scale, weight })
}

// =============================================================================
// Decision matrix: per-regime conditioning
// =============================================================================

/// Conditioning table. `None` means the check is silent in that regime.
fn conditioning(source: SignalSource, regime: Regime) -> Option<Conditioning> {
    use Regime::*;
    use SignalSource::*;

    match (source, regime) {
        // Oscillator extremes: strongest as pullback entries in a trend.
        (Rsi, Trend) => cond(1.5, 0.15),
        (Rsi, Range) => cond(1.0, 0.20),
        (Rsi, VolExp) => cond(0.6, 0.10),
        (Rsi, Flux) => cond(1.0, 0.15),

        (Macd, Trend) => cond(1.2, 0.20),
        (Macd, Range) => cond(0.6, 0.10),
        (Macd, VolExp) => cond(0.8, 0.15),
        (Macd, Flux) => cond(0.8, 0.15),

        // Band breaches: followed in a trend, faded elsewhere.
        (Bollinger, Trend) => cond(0.6, 0.10),
        (Bollinger, Range) => cond(1.2, 0.20),
        (Bollinger, VolExp) => cond(0.4, 0.10),
        (Bollinger, Flux) => cond(0.8, 0.15),

        (AdxTrend, Trend) => cond(1.0, 0.20),
        (AdxTrend, Range) => None,
        (AdxTrend, VolExp) => cond(0.6, 0.10),
        (AdxTrend, Flux) => cond(0.5, 0.10),

        (EmaAlignment, Trend) => cond(1.3, 0.20),
        (EmaAlignment, Range) => cond(0.5, 0.10),
        (EmaAlignment, VolExp) => cond(0.8, 0.15),
        (EmaAlignment, Flux) => cond(0.8, 0.15),

        (SmaTrend, Trend) => cond(0.8, 0.15),
        (SmaTrend, Range) => cond(0.4, 0.10),
        (SmaTrend, VolExp) => cond(0.6, 0.10),
        (SmaTrend, Flux) => cond(0.6, 0.10),

        (Vwap, Trend) => cond(0.5, 0.10),
        (Vwap, Range) => cond(0.8, 0.15),
        (Vwap, VolExp) => cond(0.5, 0.10),
        (Vwap, Flux) => cond(0.5, 0.10),

        (Volume, Trend) => cond(0.8, 0.15),
        (Volume, Range) => cond(0.4, 0.05),
        (Volume, VolExp) => cond(1.0, 0.15),
        (Volume, Flux) => cond(0.6, 0.10),

        (Squeeze, Range) => cond(1.0, 0.15),
        (Squeeze, _) => cond(0.6, 0.10),
    }
}

/// Whether band/VWAP extremes continue (true) or revert (false) in `regime`.
fn follows_extremes(regime: Regime) -> bool {
    matches!(regime, Regime::Trend)
}

// =============================================================================
// Thresholds
// =============================================================================

const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;
const BAND_EDGE: f64 = 0.05;
const ADX_TRENDING: f64 = 25.0;
const VWAP_MIN_DISTANCE_PCT: f64 = 0.3;
const SMA_MIN_DISTANCE_PCT: f64 = 0.1;
const VOLUME_SURGE: f64 = 1.5;
const SQUEEZE_MAX_WIDTH_PCT: f64 = 2.0;

// =============================================================================
// Generator
// =============================================================================

/// Run the full catalogue against one sanitized feature bundle.
pub fn generate(features: &FeatureBundle, regime: Regime) -> Vec<Signal> {
    let mut signals = Vec::new();

    if !features.has_price() {
        debug!(timeframe = %features.timeframe, "no usable price, no signals generated");
        return signals;
    }

    let price = features.price;
    let ema_bias = ema_bias(features);

    let mut emit = |source: SignalSource, direction: f64, intensity: f64, confidence: f64, reason: String| {
        if let Some(c) = conditioning(source, regime) {
            let value = direction * c.scale * intensity;
            if value.is_finite() && value != 0.0 {
                signals.push(Signal {
                    source,
                    value,
                    weight: c.weight,
                    confidence: confidence.clamp(0.0, 1.0),
                    reason,
                });
            }
        }
    };

    // ── RSI ──────────────────────────────────────────────────────────────
    if let Some(rsi) = features.rsi {
        if rsi < RSI_OVERSOLD {
            let depth = (RSI_OVERSOLD - rsi) / RSI_OVERSOLD;
            emit(SignalSource::Rsi, 1.0, 1.0 + depth * 0.5, 0.5 + depth, format!("RSI oversold ({rsi:.1})"));
        } else if rsi > RSI_OVERBOUGHT {
            let depth = (rsi - RSI_OVERBOUGHT) / (100.0 - RSI_OVERBOUGHT);
            emit(SignalSource::Rsi, -1.0, 1.0 + depth * 0.5, 0.5 + depth, format!("RSI overbought ({rsi:.1})"));
        }
    }

    // ── MACD ─────────────────────────────────────────────────────────────
    match features.macd_cross {
        MacdCross::Bullish => emit(SignalSource::Macd, 1.0, 1.0, 0.7, "MACD bullish crossover".into()),
        MacdCross::Bearish => emit(SignalSource::Macd, -1.0, 1.0, 0.7, "MACD bearish crossover".into()),
        MacdCross::None => {
            if let Some(h) = features.macd_histogram.filter(|h| *h != 0.0) {
                emit(SignalSource::Macd, h.signum(), 0.5, 0.4, format!("MACD histogram {h:+.3}"));
            }
        }
    }

    // ── Bollinger %B ─────────────────────────────────────────────────────
    if let Some(pb) = features.bb_percent_b {
        let breach = if pb <= BAND_EDGE {
            Some(-1.0)
        } else if pb >= 1.0 - BAND_EDGE {
            Some(1.0)
        } else {
            None
        };
        if let Some(edge) = breach {
            let outside = !(0.0..=1.0).contains(&pb);
            let intensity = if outside { 1.0 } else { 0.6 };
            let direction = if follows_extremes(regime) { edge } else { -edge };
            let label = if edge > 0.0 { "upper" } else { "lower" };
            emit(
                SignalSource::Bollinger,
                direction,
                intensity,
                if outside { 0.7 } else { 0.5 },
                format!("%B {pb:.2} at {label} band"),
            );
        }
    }

    // ── ADX trend strength ───────────────────────────────────────────────
    if let (Some(adx), Some(bias)) = (features.adx, ema_bias) {
        if adx >= ADX_TRENDING {
            let intensity = (adx / ADX_TRENDING).min(2.0);
            emit(
                SignalSource::AdxTrend,
                bias,
                intensity,
                (adx / 50.0).min(1.0),
                format!("ADX {adx:.1} trending {}", if bias > 0.0 { "up" } else { "down" }),
            );
        }
    }

    // ── EMA alignment ────────────────────────────────────────────────────
    if let (Some(fast), Some(slow)) = (features.ema_fast, features.ema_slow) {
        if fast > slow && price > fast {
            emit(SignalSource::EmaAlignment, 1.0, 1.0, 0.7, "EMA stack bullish".into());
        } else if fast < slow && price < fast {
            emit(SignalSource::EmaAlignment, -1.0, 1.0, 0.7, "EMA stack bearish".into());
        }
    }

    // ── SMA(50) trend ────────────────────────────────────────────────────
    if let Some(sma) = features.sma_50 {
        let dist_pct = (price - sma) / sma * 100.0;
        if dist_pct.abs() > SMA_MIN_DISTANCE_PCT {
            emit(
                SignalSource::SmaTrend,
                dist_pct.signum(),
                1.0,
                (dist_pct.abs() / 2.0).min(1.0),
                format!("price {dist_pct:+.2}% vs SMA50"),
            );
        }
    }

    // ── VWAP distance ────────────────────────────────────────────────────
    if let Some(d) = features.vwap_distance_pct {
        if d.abs() >= VWAP_MIN_DISTANCE_PCT {
            let direction = if follows_extremes(regime) { d.signum() } else { -d.signum() };
            emit(
                SignalSource::Vwap,
                direction,
                1.0,
                d.abs().min(1.0),
                format!("price {d:+.2}% from VWAP"),
            );
        }
    }

    // ── Volume confirmation ──────────────────────────────────────────────
    if let (Some(ratio), Some(bias)) = (features.volume_ratio, ema_bias) {
        if ratio >= VOLUME_SURGE {
            emit(
                SignalSource::Volume,
                bias,
                (ratio / VOLUME_SURGE).min(1.5),
                (ratio / 3.0).min(1.0),
                format!("volume {ratio:.2}x confirms move"),
            );
        }
    }

    // ── Volatility squeeze ───────────────────────────────────────────────
    if let (Some(width), Some(h)) = (features.bb_width_pct, features.macd_histogram) {
        if width < SQUEEZE_MAX_WIDTH_PCT && h != 0.0 {
            emit(
                SignalSource::Squeeze,
                h.signum(),
                1.0,
                0.5,
                format!("squeeze (width {width:.2}%) leaning {}", if h > 0.0 { "up" } else { "down" }),
            );
        }
    }

    debug!(
        timeframe = %features.timeframe,
        regime = %regime,
        count = signals.len(),
        "signals generated"
    );

    signals
}

/// +1 / -1 from the fast/slow EMA stack, `None` when unavailable or flat.
fn ema_bias(features: &FeatureBundle) -> Option<f64> {
    match (features.ema_fast, features.ema_slow) {
        (Some(fast), Some(slow)) if fast > slow => Some(1.0),
        (Some(fast), Some(slow)) if fast < slow => Some(-1.0),
        _ => None,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timeframe;

    fn base() -> FeatureBundle {
        FeatureBundle {
            timeframe: Timeframe::M15,
            price: 100.0,
            ..Default::default()
        }
    }

    fn find(signals: &[Signal], source: SignalSource) -> Option<&Signal> {
        signals.iter().find(|s| s.source == source)
    }

    #[test]
    fn oversold_rsi_is_stronger_in_trend_than_range() {
        let mut f = base();
        f.rsi = Some(25.0);
        let trend = generate(&f, Regime::Trend);
        let range = generate(&f, Regime::Range);
        let t = find(&trend, SignalSource::Rsi).unwrap();
        let r = find(&range, SignalSource::Rsi).unwrap();
        assert!(t.value > 0.0 && r.value > 0.0);
        assert!(t.value > r.value);
    }

    #[test]
    fn band_breach_followed_in_trend_faded_in_range() {
        let mut f = base();
        f.bb_percent_b = Some(1.1);
        let trend = generate(&f, Regime::Trend);
        let range = generate(&f, Regime::Range);
        assert!(find(&trend, SignalSource::Bollinger).unwrap().value > 0.0);
        assert!(find(&range, SignalSource::Bollinger).unwrap().value < 0.0);
    }

    #[test]
    fn adx_signal_silent_in_range() {
        let mut f = base();
        f.adx = Some(35.0);
        f.ema_fast = Some(99.0);
        f.ema_slow = Some(98.0);
        assert!(find(&generate(&f, Regime::Range), SignalSource::AdxTrend).is_none());
        let trend = generate(&f, Regime::Trend);
        assert!(find(&trend, SignalSource::AdxTrend).unwrap().value > 0.0);
    }

    #[test]
    fn bullish_stack_emits_aligned_signals() {
        let mut f = base();
        f.ema_fast = Some(99.5);
        f.ema_slow = Some(99.0);
        f.sma_50 = Some(97.0);
        f.volume_ratio = Some(2.0);
        f.macd_cross = MacdCross::Bullish;
        let signals = generate(&f, Regime::Trend);
        for source in [
            SignalSource::EmaAlignment,
            SignalSource::SmaTrend,
            SignalSource::Volume,
            SignalSource::Macd,
        ] {
            assert!(find(&signals, source).unwrap().value > 0.0, "{source} not bullish");
        }
    }

    #[test]
    fn weights_never_exceed_default_cap() {
        let mut f = base();
        f.rsi = Some(10.0);
        f.adx = Some(60.0);
        f.ema_fast = Some(99.0);
        f.ema_slow = Some(98.0);
        f.volume_ratio = Some(5.0);
        f.bb_percent_b = Some(-0.2);
        f.bb_width_pct = Some(1.0);
        f.macd_histogram = Some(0.4);
        f.vwap_distance_pct = Some(-1.2);
        for regime in [Regime::Trend, Regime::Range, Regime::VolExp, Regime::Flux] {
            for s in generate(&f, regime) {
                assert!(s.weight.abs() <= 0.20 + 1e-12);
                assert!(s.value.is_finite());
                assert!((0.0..=1.0).contains(&s.confidence));
            }
        }
    }

    #[test]
    fn no_price_no_signals() {
        let mut f = base();
        f.price = 0.0;
        f.rsi = Some(10.0);
        assert!(generate(&f, Regime::Trend).is_empty());
    }

    #[test]
    fn quiet_market_emits_nothing() {
        let mut f = base();
        f.rsi = Some(50.0);
        f.bb_percent_b = Some(0.5);
        f.vwap_distance_pct = Some(0.05);
        assert!(generate(&f, Regime::Flux).is_empty());
    }
}
