// =============================================================================
// Engine Configuration — Tunable thresholds with atomic save
// =============================================================================
//
// Every constant the scoring pipeline and the calibration loop depend on
// lives here so that a deployment can retune the engine without a rebuild.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Timeframe;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_timeframes() -> Vec<Timeframe> {
    Timeframe::HIERARCHY.to_vec()
}

fn default_snapshot_path() -> String {
    "health_snapshot.json".to_string()
}

fn default_snapshot_interval_secs() -> u64 {
    300
}

// =============================================================================
// FusionParams
// =============================================================================

/// Limits applied by the signal fusion engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionParams {
    /// Maximum absolute weight any single signal may carry.
    pub max_signal_weight: f64,
    /// Disagreement at or above which the engine abstains.
    pub abstain_threshold: f64,
    /// Minimum same-side votes required to assert a direction.
    pub min_confirmations: usize,
    /// |raw signal| above which a directional band is reported.
    pub directional_threshold: f64,
    /// |raw signal| above which a strong band is reported.
    pub strong_threshold: f64,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            max_signal_weight: 0.20,
            abstain_threshold: 0.6,
            min_confirmations: 3,
            directional_threshold: 0.2,
            strong_threshold: 1.0,
        }
    }
}

// =============================================================================
// HealthParams
// =============================================================================

/// Parameters of the per-timeframe health tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthParams {
    /// Exponential decay applied to every running sum before each update.
    pub decay: f64,
    /// Samples required before the computed score replaces the warm-up floor.
    pub min_samples: u64,
    /// Score reported while warming up.
    pub warmup_score: f64,
    /// Absolute bound applied to incoming standardized residuals.
    pub z_clip: f64,
    /// Penalty on |p80 coverage − 0.80|.
    pub alpha_calibration: f64,
    /// Penalty on |z mean| + |z std − 1|.
    pub alpha_z: f64,
    /// Penalty on mean |ln(realized σ / predicted σ)|.
    pub alpha_dispersion: f64,
    /// Slope of the directional-skill term.
    pub beta_direction: f64,
}

impl Default for HealthParams {
    fn default() -> Self {
        Self {
            decay: 0.99,
            min_samples: 30,
            warmup_score: 0.6,
            z_clip: 6.0,
            alpha_calibration: 2.0,
            alpha_z: 2.0,
            alpha_dispersion: 2.0,
            beta_direction: 1.0,
        }
    }
}

// =============================================================================
// FeedbackParams
// =============================================================================

/// Parameters of the health → weight feedback loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackParams {
    /// Maximum proportional weight growth per cycle for a healthy timeframe.
    pub adjustment_factor: f64,
    pub min_weight: f64,
    pub max_weight: f64,
    /// Health below which all weights shrink.
    pub low_health: f64,
    /// Health above which weights may grow.
    pub high_health: f64,
    /// Directional accuracy required (with high health) to grow weights.
    pub high_accuracy: f64,
    /// Attributed outcomes required before per-signal accuracy is used.
    pub min_signal_samples: usize,
    /// Rolling window of attributed outcomes kept per signal.
    pub accuracy_window: usize,
    /// Per-signal accuracy below which the weight is halved.
    pub poor_signal_accuracy: f64,
    /// Per-signal accuracy above which the weight is boosted.
    pub strong_signal_accuracy: f64,
    /// Multiplier applied to a strong signal's weight.
    pub strong_signal_boost: f64,
}

impl Default for FeedbackParams {
    fn default() -> Self {
        Self {
            adjustment_factor: 0.1,
            min_weight: 0.05,
            max_weight: 0.35,
            low_health: 0.5,
            high_health: 0.8,
            high_accuracy: 0.7,
            min_signal_samples: 20,
            accuracy_window: 50,
            poor_signal_accuracy: 0.4,
            strong_signal_accuracy: 0.7,
            strong_signal_boost: 1.2,
        }
    }
}

// =============================================================================
// ConsensusParams
// =============================================================================

/// Parameters of the cross-timeframe consensus detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusParams {
    /// Timeframes below this health are excluded.
    pub min_health: f64,
    /// Confidence at which a prediction counts as high-confidence.
    pub high_confidence: f64,
    /// Margin by which one side's weighted score must beat the other.
    pub dominance_margin: f64,
    /// Ceiling on the multiplicative confidence boost.
    pub max_boost: f64,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            min_health: 0.6,
            high_confidence: 0.75,
            dominance_margin: 0.20,
            max_boost: 1.4,
        }
    }
}

// =============================================================================
// KellyParams
// =============================================================================

/// Parameters of the position sizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KellyParams {
    pub min_size: f64,
    pub max_size: f64,
    /// Ceiling on Σ size·|correlation| across open positions.
    pub heat_ceiling: f64,
    /// Payoff on a win when the caller supplies none.
    pub default_win_amount: f64,
    /// Payoff on a loss when the caller supplies none.
    pub default_loss_amount: f64,
    /// VIX level assumed when market context is missing.
    pub default_vix: f64,
    /// VIX percentile assumed when market context is missing.
    pub default_vix_percentile: f64,
}

impl Default for KellyParams {
    fn default() -> Self {
        Self {
            min_size: 0.01,
            max_size: 0.25,
            heat_ceiling: 1.0,
            default_win_amount: 1.5,
            default_loss_amount: 1.0,
            default_vix: 20.0,
            default_vix_percentile: 50.0,
        }
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the Hurricane engine.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeframes that own a health tracker.
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<Timeframe>,

    #[serde(default)]
    pub fusion: FusionParams,

    #[serde(default)]
    pub health: HealthParams,

    #[serde(default)]
    pub feedback: FeedbackParams,

    #[serde(default)]
    pub consensus: ConsensusParams,

    #[serde(default)]
    pub kelly: KellyParams,

    /// Where the binary persists tracker and weight state.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,

    /// Seconds between periodic snapshots.
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeframes: default_timeframes(),
            fusion: FusionParams::default(),
            health: HealthParams::default(),
            feedback: FeedbackParams::default(),
            consensus: ConsensusParams::default(),
            kelly: KellyParams::default(),
            snapshot_path: default_snapshot_path(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            timeframes = ?config.timeframes,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration to `path` using an atomic write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;
        write_atomic(path.as_ref(), &content)?;
        info!(path = %path.as_ref().display(), "engine config saved (atomic)");
        Ok(())
    }
}

/// Write `content` to a temporary sibling file, then rename it over `path`.
///
/// This prevents corruption if the process crashes mid-write.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");

    std::fs::write(&tmp_path, content)
        .with_context(|| format!("failed to write tmp file {}", tmp_path.display()))?;

    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename tmp file to {}", path.display()))?;

    Ok(())
}
