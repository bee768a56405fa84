// =============================================================================
// Signal Weights — Learned per-timeframe weight map
// =============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::signals::generator::SignalSource;

/// Normalised weight per catalogue signal for one timeframe.
///
/// The map sums to 1. A uniform map leaves the regime-conditioned weights
/// untouched; the feedback loop moves mass toward signals that have been
/// right and away from those that have been wrong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalWeights {
    pub weights: BTreeMap<SignalSource, f64>,
}

impl Default for SignalWeights {
    fn default() -> Self {
        let uniform = 1.0 / SignalSource::CATALOGUE.len() as f64;
        Self {
            weights: SignalSource::CATALOGUE.iter().map(|s| (*s, uniform)).collect(),
        }
    }
}

impl SignalWeights {
    pub fn get(&self, source: SignalSource) -> f64 {
        self.weights.get(&source).copied().unwrap_or(0.0)
    }

    /// Multiplier applied to a signal's regime weight inside fusion: the
    /// learned weight relative to the uniform share (1.0 when uniform).
    pub fn multiplier(&self, source: SignalSource) -> f64 {
        match self.weights.get(&source) {
            Some(w) if w.is_finite() && !self.weights.is_empty() => w * self.weights.len() as f64,
            _ => 1.0,
        }
    }

    /// Rescale so the weights sum to 1. A degenerate map resets to uniform.
    pub fn normalize(&mut self) {
        let total: f64 = self.weights.values().filter(|w| w.is_finite()).sum();
        if total <= f64::EPSILON || self.weights.values().any(|w| !w.is_finite()) {
            *self = Self::default();
            return;
        }
        for w in self.weights.values_mut() {
            *w /= total;
        }
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }
}
