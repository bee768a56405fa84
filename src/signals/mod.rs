// =============================================================================
// Signals Module
// =============================================================================
//
// Signal processing pipeline for the confidence engine:
// - Regime-conditioned primitive signal generation
// - Bounded weighted fusion with majority voting
// - Learned per-timeframe weight maps (written by the health feedback loop)

pub mod fusion;
pub mod generator;
pub mod weights;

pub use fusion::{FusedSignal, SignalContribution, SignalFusionEngine};
pub use generator::{generate, Signal, SignalSource};
pub use weights::SignalWeights;
