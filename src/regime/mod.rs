// =============================================================================
// Regime Classification Module
// =============================================================================
//
// Coarse market-behaviour classification used to condition signal weighting:
// - ATR percentage (volatility expansion)
// - ADX (trend strength)
// - Bollinger Band width (compression vs. expansion)

pub mod classifier;

pub use classifier::{classify, Regime, RegimeReading};
