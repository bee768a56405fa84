// =============================================================================
// Hurricane Engine — Adaptive confidence and consensus scoring
// =============================================================================
//
// Per-timeframe trading signals whose confidence is continuously recalibrated
// from realized outcomes:
//
//   features → regime → signals → fusion → confidence ─┐
//                                                      ├→ consensus → sizing
//   outcomes → health trackers → feedback → weights ───┘
// =============================================================================

pub mod audit;
pub mod command;
pub mod confidence;
pub mod consensus;
pub mod engine_config;
pub mod engine_state;
pub mod features;
pub mod health;
pub mod pipeline;
pub mod regime;
pub mod signals;
pub mod sizing;
pub mod types;

pub use engine_config::EngineConfig;
pub use engine_state::{EngineSnapshot, EngineState};
pub use pipeline::{CycleReport, CycleRequest};
