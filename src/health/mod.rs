// =============================================================================
// Health Module
// =============================================================================
//
// Online calibration tracking and the feedback loop it drives:
// - Decayed Welford tracker per timeframe
// - Store seam holding one tracker per timeframe
// - Outcome records converted into tracker samples
// - Health → signal weight feedback

pub mod feedback;
pub mod outcome;
pub mod store;
pub mod tracker;

pub use feedback::{FeedbackSnapshot, HealthFeedbackLoop, SignalAccuracyWindow, WeightAdjustment};
pub use outcome::{OutcomeRecord, PriceBand, SignalVote};
pub use store::{health_or_floor, HealthStore, InMemoryHealthStore};
pub use tracker::{CoverageHit, HealthMetrics, HealthTracker, PredictionSample, TrackerState};
