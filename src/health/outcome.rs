// =============================================================================
// Outcome Records — Realized results fed back into the health trackers
// =============================================================================

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::health::tracker::{CoverageHit, PredictionSample};
use crate::signals::SignalSource;
use crate::types::{floor_denominator, Side, Timeframe, EPSILON};

/// Relative move inside which a NEUTRAL call counts as correct.
pub const NEUTRAL_BAND: f64 = 0.002;

/// Closed price interval predicted for one quantile band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBand {
    pub lower: f64,
    pub upper: f64,
}

impl PriceBand {
    pub fn contains(&self, price: f64) -> bool {
        let (lo, hi) = if self.lower <= self.upper {
            (self.lower, self.upper)
        } else {
            (self.upper, self.lower)
        };
        price >= lo && price <= hi
    }
}

/// A signal's contribution at prediction time, kept for per-signal accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalVote {
    pub source: SignalSource,
    pub value: f64,
}

/// Everything known about one prediction once its horizon has elapsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub prediction_id: String,
    pub timeframe: Timeframe,
    pub side: Side,
    pub entry_price: f64,
    pub predicted_median: f64,
    pub predicted_sigma: f64,
    pub p50: PriceBand,
    pub p80: PriceBand,
    pub p95: PriceBand,
    pub realized_price: f64,
    pub realized_sigma: f64,
    #[serde(default)]
    pub signal_votes: Vec<SignalVote>,
}

impl OutcomeRecord {
    /// Signed realized move relative to entry.
    pub fn realized_move(&self) -> f64 {
        (self.realized_price - self.entry_price) / floor_denominator(self.entry_price)
    }

    pub fn direction_correct(&self) -> bool {
        match self.side {
            Side::Call => self.realized_price > self.entry_price,
            Side::Put => self.realized_price < self.entry_price,
            Side::Neutral => self.realized_move().abs() <= NEUTRAL_BAND,
        }
    }

    /// Convert into the tracker's sample and coverage inputs.
    ///
    /// Errors on a non-finite realized price, a non-positive entry price,
    /// or a non-finite predicted median.
    pub fn to_sample(&self) -> Result<(PredictionSample, CoverageHit)> {
        if !self.realized_price.is_finite() {
            bail!(
                "prediction {}: realized price is not finite",
                self.prediction_id
            );
        }
        if !self.entry_price.is_finite() || self.entry_price <= 0.0 {
            bail!(
                "prediction {}: entry price {} is not positive",
                self.prediction_id,
                self.entry_price
            );
        }
        if !self.predicted_median.is_finite() {
            bail!(
                "prediction {}: predicted median is not finite",
                self.prediction_id
            );
        }

        let sigma = if self.predicted_sigma.is_finite() {
            self.predicted_sigma.max(EPSILON)
        } else {
            EPSILON
        };
        let z = (self.realized_price - self.predicted_median) / sigma;

        let sample = PredictionSample {
            z,
            realized_sigma: self.realized_sigma,
            predicted_sigma: self.predicted_sigma,
            direction_correct: self.direction_correct(),
        };
        let hit = CoverageHit {
            p50: self.p50.contains(self.realized_price),
            p80: self.p80.contains(self.realized_price),
            p95: self.p95.contains(self.realized_price),
        };
        Ok((sample, hit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(side: Side, realized: f64) -> OutcomeRecord {
        OutcomeRecord {
            prediction_id: "p-1".into(),
            timeframe: Timeframe::M15,
            side,
            entry_price: 100.0,
            predicted_median: 101.0,
            predicted_sigma: 2.0,
            p50: PriceBand { lower: 99.7, upper: 102.3 },
            p80: PriceBand { lower: 98.4, upper: 103.6 },
            p95: PriceBand { lower: 97.1, upper: 104.9 },
            realized_price: realized,
            realized_sigma: 2.0,
            signal_votes: vec![],
        }
    }

    #[test]
    fn residual_and_coverage() {
        let (s, h) = record(Side::Call, 104.0).to_sample().unwrap();
        assert!((s.z - 1.5).abs() < 1e-12);
        assert!(s.direction_correct);
        assert_eq!(
            h,
            CoverageHit {
                p50: false,
                p80: false,
                p95: true
            }
        );
    }

    #[test]
    fn direction_rules_per_side() {
        assert!(!record(Side::Call, 99.0).direction_correct());
        assert!(record(Side::Put, 99.0).direction_correct());
        assert!(!record(Side::Put, 100.0).direction_correct());
        assert!(record(Side::Neutral, 100.15).direction_correct());
        assert!(!record(Side::Neutral, 100.5).direction_correct());
    }

    #[test]
    fn zero_sigma_uses_floor() {
        let mut r = record(Side::Call, 101.0);
        r.predicted_sigma = 0.0;
        let (s, _) = r.to_sample().unwrap();
        assert!(s.z.abs() < 1e-12);
    }

    #[test]
    fn non_finite_realized_price_errors() {
        assert!(record(Side::Call, f64::NAN).to_sample().is_err());
        let mut r = record(Side::Call, 101.0);
        r.entry_price = 0.0;
        assert!(r.to_sample().is_err());
    }

    #[test]
    fn inverted_band_still_contains() {
        let b = PriceBand { lower: 5.0, upper: 1.0 };
        assert!(b.contains(3.0));
        assert!(!b.contains(6.0));
    }
}
