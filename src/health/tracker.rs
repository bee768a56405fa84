// =============================================================================
// Health Tracker — Online calibration statistics for one timeframe
// =============================================================================
//
// Welford's one-pass mean/variance update with exponential forgetting: every
// running sum is multiplied by DECAY (0.99) before the next sample is folded
// in, so evidence has a half-life of ~69 samples while the variance update
// stays numerically stable.
//
// Per sample the tracker accumulates:
//   - the standardized residual z (clipped to ±6) → mean / std
//   - p50 / p80 / p95 coverage hits
//   - |ln(realized σ / predicted σ)|              → dispersion error
//   - directional wins                             → directional accuracy
//   - predicted σ                                  → sharpness
//
// Health score (each factor in (0, 1]):
//
//   exp(−α₁·|p80 − 0.80|)
//   × exp(−α₂·(|z̄| + |s_z − 1|))
//   × exp(−α₃·dispersion)
//   × clamp(0.5 + β·(accuracy − 0.5), 0, 1)
//
// Below MIN_SAMPLES the warm-up floor is reported instead.
// =============================================================================

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::engine_config::HealthParams;
use crate::types::EPSILON;

const P50_TARGET: f64 = 0.50;
const P80_TARGET: f64 = 0.80;
const P95_TARGET: f64 = 0.95;

// =============================================================================
// Types
// =============================================================================

/// One realized-vs-predicted observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionSample {
    /// Standardized residual (clipped on ingestion).
    pub z: f64,
    pub realized_sigma: f64,
    pub predicted_sigma: f64,
    pub direction_correct: bool,
}

/// Whether the realized outcome fell inside each predicted band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageHit {
    pub p50: bool,
    pub p80: bool,
    pub p95: bool,
}

/// Snapshot of a tracker's calibration for dashboards and the feedback loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub score: f64,
    pub n: u64,
    pub warming_up: bool,
    pub p50_coverage: f64,
    pub p80_coverage: f64,
    pub p95_coverage: f64,
    pub z_mean: f64,
    pub z_std: f64,
    pub dispersion_error: f64,
    pub directional_accuracy: f64,
    pub calibration_error: f64,
    pub sharpness: f64,
}

/// Decayed running sums. Plain numerics so the state serialises exactly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerState {
    /// Raw number of samples ever added.
    pub n: u64,
    /// Decayed sample weight (Σ decay^k).
    pub weight: f64,
    pub z_mean: f64,
    pub z_m2: f64,
    pub p50_hits: f64,
    pub p80_hits: f64,
    pub p95_hits: f64,
    pub dispersion_sum: f64,
    pub direction_wins: f64,
    pub predicted_sigma_sum: f64,
}

// =============================================================================
// HealthTracker
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthTracker {
    params: HealthParams,
    state: TrackerState,
}

impl HealthTracker {
    pub fn new(params: HealthParams) -> Self {
        Self {
            params,
            state: TrackerState::default(),
        }
    }

    /// Rebuild a tracker from previously exported state.
    pub fn from_state(params: HealthParams, state: TrackerState) -> Self {
        Self { params, state }
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn params(&self) -> &HealthParams {
        &self.params
    }

    pub fn sample_count(&self) -> u64 {
        self.state.n
    }

    /// Fold one realized outcome into the running statistics.
    ///
    /// Errors on a non-finite residual; sigmas are floored at epsilon.
    pub fn add(&mut self, sample: &PredictionSample, hit: CoverageHit) -> Result<()> {
        if !sample.z.is_finite() {
            bail!("non-finite standardized residual");
        }
        let z = sample.z.clamp(-self.params.z_clip, self.params.z_clip);
        let realized = sigma_floor(sample.realized_sigma);
        let predicted = sigma_floor(sample.predicted_sigma);

        let d = self.params.decay;
        let s = &mut self.state;

        // ── Decay everything first ──────────────────────────────────────────
        s.weight *= d;
        s.z_m2 *= d;
        s.p50_hits *= d;
        s.p80_hits *= d;
        s.p95_hits *= d;
        s.dispersion_sum *= d;
        s.direction_wins *= d;
        s.predicted_sigma_sum *= d;

        // ── Weighted Welford step (unit weight for the new sample) ──────────
        s.weight += 1.0;
        let delta = z - s.z_mean;
        s.z_mean += delta / s.weight;
        s.z_m2 += delta * (z - s.z_mean);

        s.p50_hits += f64::from(u8::from(hit.p50));
        s.p80_hits += f64::from(u8::from(hit.p80));
        s.p95_hits += f64::from(u8::from(hit.p95));
        s.dispersion_sum += (realized / predicted).ln().abs();
        s.direction_wins += f64::from(u8::from(sample.direction_correct));
        s.predicted_sigma_sum += predicted;
        s.n += 1;

        Ok(())
    }

    fn ratio(&self, sum: f64) -> f64 {
        if self.state.weight <= EPSILON {
            0.0
        } else {
            sum / self.state.weight
        }
    }

    fn z_std(&self) -> f64 {
        self.ratio(self.state.z_m2).max(0.0).sqrt()
    }

    /// Current health score in [0, 1].
    pub fn health_score(&self) -> f64 {
        if self.state.n < self.params.min_samples {
            return self.params.warmup_score;
        }

        let p = &self.params;
        let p80 = self.ratio(self.state.p80_hits);
        let z_mean = self.state.z_mean;
        let z_std = self.z_std();
        let dispersion = self.ratio(self.state.dispersion_sum);
        let accuracy = self.ratio(self.state.direction_wins);

        let calibration_term = (-p.alpha_calibration * (p80 - P80_TARGET).abs()).exp();
        let z_term = (-p.alpha_z * (z_mean.abs() + (z_std - 1.0).abs())).exp();
        let dispersion_term = (-p.alpha_dispersion * dispersion).exp();
        let direction_term = (0.5 + p.beta_direction * (accuracy - 0.5)).clamp(0.0, 1.0);

        let score = calibration_term * z_term * dispersion_term * direction_term;
        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            p.warmup_score
        }
    }

    /// Full calibration snapshot.
    pub fn metrics(&self) -> HealthMetrics {
        let p50 = self.ratio(self.state.p50_hits);
        let p80 = self.ratio(self.state.p80_hits);
        let p95 = self.ratio(self.state.p95_hits);
        let calibration_error =
            ((p50 - P50_TARGET).abs() + (p80 - P80_TARGET).abs() + (p95 - P95_TARGET).abs()) / 3.0;

        HealthMetrics {
            score: self.health_score(),
            n: self.state.n,
            warming_up: self.state.n < self.params.min_samples,
            p50_coverage: p50,
            p80_coverage: p80,
            p95_coverage: p95,
            z_mean: self.state.z_mean,
            z_std: self.z_std(),
            dispersion_error: self.ratio(self.state.dispersion_sum),
            directional_accuracy: self.ratio(self.state.direction_wins),
            calibration_error,
            sharpness: self.ratio(self.state.predicted_sigma_sum),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(HealthParams::default())
    }
}

fn sigma_floor(sigma: f64) -> f64 {
    if sigma.is_finite() && sigma > EPSILON {
        sigma
    } else {
        EPSILON
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    /// Unit-variance residual cycle built from normal quantiles, alternating
    /// sign so the decayed mean stays near zero.
    fn calibrated_z(i: usize) -> f64 {
        const Q: [f64; 5] = [0.25, 0.52, 0.84, 1.28, 1.80];
        let rms = (Q.iter().map(|q| q * q).sum::<f64>() / Q.len() as f64).sqrt();
        let q = Q[(i / 2) % Q.len()] / rms;
        if i % 2 == 0 {
            q
        } else {
            -q
        }
    }

    fn good_sample(i: usize) -> (PredictionSample, CoverageHit) {
        let z = calibrated_z(i);
        (
            PredictionSample {
                z,
                realized_sigma: 1.0,
                predicted_sigma: 1.0,
                direction_correct: true,
            },
            CoverageHit {
                p50: z.abs() < 0.674,
                // Exactly four of every five samples inside the p80 band.
                p80: i % 5 != 4,
                p95: z.abs() < 1.96,
            },
        )
    }

    fn bad_sample() -> (PredictionSample, CoverageHit) {
        (
            PredictionSample {
                z: 6.0,
                realized_sigma: 1.0,
                predicted_sigma: 1.0,
                direction_correct: false,
            },
            CoverageHit::default(),
        )
    }

    fn feed_good(t: &mut HealthTracker, count: usize) {
        for i in 0..count {
            let (s, h) = good_sample(i);
            t.add(&s, h).unwrap();
        }
    }

    #[test]
    fn warmup_floor_below_min_samples() {
        let mut t = HealthTracker::default();
        assert!((t.health_score() - 0.6).abs() < 1e-12);
        for _ in 0..29 {
            let (s, h) = bad_sample();
            t.add(&s, h).unwrap();
        }
        assert!((t.health_score() - 0.6).abs() < 1e-12);
        assert!(t.metrics().warming_up);
        let (s, h) = bad_sample();
        t.add(&s, h).unwrap();
        assert!(t.health_score() < 0.6);
    }

    #[test]
    fn calibrated_stream_converges_to_full_health() {
        let mut t = HealthTracker::default();
        feed_good(&mut t, 250);
        let m = t.metrics();
        assert!(m.score > 0.95, "score {} metrics {:?}", m.score, m);
        assert!((m.p80_coverage - 0.8).abs() < 0.01);
        assert!((m.directional_accuracy - 1.0).abs() < 1e-9);
        assert!(m.z_mean.abs() < 0.05);
        assert!((m.z_std - 1.0).abs() < 0.05);
    }

    #[test]
    fn bad_samples_decay_health_fast() {
        let mut t = HealthTracker::default();
        feed_good(&mut t, 300);
        assert!(t.health_score() >= 0.9);

        let mut first_below = None;
        for k in 1..=200 {
            let (s, h) = bad_sample();
            t.add(&s, h).unwrap();
            if first_below.is_none() && t.health_score() < 0.3 {
                first_below = Some(k);
            }
        }
        let k = first_below.expect("health never dropped below 0.3");
        assert!(k <= 70, "took {k} samples");
        assert!(t.health_score() < 0.3);
    }

    #[test]
    fn z_is_clipped() {
        let mut t = HealthTracker::default();
        let s = PredictionSample {
            z: 50.0,
            realized_sigma: 1.0,
            predicted_sigma: 1.0,
            direction_correct: true,
        };
        t.add(&s, CoverageHit::default()).unwrap();
        assert!((t.state().z_mean - 6.0).abs() < 1e-12);
    }

    #[test]
    fn non_finite_residual_is_rejected() {
        let mut t = HealthTracker::default();
        let s = PredictionSample {
            z: f64::NAN,
            realized_sigma: 1.0,
            predicted_sigma: 1.0,
            direction_correct: true,
        };
        assert!(t.add(&s, CoverageHit::default()).is_err());
        assert_eq!(t.sample_count(), 0);
    }

    #[test]
    fn dispersion_penalises_sigma_mismatch() {
        let mut matched = HealthTracker::default();
        let mut mismatched = HealthTracker::default();
        for i in 0..100 {
            let (s, h) = good_sample(i);
            matched.add(&s, h).unwrap();
            let wide = PredictionSample {
                predicted_sigma: 2.0,
                ..s
            };
            mismatched.add(&wide, h).unwrap();
        }
        let m = mismatched.metrics();
        assert!((m.dispersion_error - 2f64.ln()).abs() < 1e-9);
        assert!(mismatched.health_score() < matched.health_score());
        assert!(m.sharpness > matched.metrics().sharpness);
    }

    #[test]
    fn zero_sigma_is_floored() {
        let mut t = HealthTracker::default();
        let s = PredictionSample {
            z: 0.5,
            realized_sigma: 0.0,
            predicted_sigma: 0.0,
            direction_correct: true,
        };
        t.add(&s, CoverageHit::default()).unwrap();
        assert!(t.metrics().dispersion_error.abs() < 1e-12);
    }

    #[test]
    fn serialised_state_restores_identically() {
        let mut t = HealthTracker::default();
        feed_good(&mut t, 137);
        for _ in 0..11 {
            let (s, h) = bad_sample();
            t.add(&s, h).unwrap();
        }

        let json = serde_json::to_string(&t).unwrap();
        let restored: HealthTracker = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.health_score(), t.health_score());
        assert_eq!(restored.metrics(), t.metrics());

        let rebuilt = HealthTracker::from_state(t.params().clone(), t.state().clone());
        assert_eq!(rebuilt.metrics(), t.metrics());
    }
}
