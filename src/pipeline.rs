// =============================================================================
// Cycle Pipeline — One scoring pass across every supplied timeframe
// =============================================================================
//
// Pipeline:
//   1. Sanitize each feature bundle at the boundary
//   2. Classify the regime per timeframe
//   3. Generate regime-conditioned signals
//   4. Fuse with the timeframe's learned weight map
//   5. Score calibrated confidence (needs every timeframe's fused side)
//   6. Detect cross-timeframe consensus
//   7. Size the best tradeable timeframe on the dominant side
//   8. Fit the size under the portfolio heat ceiling
//
// The pass only reads shared state (trackers, weight maps); it never
// mutates it, so concurrent cycles are safe and repeatable.
// =============================================================================

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::confidence::{ConfidenceBreakdown, ConfidenceInputs, ConfidenceScorer};
use crate::consensus::{detect_consensus, ConsensusResult, TimeframePrediction};
use crate::engine_config::EngineConfig;
use crate::features::FeatureBundle;
use crate::health::{health_or_floor, HealthFeedbackLoop, HealthMetrics, HealthStore, SignalVote};
use crate::regime::{classify, RegimeReading};
use crate::signals::{generate, FusedSignal, Signal, SignalFusionEngine};
use crate::sizing::{check_portfolio_heat, HeatCheck, KellyParameters, KellySizeResult, OpenPosition, PositionSizer};
use crate::types::{Side, Timeframe};

// =============================================================================
// Request / report types
// =============================================================================

/// Volatility context for sizing and confidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    #[serde(default)]
    pub vix: Option<f64>,
    #[serde(default)]
    pub vix_percentile: Option<f64>,
}

/// Input to one scoring cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleRequest {
    pub features: Vec<FeatureBundle>,
    #[serde(default)]
    pub market: MarketContext,
    #[serde(default)]
    pub open_positions: Vec<OpenPosition>,
    /// Correlation of a new position with the open book (1.0 when absent).
    #[serde(default)]
    pub correlation: Option<f64>,
    /// Overrides the win rate used for sizing.
    #[serde(default)]
    pub win_rate: Option<f64>,
    #[serde(default)]
    pub win_amount: Option<f64>,
    #[serde(default)]
    pub loss_amount: Option<f64>,
}

/// Everything computed for one timeframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeframeReport {
    /// Id to quote back when the outcome of this call is known.
    pub prediction_id: String,
    pub timeframe: Timeframe,
    pub side: Side,
    pub regime: RegimeReading,
    pub signals: Vec<Signal>,
    pub fused: FusedSignal,
    pub confidence: ConfidenceBreakdown,
    pub health: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<HealthMetrics>,
    /// Signals that entered fusion, for per-signal accuracy attribution.
    pub votes: Vec<SignalVote>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionPlan {
    pub prediction_id: String,
    pub timeframe: Timeframe,
    pub side: Side,
    pub base_confidence: f64,
    /// Confidence after the consensus boost, capped at 1.
    pub boosted_confidence: f64,
    pub win_rate: f64,
    pub kelly: KellySizeResult,
    pub heat: HeatCheck,
    /// Final size after the heat check (0 when rejected).
    pub size: f64,
    pub approved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    /// UUID v4.
    pub id: String,
    /// RFC 3339.
    pub created_at: String,
    pub timeframes: Vec<TimeframeReport>,
    pub consensus: ConsensusResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<PositionPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_trade_reason: Option<String>,
}

// =============================================================================
// Pipeline
// =============================================================================

/// Read-only collaborators of a cycle.
pub struct CycleContext<'a> {
    pub config: &'a EngineConfig,
    pub store: &'a dyn HealthStore,
    pub feedback: &'a HealthFeedbackLoop,
    pub fusion: &'a SignalFusionEngine,
    pub scorer: &'a ConfidenceScorer,
    pub sizer: &'a dyn PositionSizer,
}

/// Intermediate per-timeframe state before confidence scoring.
struct Fused {
    bundle: FeatureBundle,
    regime: RegimeReading,
    signals: Vec<Signal>,
    fused: FusedSignal,
}

pub fn run_cycle(ctx: &CycleContext<'_>, request: &CycleRequest) -> CycleReport {
    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    let floor = ctx.config.health.warmup_score;

    // ── 1. Sanitize, one bundle per timeframe ───────────────────────────────
    let mut bundles: BTreeMap<Timeframe, FeatureBundle> = BTreeMap::new();
    for bundle in &request.features {
        if bundles.insert(bundle.timeframe, bundle.sanitized()).is_some() {
            warn!(timeframe = %bundle.timeframe, "duplicate feature bundle; keeping the last");
        }
    }

    // ── 2-4. Regime, signals, fusion ────────────────────────────────────────
    let fused: Vec<Fused> = bundles
        .into_values()
        .map(|bundle| {
            let regime = classify(bundle.atr_pct, bundle.adx, bundle.bb_width_pct);
            let signals = generate(&bundle, regime.regime);
            let weights = ctx.feedback.weights_for(bundle.timeframe);
            let fused = ctx.fusion.fuse(&signals, regime.regime, Some(&weights));
            Fused {
                bundle,
                regime,
                signals,
                fused,
            }
        })
        .collect();

    // ── 5. Confidence ───────────────────────────────────────────────────────
    let sides: Vec<Side> = fused.iter().map(|f| f.fused.direction.side()).collect();
    let timeframes: Vec<TimeframeReport> = fused
        .into_iter()
        .enumerate()
        .map(|(i, f)| {
            let tf = f.bundle.timeframe;
            let peers: Vec<Side> = sides
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, s)| *s)
                .collect();
            let health = health_or_floor(ctx.store, tf, floor);
            let metrics = ctx.store.metrics(tf);
            let confidence = ctx.scorer.score(&ConfidenceInputs {
                fused: &f.fused,
                peer_sides: &peers,
                volume_ratio: f.bundle.volume_ratio,
                health,
                metrics: metrics.as_ref(),
                vix: request.market.vix,
            });
            let votes = f
                .fused
                .contributions
                .iter()
                .map(|c| SignalVote {
                    source: c.source,
                    value: c.value,
                })
                .collect();
            TimeframeReport {
                prediction_id: format!("{id}-{tf}"),
                timeframe: tf,
                side: sides[i],
                regime: f.regime,
                signals: f.signals,
                fused: f.fused,
                confidence,
                health,
                metrics,
                votes,
            }
        })
        .collect();

    // ── 6. Consensus ────────────────────────────────────────────────────────
    let predictions: Vec<TimeframePrediction> = timeframes
        .iter()
        .map(|r| TimeframePrediction {
            timeframe: r.timeframe,
            side: r.side,
            confidence: r.confidence.confidence,
            health: ctx.store.health_score(r.timeframe),
        })
        .collect();
    let consensus = detect_consensus(&predictions, &ctx.config.consensus, floor);

    // ── 7-8. Position plan ──────────────────────────────────────────────────
    let (position, no_trade_reason) = match plan_position(ctx, request, &timeframes, &consensus) {
        Ok(plan) => (Some(plan), None),
        Err(reason) => (None, Some(reason)),
    };

    info!(
        cycle = %id,
        timeframes = timeframes.len(),
        dominant = %consensus.dominant_side,
        boost = format!("{:.2}", consensus.confidence_boost),
        size = position.as_ref().map(|p| p.size).unwrap_or(0.0),
        "cycle scored"
    );

    CycleReport {
        id,
        created_at,
        timeframes,
        consensus,
        position,
        no_trade_reason,
    }
}

/// Size the best tradeable timeframe on the dominant side.
///
/// The error carries the human-readable reason no position was planned.
fn plan_position(
    ctx: &CycleContext<'_>,
    request: &CycleRequest,
    reports: &[TimeframeReport],
    consensus: &ConsensusResult,
) -> Result<PositionPlan, String> {
    if consensus.dominant_side == Side::Neutral {
        return Err("no dominant side across timeframes".to_string());
    }

    let mut best: Option<&TimeframeReport> = None;
    for r in reports {
        if r.side != consensus.dominant_side || !r.fused.should_trade {
            continue;
        }
        if best.map_or(true, |b| r.confidence.confidence > b.confidence.confidence) {
            best = Some(r);
        }
    }
    let best = best.ok_or_else(|| {
        format!(
            "no tradeable timeframe on the dominant {} side",
            consensus.dominant_side
        )
    })?;

    let kp = &ctx.config.kelly;
    let base_confidence = best.confidence.confidence;
    let boosted_confidence = (base_confidence * consensus.confidence_boost).clamp(0.0, 1.0);

    // Win rate: caller override, then tracker accuracy once warm, then the
    // calibrated confidence itself.
    let win_rate = request
        .win_rate
        .or_else(|| {
            best.metrics
                .as_ref()
                .filter(|m| !m.warming_up)
                .map(|m| m.directional_accuracy)
        })
        .unwrap_or(boosted_confidence);

    let kelly = ctx.sizer.size(&KellyParameters {
        win_rate,
        win_amount: request.win_amount.unwrap_or(kp.default_win_amount),
        loss_amount: request.loss_amount.unwrap_or(kp.default_loss_amount),
        confidence: boosted_confidence,
        vix: request.market.vix.unwrap_or(kp.default_vix),
        vix_percentile: request.market.vix_percentile.unwrap_or(kp.default_vix_percentile),
    });

    let heat = check_portfolio_heat(
        &request.open_positions,
        kelly.final_size,
        request.correlation.unwrap_or(1.0),
        kp,
    );

    debug!(
        timeframe = %best.timeframe,
        side = %best.side,
        kelly = format!("{:.4}", kelly.final_size),
        allowed = format!("{:.4}", heat.allowed_size),
        approved = heat.approved,
        "position planned"
    );

    Ok(PositionPlan {
        prediction_id: best.prediction_id.clone(),
        timeframe: best.timeframe,
        side: best.side,
        base_confidence,
        boosted_confidence,
        win_rate,
        size: heat.allowed_size,
        approved: heat.approved,
        kelly,
        heat,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::features::MacdCross;
    use crate::health::InMemoryHealthStore;
    use crate::sizing::VolatilityAwareKelly;

    /// Trending bundle whose signals all lean one way.
    pub(crate) fn trending(timeframe: Timeframe, bullish: bool) -> FeatureBundle {
        let s = if bullish { 1.0 } else { -1.0 };
        FeatureBundle {
            timeframe,
            price: 100.0,
            macd_cross: if bullish { MacdCross::Bullish } else { MacdCross::Bearish },
            bb_width_pct: Some(4.0),
            adx: Some(30.0),
            volume_ratio: Some(2.0),
            ema_fast: Some(100.0 - 0.5 * s),
            ema_slow: Some(100.0 - 1.0 * s),
            sma_50: Some(100.0 - 3.0 * s),
            atr_pct: Some(0.8),
            ..Default::default()
        }
    }

    struct Fixture {
        config: EngineConfig,
        store: InMemoryHealthStore,
        feedback: HealthFeedbackLoop,
        fusion: SignalFusionEngine,
        scorer: ConfidenceScorer,
        sizer: VolatilityAwareKelly,
    }

    impl Fixture {
        fn new() -> Self {
            let config = EngineConfig::default();
            Self {
                store: InMemoryHealthStore::new(&config.timeframes, &config.health),
                feedback: HealthFeedbackLoop::new(config.feedback.clone(), &config.timeframes),
                fusion: SignalFusionEngine::new(config.fusion.clone()),
                scorer: ConfidenceScorer::new(&config.health),
                sizer: VolatilityAwareKelly::new(config.kelly.clone()),
                config,
            }
        }

        fn run(&self, request: &CycleRequest) -> CycleReport {
            let ctx = CycleContext {
                config: &self.config,
                store: &self.store,
                feedback: &self.feedback,
                fusion: &self.fusion,
                scorer: &self.scorer,
                sizer: &self.sizer,
            };
            run_cycle(&ctx, request)
        }
    }

    fn request(features: Vec<FeatureBundle>) -> CycleRequest {
        CycleRequest {
            features,
            market: MarketContext {
                vix: Some(18.0),
                vix_percentile: Some(40.0),
            },
            ..Default::default()
        }
    }

    #[test]
    fn aligned_bullish_cycle_plans_a_call() {
        let fx = Fixture::new();
        let report = fx.run(&request(vec![
            trending(Timeframe::H1, true),
            trending(Timeframe::M5, true),
            trending(Timeframe::M30, true),
            trending(Timeframe::M15, true),
        ]));

        let order: Vec<Timeframe> = report.timeframes.iter().map(|r| r.timeframe).collect();
        assert_eq!(order, vec![Timeframe::M5, Timeframe::M15, Timeframe::M30, Timeframe::H1]);
        for r in &report.timeframes {
            assert_eq!(r.side, Side::Call);
            assert!(r.fused.should_trade);
            assert!(!r.votes.is_empty());
            assert!(r.prediction_id.starts_with(&report.id));
        }

        assert_eq!(report.consensus.dominant_side, Side::Call);
        assert_eq!(report.consensus.aligned_timeframes.len(), 4);

        let plan = report.position.expect("expected a position plan");
        assert_eq!(plan.side, Side::Call);
        assert_eq!(plan.timeframe, Timeframe::M5);
        assert!(plan.approved);
        assert!((0.01..=0.25).contains(&plan.size));
        assert!(plan.boosted_confidence >= plan.base_confidence);
        assert!(report.no_trade_reason.is_none());
    }

    #[test]
    fn split_cycle_has_no_position() {
        let fx = Fixture::new();
        let report = fx.run(&request(vec![
            trending(Timeframe::M5, true),
            trending(Timeframe::M15, false),
        ]));
        assert_eq!(report.consensus.dominant_side, Side::Neutral);
        assert!(report.position.is_none());
        assert!(report.no_trade_reason.is_some());
    }

    #[test]
    fn malformed_bundle_degrades_to_neutral() {
        let fx = Fixture::new();
        let mut bad = trending(Timeframe::H4, true);
        bad.price = f64::NAN;
        bad.adx = Some(f64::INFINITY);
        let report = fx.run(&request(vec![bad]));
        let r = &report.timeframes[0];
        assert_eq!(r.side, Side::Neutral);
        assert!(!r.fused.should_trade);
        assert!((0.0..=1.0).contains(&r.confidence.confidence));
        assert!(report.position.is_none());
    }

    #[test]
    fn heat_ceiling_rejects_when_book_is_full() {
        let fx = Fixture::new();
        let mut req = request(vec![
            trending(Timeframe::M5, false),
            trending(Timeframe::M15, false),
            trending(Timeframe::M30, false),
        ]);
        req.open_positions = vec![OpenPosition {
            id: "book".into(),
            size: 1.0,
            correlation: 1.0,
        }];
        let report = fx.run(&req);
        let plan = report.position.expect("plan is still reported");
        assert_eq!(plan.side, Side::Put);
        assert!(!plan.approved);
        assert_eq!(plan.size, 0.0);
    }

    #[test]
    fn unknown_timeframe_scores_at_floor() {
        let mut fx = Fixture::new();
        fx.config.timeframes = vec![Timeframe::M5];
        fx.store = InMemoryHealthStore::new(&fx.config.timeframes, &fx.config.health);
        let report = fx.run(&request(vec![trending(Timeframe::D1, true)]));
        assert!((report.timeframes[0].health - 0.6).abs() < 1e-12);
        assert!(report.timeframes[0].metrics.is_none());
    }
}
