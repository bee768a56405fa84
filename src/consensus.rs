// =============================================================================
// Cross-Timeframe Consensus — Agreement across fused timeframes
// =============================================================================
//
// Participants are the timeframes whose health is at least MIN_HEALTH
// (unknown health counts as the warm-up floor).  They are ordered along the
// fast → slow hierarchy 1m, 5m, 15m, 30m, 1h, 4h, 1d.
//
//   aligned run   longest stretch of hierarchy-adjacent participants calling
//                 the same non-neutral side (ties → higher mean confidence)
//
//   strength      0.4 · majority ratio
//               + 0.3 · run length / hierarchy length
//               + 0.2 · share with confidence ≥ 0.75
//               + 0.1 · clamp((mean health − 0.5) / 0.5)
//
//   dominant      side whose Σ confidence·health beats the other side's by
//                 at least 20%, else NEUTRAL
//
//   boost         1.0 + strength tier + run tier + strong-participant bonus,
//                 capped at 1.4
// =============================================================================

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine_config::ConsensusParams;
use crate::types::{Side, Timeframe};

/// The fused call of one timeframe as seen by the consensus detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeframePrediction {
    pub timeframe: Timeframe,
    pub side: Side,
    pub confidence: f64,
    /// `None` when the timeframe has no tracker.
    pub health: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub consensus_strength: f64,
    /// Fastest first.
    pub aligned_timeframes: Vec<Timeframe>,
    pub dominant_side: Side,
    pub confidence_boost: f64,
    pub participants: usize,
    pub call_count: usize,
    pub put_count: usize,
    pub neutral_count: usize,
    /// Participants on the dominant side at or above the high-confidence mark.
    pub strong_count: usize,
    /// Timeframes left out for low health or unusable confidence.
    pub excluded: Vec<Timeframe>,
}

impl ConsensusResult {
    fn empty(excluded: Vec<Timeframe>) -> Self {
        Self {
            consensus_strength: 0.0,
            aligned_timeframes: Vec::new(),
            dominant_side: Side::Neutral,
            confidence_boost: 1.0,
            participants: 0,
            call_count: 0,
            put_count: 0,
            neutral_count: 0,
            strong_count: 0,
            excluded,
        }
    }
}

struct Participant {
    timeframe: Timeframe,
    side: Side,
    confidence: f64,
    health: f64,
}

/// Detect agreement across timeframes.
///
/// `default_health` is used for predictions that carry no health reading.
pub fn detect_consensus(
    predictions: &[TimeframePrediction],
    params: &ConsensusParams,
    default_health: f64,
) -> ConsensusResult {
    // ── Participants ────────────────────────────────────────────────────────
    let mut participants: Vec<Participant> = Vec::with_capacity(predictions.len());
    let mut excluded = Vec::new();
    let mut seen: HashSet<Timeframe> = HashSet::with_capacity(predictions.len());
    for p in predictions {
        // First prediction per timeframe wins, whether or not it qualifies.
        if !seen.insert(p.timeframe) {
            continue;
        }
        let health = match p.health {
            Some(h) if h.is_finite() => h.clamp(0.0, 1.0),
            _ => default_health,
        };
        if health < params.min_health || !p.confidence.is_finite() {
            excluded.push(p.timeframe);
            continue;
        }
        participants.push(Participant {
            timeframe: p.timeframe,
            side: p.side,
            confidence: p.confidence.clamp(0.0, 1.0),
            health,
        });
    }
    participants.sort_by_key(|p| p.timeframe.rank());
    excluded.sort();

    if participants.is_empty() {
        return ConsensusResult::empty(excluded);
    }

    let n = participants.len() as f64;
    let count = |side: Side| participants.iter().filter(|p| p.side == side).count();
    let (call_count, put_count, neutral_count) = (count(Side::Call), count(Side::Put), count(Side::Neutral));

    // ── Aligned run ─────────────────────────────────────────────────────────
    let aligned = longest_aligned_run(&participants);

    // ── Strength ────────────────────────────────────────────────────────────
    let majority_ratio = call_count.max(put_count) as f64 / n;
    let run_ratio = aligned.len() as f64 / Timeframe::HIERARCHY.len() as f64;
    let high_conf_ratio = participants
        .iter()
        .filter(|p| p.confidence >= params.high_confidence)
        .count() as f64
        / n;
    let mean_health = participants.iter().map(|p| p.health).sum::<f64>() / n;
    let health_term = ((mean_health - 0.5) / 0.5).clamp(0.0, 1.0);

    let consensus_strength =
        (0.4 * majority_ratio + 0.3 * run_ratio + 0.2 * high_conf_ratio + 0.1 * health_term).clamp(0.0, 1.0);

    // ── Dominant side ───────────────────────────────────────────────────────
    let side_score = |side: Side| -> f64 {
        participants
            .iter()
            .filter(|p| p.side == side)
            .map(|p| p.confidence * p.health)
            .sum()
    };
    let (call_score, put_score) = (side_score(Side::Call), side_score(Side::Put));
    let margin = 1.0 + params.dominance_margin;
    let dominant_side = if call_score > 0.0 && call_score >= put_score * margin {
        Side::Call
    } else if put_score > 0.0 && put_score >= call_score * margin {
        Side::Put
    } else {
        Side::Neutral
    };

    let strong_count = if dominant_side == Side::Neutral {
        0
    } else {
        participants
            .iter()
            .filter(|p| p.side == dominant_side && p.confidence >= params.high_confidence)
            .count()
    };

    // ── Boost ───────────────────────────────────────────────────────────────
    let mut boost: f64 = 1.0;
    if consensus_strength > 0.8 {
        boost += 0.2;
    } else if consensus_strength > 0.6 {
        boost += 0.1;
    }
    if aligned.len() >= 4 {
        boost += 0.15;
    } else if aligned.len() >= 3 {
        boost += 0.1;
    }
    if strong_count >= 3 {
        boost += 0.1;
    }
    let confidence_boost = boost.min(params.max_boost).max(1.0);

    let aligned_timeframes: Vec<Timeframe> = aligned.iter().map(|p| p.timeframe).collect();

    debug!(
        participants = participants.len(),
        aligned = ?aligned_timeframes,
        dominant = %dominant_side,
        strength = format!("{:.3}", consensus_strength),
        boost = format!("{:.2}", confidence_boost),
        "consensus detected"
    );

    ConsensusResult {
        consensus_strength,
        aligned_timeframes,
        dominant_side,
        confidence_boost,
        participants: participants.len(),
        call_count,
        put_count,
        neutral_count,
        strong_count,
        excluded,
    }
}

/// Longest run of rank-consecutive participants on one non-neutral side.
/// A timeframe absent from the participants breaks the run.
fn longest_aligned_run(participants: &[Participant]) -> &[Participant] {
    let mean_conf = |run: &[Participant]| {
        run.iter().map(|p| p.confidence).sum::<f64>() / run.len().max(1) as f64
    };

    let mut best: &[Participant] = &[];
    let mut start = 0;
    while start < participants.len() {
        if participants[start].side == Side::Neutral {
            start += 1;
            continue;
        }
        let mut end = start + 1;
        while end < participants.len()
            && participants[end].side == participants[start].side
            && participants[end].timeframe.rank() == participants[end - 1].timeframe.rank() + 1
        {
            end += 1;
        }

        let run = &participants[start..end];
        if run.len() > best.len() || (run.len() == best.len() && mean_conf(run) > mean_conf(best)) {
            best = run;
        }
        start = end;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pred(timeframe: Timeframe, side: Side, confidence: f64, health: f64) -> TimeframePrediction {
        TimeframePrediction {
            timeframe,
            side,
            confidence,
            health: Some(health),
        }
    }

    fn detect(preds: &[TimeframePrediction]) -> ConsensusResult {
        detect_consensus(preds, &ConsensusParams::default(), 0.6)
    }

    #[test]
    fn short_frames_agree_against_slow_frames() {
        let preds = [
            pred(Timeframe::D1, Side::Put, 0.65, 0.8),
            pred(Timeframe::M5, Side::Call, 0.8, 0.8),
            pred(Timeframe::H1, Side::Call, 0.8, 0.8),
            pred(Timeframe::M15, Side::Call, 0.8, 0.8),
            pred(Timeframe::H4, Side::Put, 0.65, 0.8),
            pred(Timeframe::M30, Side::Call, 0.8, 0.8),
        ];
        let r = detect(&preds);
        assert_eq!(
            r.aligned_timeframes,
            vec![Timeframe::M5, Timeframe::M15, Timeframe::M30, Timeframe::H1]
        );
        assert_eq!(r.dominant_side, Side::Call);
        assert!(r.confidence_boost >= 1.3);
        assert!((r.confidence_boost - 1.35).abs() < 1e-12);

        let expected = 0.4 * (4.0 / 6.0) + 0.3 * (4.0 / 7.0) + 0.2 * (4.0 / 6.0) + 0.1 * 0.6;
        assert!((r.consensus_strength - expected).abs() < 1e-12);
        assert_eq!((r.call_count, r.put_count, r.strong_count), (4, 2, 4));
    }

    #[test]
    fn unhealthy_timeframes_are_excluded() {
        let preds = [
            pred(Timeframe::M1, Side::Put, 0.9, 0.3),
            pred(Timeframe::M5, Side::Call, 0.7, 0.7),
        ];
        let r = detect(&preds);
        assert_eq!(r.participants, 1);
        assert_eq!(r.excluded, vec![Timeframe::M1]);
        assert_eq!(r.dominant_side, Side::Call);
    }

    #[test]
    fn duplicate_of_excluded_timeframe_stays_out() {
        let preds = [
            pred(Timeframe::M15, Side::Put, 0.9, 0.2),
            pred(Timeframe::M15, Side::Call, 0.9, 0.9),
            pred(Timeframe::H1, Side::Call, 0.7, 0.8),
            pred(Timeframe::H1, Side::Put, 0.9, 0.9),
        ];
        let r = detect(&preds);
        assert_eq!(r.excluded, vec![Timeframe::M15]);
        assert_eq!(r.participants, 1);
        assert_eq!((r.call_count, r.put_count), (1, 0));
        assert_eq!(r.aligned_timeframes, vec![Timeframe::H1]);
    }

    #[test]
    fn unknown_health_participates_at_floor() {
        let preds = [TimeframePrediction {
            timeframe: Timeframe::H4,
            side: Side::Put,
            confidence: 0.7,
            health: None,
        }];
        let r = detect(&preds);
        assert_eq!(r.participants, 1);
        assert_eq!(r.dominant_side, Side::Put);
    }

    #[test]
    fn balanced_sides_have_no_dominant() {
        let preds = [
            pred(Timeframe::M5, Side::Call, 0.7, 0.8),
            pred(Timeframe::M15, Side::Put, 0.7, 0.8),
            pred(Timeframe::H1, Side::Call, 0.6, 0.8),
            pred(Timeframe::H4, Side::Put, 0.65, 0.8),
        ];
        let r = detect(&preds);
        assert_eq!(r.dominant_side, Side::Neutral);
        assert_eq!(r.strong_count, 0);
    }

    #[test]
    fn equal_runs_prefer_higher_confidence() {
        let preds = [
            pred(Timeframe::M1, Side::Call, 0.6, 0.8),
            pred(Timeframe::M5, Side::Call, 0.6, 0.8),
            pred(Timeframe::M15, Side::Neutral, 0.5, 0.8),
            pred(Timeframe::H1, Side::Put, 0.9, 0.8),
            pred(Timeframe::H4, Side::Put, 0.9, 0.8),
        ];
        let r = detect(&preds);
        assert_eq!(r.aligned_timeframes, vec![Timeframe::H1, Timeframe::H4]);
    }

    #[test]
    fn missing_timeframe_breaks_run() {
        let preds = [
            pred(Timeframe::M5, Side::Call, 0.8, 0.8),
            pred(Timeframe::M15, Side::Call, 0.8, 0.8),
            pred(Timeframe::H1, Side::Call, 0.8, 0.8),
        ];
        let r = detect(&preds);
        assert_eq!(r.aligned_timeframes, vec![Timeframe::M5, Timeframe::M15]);
    }

    #[test]
    fn boost_is_capped() {
        let preds: Vec<TimeframePrediction> = Timeframe::HIERARCHY
            .iter()
            .map(|tf| pred(*tf, Side::Call, 0.9, 1.0))
            .collect();
        let r = detect(&preds);
        assert!((r.consensus_strength - 1.0).abs() < 1e-12);
        assert!((r.confidence_boost - 1.4).abs() < 1e-12);
    }

    #[test]
    fn empty_input_is_neutral() {
        let r = detect(&[]);
        assert_eq!(r.dominant_side, Side::Neutral);
        assert!((r.confidence_boost - 1.0).abs() < 1e-12);
        assert!(r.aligned_timeframes.is_empty());
    }
}
