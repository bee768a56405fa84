// =============================================================================
// Portfolio Heat — Correlation-weighted exposure ceiling
// =============================================================================
//
// heat = Σ size · |correlation| over open positions.  A proposed position
// that would push heat above the ceiling is shrunk to fit; if the fitted
// size falls below the minimum position it is rejected outright.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine_config::KellyParams;

/// An open position as seen by the heat check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub id: String,
    /// Fraction of capital.
    pub size: f64,
    /// Correlation with the proposed position's underlying, in [-1, 1].
    pub correlation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatCheck {
    pub current_heat: f64,
    pub proposed_size: f64,
    pub allowed_size: f64,
    pub resulting_heat: f64,
    pub approved: bool,
    pub reduced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Correlation used for heat; unknown correlation is treated as perfect.
fn heat_correlation(correlation: f64) -> f64 {
    if correlation.is_finite() {
        correlation.abs().min(1.0)
    } else {
        1.0
    }
}

/// Current correlation-weighted exposure of `open`.
pub fn portfolio_heat(open: &[OpenPosition]) -> f64 {
    open.iter()
        .filter(|p| {
            let ok = p.size.is_finite() && p.size >= 0.0;
            if !ok {
                warn!(position = %p.id, size = p.size, "open position with unusable size ignored");
            }
            ok
        })
        .map(|p| p.size * heat_correlation(p.correlation))
        .sum()
}

/// Fit `proposed_size` (correlated by `correlation`) under the heat ceiling.
pub fn check_portfolio_heat(
    open: &[OpenPosition],
    proposed_size: f64,
    correlation: f64,
    params: &KellyParams,
) -> HeatCheck {
    let current_heat = portfolio_heat(open);
    let corr = heat_correlation(correlation);
    let proposed = if proposed_size.is_finite() {
        proposed_size.max(0.0)
    } else {
        0.0
    };

    let rejected = |reason: String| HeatCheck {
        current_heat,
        proposed_size: proposed,
        allowed_size: 0.0,
        resulting_heat: current_heat,
        approved: false,
        reduced: false,
        reason: Some(reason),
    };

    if current_heat + proposed * corr <= params.heat_ceiling {
        return HeatCheck {
            current_heat,
            proposed_size: proposed,
            allowed_size: proposed,
            resulting_heat: current_heat + proposed * corr,
            approved: true,
            reduced: false,
            reason: None,
        };
    }

    let available = (params.heat_ceiling - current_heat).max(0.0);
    let fitted = available / corr.max(f64::EPSILON);
    if fitted < params.min_size {
        debug!(
            heat = format!("{:.3}", current_heat),
            fitted = format!("{:.4}", fitted),
            "position rejected by heat ceiling"
        );
        return rejected(format!(
            "heat {:.3} leaves room for {:.4}, below minimum {:.2}",
            current_heat, fitted, params.min_size
        ));
    }

    debug!(
        heat = format!("{:.3}", current_heat),
        proposed = format!("{:.4}", proposed),
        fitted = format!("{:.4}", fitted),
        "position reduced to fit heat ceiling"
    );
    HeatCheck {
        current_heat,
        proposed_size: proposed,
        allowed_size: fitted,
        resulting_heat: current_heat + fitted * corr,
        approved: true,
        reduced: true,
        reason: Some(format!(
            "reduced from {:.4} to {:.4} to stay under heat {:.2}",
            proposed, fitted, params.heat_ceiling
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(id: &str, size: f64, correlation: f64) -> OpenPosition {
        OpenPosition {
            id: id.into(),
            size,
            correlation,
        }
    }

    #[test]
    fn heat_sums_correlated_exposure() {
        let open = [pos("a", 0.3, 0.5), pos("b", 0.4, -1.0), pos("c", f64::NAN, 1.0)];
        assert!((portfolio_heat(&open) - 0.55).abs() < 1e-12);
    }

    #[test]
    fn fits_under_ceiling() {
        let open = [pos("a", 0.3, 0.5), pos("b", 0.4, 1.0)];
        let h = check_portfolio_heat(&open, 0.25, 0.8, &KellyParams::default());
        assert!(h.approved && !h.reduced);
        assert!((h.allowed_size - 0.25).abs() < 1e-12);
        assert!((h.resulting_heat - 0.75).abs() < 1e-12);
    }

    #[test]
    fn reduces_to_fit() {
        let open = [pos("a", 0.9, 1.0)];
        let h = check_portfolio_heat(&open, 0.25, 1.0, &KellyParams::default());
        assert!(h.approved && h.reduced);
        assert!((h.allowed_size - 0.1).abs() < 1e-12);
        assert!(h.resulting_heat <= 1.0 + 1e-12);
    }

    #[test]
    fn rejects_when_fitted_below_floor() {
        let open = [pos("a", 0.995, 1.0)];
        let h = check_portfolio_heat(&open, 0.2, 1.0, &KellyParams::default());
        assert!(!h.approved);
        assert_eq!(h.allowed_size, 0.0);
        assert!(h.reason.is_some());
    }

    #[test]
    fn uncorrelated_position_is_free() {
        let open = [pos("a", 1.0, 1.0)];
        let h = check_portfolio_heat(&open, 0.2, 0.0, &KellyParams::default());
        assert!(h.approved && !h.reduced);
    }
}
