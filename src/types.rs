// =============================================================================
// Shared types used across the Hurricane confidence engine
// =============================================================================

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Epsilon substituted for zero or near-zero denominators.
pub const EPSILON: f64 = 1e-9;

/// Chart timeframe. Declaration order is the fast → slow hierarchy used by
/// the cross-timeframe consensus scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// Full hierarchy, fastest first.
    pub const HIERARCHY: [Timeframe; 7] = [
        Self::M1,
        Self::M5,
        Self::M15,
        Self::M30,
        Self::H1,
        Self::H4,
        Self::D1,
    ];

    /// Position of this timeframe in [`Timeframe::HIERARCHY`].
    pub fn rank(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    /// Parse a comma-separated list such as `"5m,15m,1h"`, sorted fast to
    /// slow with duplicates removed.
    pub fn parse_list(list: &str) -> anyhow::Result<Vec<Timeframe>> {
        let mut tfs = list
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse::<Timeframe>)
            .collect::<anyhow::Result<Vec<_>>>()?;
        if tfs.is_empty() {
            anyhow::bail!("no timeframes listed");
        }
        tfs.sort();
        tfs.dedup();
        Ok(tfs)
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Self::M15
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::HIERARCHY
            .iter()
            .copied()
            .find(|tf| tf.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("unknown timeframe '{s}'"))
    }
}

/// Five-band direction reported for a fused signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    StrongSell,
}

impl Direction {
    /// +1 for bullish bands, -1 for bearish bands, 0 for neutral.
    pub fn sign(self) -> i32 {
        match self {
            Self::StrongBuy | Self::Buy => 1,
            Self::Neutral => 0,
            Self::Sell | Self::StrongSell => -1,
        }
    }

    pub fn side(self) -> Side {
        match self.sign() {
            1 => Side::Call,
            -1 => Side::Put,
            _ => Side::Neutral,
        }
    }
}

impl Default for Direction {
    fn default() -> Self {
        Self::Neutral
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrongBuy => write!(f, "STRONG_BUY"),
            Self::Buy => write!(f, "BUY"),
            Self::Neutral => write!(f, "NEUTRAL"),
            Self::Sell => write!(f, "SELL"),
            Self::StrongSell => write!(f, "STRONG_SELL"),
        }
    }
}

/// Option side a direction maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Call,
    Put,
    Neutral,
}

impl Default for Side {
    fn default() -> Self {
        Self::Neutral
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CALL"),
            Self::Put => write!(f, "PUT"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Replace a non-finite or near-zero denominator with [`EPSILON`].
pub fn floor_denominator(value: f64) -> f64 {
    if !value.is_finite() || value.abs() < EPSILON {
        EPSILON
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_is_fast_to_slow() {
        let ranks: Vec<usize> = Timeframe::HIERARCHY.iter().map(|t| t.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3, 4, 5, 6]);
        assert!(Timeframe::M5 < Timeframe::H4);
    }

    #[test]
    fn timeframe_parses_and_serialises_as_label() {
        assert_eq!("15m".parse::<Timeframe>().unwrap(), Timeframe::M15);
        assert_eq!(" 1D ".parse::<Timeframe>().unwrap(), Timeframe::D1);
        assert!("2h".parse::<Timeframe>().is_err());
        assert_eq!(serde_json::to_string(&Timeframe::H1).unwrap(), "\"1h\"");
    }

    #[test]
    fn timeframe_list_is_sorted_and_deduped() {
        assert_eq!(
            Timeframe::parse_list("1h, 5m,,15m,5m").unwrap(),
            vec![Timeframe::M5, Timeframe::M15, Timeframe::H1]
        );
        assert!(Timeframe::parse_list(" , ").is_err());
        assert!(Timeframe::parse_list("5m,2h").is_err());
    }

    #[test]
    fn direction_maps_to_side() {
        assert_eq!(Direction::StrongBuy.side(), Side::Call);
        assert_eq!(Direction::Sell.side(), Side::Put);
        assert_eq!(Direction::Neutral.side(), Side::Neutral);
        assert_eq!(
            serde_json::to_string(&Direction::StrongSell).unwrap(),
            "\"STRONG_SELL\""
        );
    }

    #[test]
    fn denominator_floor() {
        assert_eq!(floor_denominator(0.0), EPSILON);
        assert_eq!(floor_denominator(f64::NAN), EPSILON);
        assert_eq!(floor_denominator(2.5), 2.5);
    }
}
