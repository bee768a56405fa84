// =============================================================================
// Sizing Module
// =============================================================================
//
// - Volatility-aware fractional Kelly sizer
// - Correlation-weighted portfolio heat ceiling

pub mod heat;
pub mod kelly;

pub use heat::{check_portfolio_heat, portfolio_heat, HeatCheck, OpenPosition};
pub use kelly::{KellyParameters, KellySizeResult, PositionSizer, VolatilityAwareKelly};
