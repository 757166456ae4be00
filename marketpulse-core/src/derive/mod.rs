//! Metric derivation — raw per-asset series into derived indicators.
//!
//! - [`stats`]: side-effect-free numeric functions (volatility, correlation,
//!   basis, returns, bp changes, TRIN, spreads)
//! - [`plan`]: a declarative list of rules that applies those functions to a
//!   [`SeriesSet`] and emits [`MetricRecord`](crate::record::MetricRecord)s

pub mod plan;
pub mod stats;

pub use plan::{DerivationPlan, DerivationRule, RunContext, Series, SeriesId, SeriesSet};
pub use stats::{
    basis, bp_change, breadth_ratio, realized_volatility, rolling_correlation, series_change,
    simple_return, yield_spread, DeriveError, TRADING_DAYS_PER_YEAR,
};
