//! # regime-alloc
//!
//! Macroeconomic regime classification and regime-conditioned, long-only portfolio
//! optimization under a per-asset weight cap.
//!
//! - [`quant::regime`] labels each period from growth and inflation trends.
//! - [`quant::portfolio`] maximizes the Sharpe or Sortino ratio per regime and sub-period,
//!   and runs rolling-window backtests.
//! - [`data`] loads the macro series and the return table; [`report`] writes the results.

pub mod config;
pub mod data;
pub mod quant;
pub mod report;

pub use config::AppConfig;
pub use quant::portfolio::AllocationEngine;
pub use quant::portfolio::AllocationReport;
pub use quant::regime::RegimeClassifier;
pub use quant::regime::RegimeLabel;
