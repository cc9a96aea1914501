//! # Portfolio
//!
//! $$
//! \max_{\mathbf w}\ \frac{\mathbb E[R_p]-\tau}{\rho(R_p)}\quad\text{s.t.}\quad \mathbf 1^\top\mathbf w=1,\ 0\le w_i\le u
//! $$
//!
//! Regime-conditioned Sharpe/Sortino optimization, the batch engine and the rolling backtest.

pub mod backtest;
pub mod data;
pub mod engine;
pub mod optimizers;
pub mod types;

pub use backtest::run_rolling_backtest;
pub use backtest::BacktestReport;
pub use backtest::BacktestSummary;
pub use backtest::Rebalance;
pub use backtest::RollingConfig;
pub use data::complete_columns;
pub use data::eligible_assets;
pub use data::project_capped_simplex;
pub use data::ratio_stats;
pub use data::RatioStats;
pub use engine::join_regimes;
pub use engine::AllocationEngine;
pub use engine::AllocationEngineConfig;
pub use engine::AllocationReport;
pub use engine::LabeledPanel;
pub use engine::SubPeriod;
pub use optimizers::optimize;
pub use optimizers::solve;
pub use optimizers::SolvedPortfolio;
pub use types::AllocationResult;
pub use types::OptimizerConfig;
pub use types::PartitionOutcome;
pub use types::RatioMethod;
pub use types::RegimePartition;
pub use types::SkipReason;
pub use types::UniverseMode;
