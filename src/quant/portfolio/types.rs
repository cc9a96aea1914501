//! # Portfolio Types
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}\in\Delta_u} \frac{\mathbb E[R_p]-\tau}{\rho(R_p)},\qquad
//! \Delta_u=\{\mathbf w:\ \textstyle\sum_i w_i=1,\ 0\le w_i\le u\}
//! $$
//!
//! Shared enums, configuration and result containers for the regime optimizer.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use anyhow::anyhow;
use anyhow::bail;
use impl_new_derive::ImplNew;
use serde::Deserialize;
use serde::Serialize;

use crate::quant::regime::RegimeLabel;

/// Risk-adjusted ratio maximized by the optimizer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatioMethod {
  /// Excess mean over the sample standard deviation.
  #[default]
  Sharpe,
  /// Excess mean over the downside deviation.
  Sortino,
}

impl RatioMethod {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Sharpe => "sharpe",
      Self::Sortino => "sortino",
    }
  }
}

impl Display for RatioMethod {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Sharpe => write!(f, "Sharpe"),
      Self::Sortino => write!(f, "Sortino"),
    }
  }
}

impl FromStr for RatioMethod {
  type Err = anyhow::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "sharpe" => Ok(Self::Sharpe),
      "sortino" => Ok(Self::Sortino),
      other => Err(anyhow!("unknown ratio method '{other}' (expected sharpe or sortino)")),
    }
  }
}

/// How the asset universe of a partition is chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UniverseMode {
  /// Every asset of the window takes part; rows with any gap are dropped.
  #[default]
  Fixed,
  /// Per partition, only assets with enough non-missing observations take part.
  Dynamic,
}

/// Optimizer settings shared by every partition.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
  /// Upper bound on every weight, in `(0, 1]`.
  pub max_weight: f64,
  /// Universe selection policy.
  pub universe: UniverseMode,
  /// Target (minimum acceptable) return for the ratio numerator and the downside measure.
  pub target_return: f64,
  /// Minimum complete observations required to optimize.
  pub min_observations: usize,
  /// Minimum non-missing share for an asset in [`UniverseMode::Dynamic`].
  pub sufficiency_threshold: f64,
  /// Cap on Nelder-Mead iterations and, separately, on pairwise search sweeps.
  pub max_iters: u64,
  /// Weights below this are treated as zero and omitted.
  pub min_weight: f64,
  /// Simplex cost spread that stops Nelder-Mead, and the per-sweep improvement below
  /// which the pairwise search reports convergence.
  pub sd_tolerance: f64,
}

impl Default for OptimizerConfig {
  fn default() -> Self {
    Self {
      max_weight: 0.25,
      universe: UniverseMode::Fixed,
      target_return: 0.0,
      min_observations: 5,
      sufficiency_threshold: 0.6,
      max_iters: 1000,
      min_weight: 0.001,
      sd_tolerance: 1e-10,
    }
  }
}

impl OptimizerConfig {
  pub fn validate(&self) -> anyhow::Result<()> {
    if !(self.max_weight > 0.0 && self.max_weight <= 1.0) {
      bail!("max_weight must be in (0, 1], got {}", self.max_weight);
    }
    if !(self.sufficiency_threshold > 0.0 && self.sufficiency_threshold <= 1.0) {
      bail!(
        "sufficiency_threshold must be in (0, 1], got {}",
        self.sufficiency_threshold
      );
    }
    if self.min_observations < 2 {
      bail!("min_observations must be at least 2, got {}", self.min_observations);
    }
    if self.max_iters == 0 {
      bail!("max_iters must be positive");
    }
    if !(self.min_weight >= 0.0 && self.min_weight < self.max_weight) {
      bail!("min_weight must be in [0, max_weight), got {}", self.min_weight);
    }
    if !(self.sd_tolerance > 0.0) {
      bail!("sd_tolerance must be positive, got {}", self.sd_tolerance);
    }
    if !self.target_return.is_finite() {
      bail!("target_return must be finite");
    }
    Ok(())
  }
}

/// Return rows of one `(window, regime)` cell, with the window's exclusions applied.
#[derive(Clone, Debug, ImplNew)]
pub struct RegimePartition {
  /// Sub-period window label.
  pub window: String,
  pub regime: RegimeLabel,
  /// Candidate assets, aligned with every row.
  pub assets: Vec<String>,
  pub rows: Vec<Vec<Option<f64>>>,
}

/// Optimal allocation for one partition.
#[derive(Clone, Debug, PartialEq)]
pub struct AllocationResult {
  pub period_window: String,
  pub method: RatioMethod,
  pub regime: RegimeLabel,
  /// Weights `>= min_weight`, keyed by raw asset identifier.
  pub weights: BTreeMap<String, f64>,
  /// `w · mean_returns` over the observations used by the solver.
  pub expected_return: f64,
  /// Denominator of the ratio (standard or downside deviation).
  pub risk: f64,
  /// Achieved Sharpe or Sortino value.
  pub risk_ratio: f64,
  pub observation_count: usize,
}

impl AllocationResult {
  pub fn total_weight(&self) -> f64 {
    self.weights.values().sum()
  }

  pub fn largest_weight(&self) -> f64 {
    self.weights.values().cloned().fold(0.0, f64::max)
  }

  /// Weights in descending order.
  pub fn sorted_weights(&self) -> Vec<(&str, f64)> {
    let mut out: Vec<(&str, f64)> = self.weights.iter().map(|(a, w)| (a.as_str(), *w)).collect();
    out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    out
  }
}

/// Why a partition has no allocation.
#[derive(Clone, Debug, PartialEq)]
pub enum SkipReason {
  /// No asset passed the data-sufficiency filter.
  NoEligibleAssets { rows: usize },
  /// Too few complete observations.
  InsufficientObservations { found: usize, required: usize },
  /// `assets * max_weight < 1`: the budget cannot be met.
  Infeasible { assets: usize, max_weight: f64 },
  /// The solver did not converge.
  SolverFailed(String),
}

impl Display for SkipReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::NoEligibleAssets { rows } => {
        write!(f, "no asset has sufficient data ({rows} observations)")
      }
      Self::InsufficientObservations { found, required } => {
        write!(f, "only {found} complete observations ({required} required)")
      }
      Self::Infeasible { assets, max_weight } => write!(
        f,
        "{assets} assets capped at {:.1}% cannot sum to 100%",
        max_weight * 100.0
      ),
      Self::SolverFailed(reason) => write!(f, "optimization failed: {reason}"),
    }
  }
}

/// Outcome of one `(window, method, regime)` partition.
#[derive(Clone, Debug, PartialEq)]
pub enum PartitionOutcome {
  Allocated(AllocationResult),
  Skipped {
    period_window: String,
    method: RatioMethod,
    regime: RegimeLabel,
    reason: SkipReason,
  },
}

impl PartitionOutcome {
  pub fn period_window(&self) -> &str {
    match self {
      Self::Allocated(a) => &a.period_window,
      Self::Skipped { period_window, .. } => period_window,
    }
  }

  pub fn method(&self) -> RatioMethod {
    match self {
      Self::Allocated(a) => a.method,
      Self::Skipped { method, .. } => *method,
    }
  }

  pub fn regime(&self) -> RegimeLabel {
    match self {
      Self::Allocated(a) => a.regime,
      Self::Skipped { regime, .. } => *regime,
    }
  }

  pub fn allocation(&self) -> Option<&AllocationResult> {
    match self {
      Self::Allocated(a) => Some(a),
      Self::Skipped { .. } => None,
    }
  }

  pub fn skip_reason(&self) -> Option<&SkipReason> {
    match self {
      Self::Allocated(_) => None,
      Self::Skipped { reason, .. } => Some(reason),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn method_parses_case_insensitively() {
    assert_eq!("Sortino".parse::<RatioMethod>().unwrap(), RatioMethod::Sortino);
    assert_eq!(" sharpe ".parse::<RatioMethod>().unwrap(), RatioMethod::Sharpe);
    assert!("cvar".parse::<RatioMethod>().is_err());
  }

  #[test]
  fn default_config_is_valid() {
    OptimizerConfig::default().validate().unwrap();
  }

  #[test]
  fn invalid_config_is_rejected() {
    let cfg = OptimizerConfig {
      max_weight: 0.0,
      ..Default::default()
    };
    assert!(cfg.validate().is_err());

    let cfg = OptimizerConfig {
      sufficiency_threshold: 1.5,
      ..Default::default()
    };
    assert!(cfg.validate().is_err());
  }

  #[test]
  fn sorted_weights_are_descending() {
    let result = AllocationResult {
      period_window: "Full Sample".into(),
      method: RatioMethod::Sharpe,
      regime: RegimeLabel::RisingGrowthRisingInflation,
      weights: [("A".to_string(), 0.2), ("B".to_string(), 0.5), ("C".to_string(), 0.3)]
        .into_iter()
        .collect(),
      expected_return: 1.0,
      risk: 1.0,
      risk_ratio: 1.0,
      observation_count: 10,
    };

    let sorted = result.sorted_weights();
    assert_eq!(sorted[0].0, "B");
    assert_eq!(sorted[2].0, "A");
    assert!((result.total_weight() - 1.0).abs() < 1e-12);
    assert!((result.largest_weight() - 0.5).abs() < 1e-12);
  }

  #[test]
  fn skip_reasons_render_for_reports() {
    let reason = SkipReason::InsufficientObservations {
      found: 4,
      required: 5,
    };
    assert_eq!(reason.to_string(), "only 4 complete observations (5 required)");
  }
}
