//! # Rolling Backtest
//!
//! $$
//! V_{t+1} = V_t\Big(1 + \tfrac{1}{100}\textstyle\sum_i w_{i,k(t)}\,r_{i,t+1}\Big)
//! $$
//!
//! Rebalances every `step` periods on the trailing `window` complete rows and holds the
//! weights until the next rebalance.

use std::collections::BTreeMap;

use anyhow::bail;
use anyhow::Result;
use chrono::NaiveDate;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use super::data::ratio_stats;
use super::data::sample_std;
use super::optimizers::solve;
use super::types::OptimizerConfig;
use super::types::RatioMethod;
use super::types::SkipReason;
use crate::data::ReturnMatrix;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RollingConfig {
  /// Trailing rows used by each solve.
  pub window: usize,
  /// Rows between rebalances.
  pub step: usize,
  pub method: RatioMethod,
  pub initial_value: f64,
  pub periods_per_year: usize,
}

impl Default for RollingConfig {
  fn default() -> Self {
    Self {
      window: 24,
      step: 3,
      method: RatioMethod::Sortino,
      initial_value: 100.0,
      periods_per_year: 12,
    }
  }
}

impl RollingConfig {
  pub fn validate(&self) -> Result<()> {
    if self.window == 0 || self.step == 0 {
      bail!("rolling window and step must be positive");
    }
    if !(self.initial_value > 0.0) {
      bail!("initial_value must be positive, got {}", self.initial_value);
    }
    if self.periods_per_year == 0 {
      bail!("periods_per_year must be positive");
    }
    Ok(())
  }
}

/// Weights chosen at one rebalance date.
#[derive(Clone, Debug, PartialEq)]
pub struct Rebalance {
  pub date: NaiveDate,
  /// Weights held from this date on. Empty means cash.
  pub weights: BTreeMap<String, f64>,
  /// In-sample ratio of a successful solve.
  pub ratio: Option<f64>,
  /// Why the solve failed; the previous weights were kept.
  pub skip_reason: Option<SkipReason>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BacktestSummary {
  /// Percent.
  pub total_return: f64,
  /// Percent per year, geometric.
  pub annualized_return: f64,
  /// Percent per year.
  pub annualized_volatility: f64,
  pub annualized_ratio: f64,
  /// Most negative peak-to-trough move, percent (`<= 0`).
  pub max_drawdown: f64,
}

#[derive(Clone, Debug)]
pub struct BacktestReport {
  pub method: RatioMethod,
  pub assets: Vec<String>,
  pub rebalances: Vec<Rebalance>,
  /// Portfolio value after each out-of-sample period.
  pub values: Vec<(NaiveDate, f64)>,
  /// Out-of-sample portfolio returns, percent.
  pub period_returns: Vec<f64>,
  pub summary: BacktestSummary,
}

fn max_drawdown(initial: f64, values: &[f64]) -> f64 {
  let mut peak = initial;
  let mut worst = 0.0_f64;
  for &v in values {
    peak = peak.max(v);
    worst = worst.min((v - peak) / peak * 100.0);
  }
  worst
}

/// Rolling-window rebalancing backtest over rows complete across every asset.
pub fn run_rolling_backtest(
  returns: &ReturnMatrix,
  optimizer: &OptimizerConfig,
  rolling: &RollingConfig,
) -> Result<BacktestReport> {
  optimizer.validate()?;
  rolling.validate()?;

  let assets = returns.assets().to_vec();
  let rows: Vec<_> = returns.complete_rows().collect();
  if rows.len() <= rolling.window {
    bail!(
      "{} complete rows is not enough for a {}-period rolling window",
      rows.len(),
      rolling.window
    );
  }

  let mut rebalances = Vec::new();
  let mut values = Vec::with_capacity(rows.len() - rolling.window);
  let mut period_returns = Vec::with_capacity(rows.len() - rolling.window);
  let mut held = vec![0.0; assets.len()];
  let mut value = rolling.initial_value;

  for start in (rolling.window..rows.len()).step_by(rolling.step) {
    let window_rows: Vec<Vec<Option<f64>>> = rows[start - rolling.window..start]
      .iter()
      .map(|r| r.values.clone())
      .collect();
    let date = rows[start].date;

    let (ratio, skip_reason) = match solve(&assets, &window_rows, rolling.method, optimizer) {
      Ok(solved) => {
        held = assets
          .iter()
          .map(|a| {
            solved
              .assets
              .iter()
              .position(|s| s == a)
              .map_or(0.0, |j| solved.weights[j])
          })
          .collect();
        (Some(solved.ratio), None)
      }
      Err(reason) => {
        warn!(%date, %reason, "rebalance failed, keeping previous weights");
        (None, Some(reason))
      }
    };

    rebalances.push(Rebalance {
      date,
      weights: assets
        .iter()
        .zip(held.iter())
        .filter(|(_, w)| **w > 0.0)
        .map(|(a, &w)| (a.clone(), w))
        .collect(),
      ratio,
      skip_reason,
    });

    let end = (start + rolling.step).min(rows.len());
    for row in &rows[start..end] {
      let r: f64 = held
        .iter()
        .zip(row.values.iter())
        .map(|(w, v)| w * v.unwrap_or(0.0))
        .sum();
      value *= 1.0 + r / 100.0;
      period_returns.push(r);
      values.push((row.date, value));
    }
  }

  let ppy = rolling.periods_per_year as f64;
  let growth = value / rolling.initial_value;
  let path: Vec<f64> = values.iter().map(|(_, v)| *v).collect();
  let summary = BacktestSummary {
    total_return: (growth - 1.0) * 100.0,
    annualized_return: (growth.powf(ppy / period_returns.len() as f64) - 1.0) * 100.0,
    annualized_volatility: sample_std(&period_returns) * ppy.sqrt(),
    annualized_ratio: ratio_stats(&period_returns, rolling.method, optimizer.target_return).ratio
      * ppy.sqrt(),
    max_drawdown: max_drawdown(rolling.initial_value, &path),
  };

  info!(
    rebalances = rebalances.len(),
    periods = period_returns.len(),
    total_return = summary.total_return,
    "rolling backtest finished"
  );

  Ok(BacktestReport {
    method: rolling.method,
    assets,
    rebalances,
    values,
    period_returns,
    summary,
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use chrono::Months;

  use super::*;
  use crate::data::ReturnRow;

  fn matrix(n: u32, f: impl Fn(u32) -> Vec<Option<f64>>) -> ReturnMatrix {
    let start = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
    let rows = (0..n)
      .map(|i| ReturnRow {
        date: start.checked_add_months(Months::new(i)).unwrap(),
        values: f(i),
      })
      .collect();
    ReturnMatrix::new(vec!["A".into(), "B".into(), "C".into()], rows).unwrap()
  }

  fn optimizer(max_weight: f64) -> OptimizerConfig {
    OptimizerConfig {
      max_weight,
      ..Default::default()
    }
  }

  #[test]
  fn constant_returns_compound() {
    let returns = matrix(40, |_| vec![Some(1.0); 3]);
    let report = run_rolling_backtest(&returns, &optimizer(0.5), &RollingConfig::default()).unwrap();

    assert_eq!(report.rebalances.len(), 6);
    assert_eq!(report.values.len(), 16);
    assert_abs_diff_eq!(report.values[15].1, 100.0 * 1.01_f64.powi(16), epsilon = 1e-9);
    assert_abs_diff_eq!(
      report.summary.total_return,
      (1.01_f64.powi(16) - 1.0) * 100.0,
      epsilon = 1e-9
    );
    assert_eq!(report.summary.max_drawdown, 0.0);
    for rebalance in &report.rebalances {
      assert_abs_diff_eq!(rebalance.weights.values().sum::<f64>(), 1.0, epsilon = 1e-9);
    }
  }

  #[test]
  fn failed_solves_hold_cash() {
    let returns = matrix(30, |i| vec![Some(i as f64 * 0.1), Some(-0.5), Some(0.7)]);
    let report = run_rolling_backtest(&returns, &optimizer(0.25), &RollingConfig::default()).unwrap();

    assert_eq!(report.rebalances.len(), 2);
    for rebalance in &report.rebalances {
      assert!(rebalance.weights.is_empty());
      assert!(matches!(rebalance.skip_reason, Some(SkipReason::Infeasible { .. })));
    }
    assert!(report.values.iter().all(|(_, v)| (*v - 100.0).abs() < 1e-12));
  }

  #[test]
  fn short_history_is_an_error() {
    let returns = matrix(24, |_| vec![Some(1.0); 3]);
    assert!(run_rolling_backtest(&returns, &optimizer(0.5), &RollingConfig::default()).is_err());
  }

  #[test]
  fn incomplete_rows_are_dropped_before_windowing() {
    let returns = matrix(30, |i| {
      if i % 10 == 0 {
        vec![None, Some(1.0), Some(1.0)]
      } else {
        vec![Some(1.0); 3]
      }
    });
    let rolling = RollingConfig {
      window: 12,
      ..Default::default()
    };
    let report = run_rolling_backtest(&returns, &optimizer(0.5), &rolling).unwrap();
    assert_eq!(report.values.len(), 27 - 12);
  }

  #[test]
  fn drawdown_tracks_the_running_peak() {
    assert_abs_diff_eq!(max_drawdown(100.0, &[110.0, 99.0, 120.0, 108.0]), -10.0, epsilon = 1e-12);
    assert_eq!(max_drawdown(100.0, &[101.0, 102.0]), 0.0);
  }
}
