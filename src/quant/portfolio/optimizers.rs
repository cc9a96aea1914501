//! # Ratio Optimizer
//!
//! $$
//! \max_{\mathbf w\in\Delta_u}\ \frac{\bar p(\mathbf w)-\tau}{\rho\big(p(\mathbf w)\big)},\qquad
//! p_t(\mathbf w)=\sum_i w_i r_{i,t}
//! $$
//!
//! Nelder-Mead runs on unconstrained parameters that are mapped onto the capped simplex
//! before every evaluation, so each candidate already satisfies the budget and the bounds.
//! Its best point is then refined by exact line searches along pairwise transfers
//! $w_i \mathrel{+}= d,\ w_j \mathrel{-}= d$, which stay on $\Delta_u$ and move off the
//! faces where the projection flattens the cost.

use std::collections::BTreeMap;

use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::core::State;
use argmin::core::TerminationReason;
use argmin::solver::neldermead::NelderMead;
use tracing::debug;
use tracing::warn;

use super::data::complete_columns;
use super::data::eligible_assets;
use super::data::portfolio_returns;
use super::data::project_capped_simplex;
use super::data::ratio_stats;
use super::data::seed_weights;
use super::types::AllocationResult;
use super::types::OptimizerConfig;
use super::types::RatioMethod;
use super::types::RegimePartition;
use super::types::SkipReason;
use super::types::UniverseMode;

/// Objective ceiling. A riskless portfolio with positive excess has an infinite ratio and
/// the simplex needs finite costs to measure its spread.
const RATIO_CEILING: f64 = 1e6;

/// Weight the dust filter may leave unallocated when the kept assets cannot be re-projected.
const BUDGET_TOLERANCE: f64 = 1e-3;

/// Width at which a pairwise line search stops.
const LINE_TOLERANCE: f64 = 1e-10;

const INV_PHI: f64 = 0.618_033_988_749_895;

#[derive(Clone)]
struct RatioCost {
  columns: Vec<Vec<f64>>,
  method: RatioMethod,
  target: f64,
  cap: f64,
}

impl RatioCost {
  /// Cost of weights that are already feasible. NaN maps to `+inf` so it never wins.
  fn value(&self, w: &[f64]) -> f64 {
    let series = portfolio_returns(w, &self.columns);
    let ratio = ratio_stats(&series, self.method, self.target).ratio;
    if ratio.is_nan() {
      return f64::INFINITY;
    }

    -ratio.min(RATIO_CEILING)
  }
}

impl CostFunction for RatioCost {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
    let c = self.value(&project_capped_simplex(x, self.cap));
    if c == f64::INFINITY {
      return Err(argmin::core::Error::msg("objective evaluated to NaN"));
    }

    Ok(c)
  }
}

/// Weights and statistics of a solved universe.
#[derive(Clone, Debug, PartialEq)]
pub struct SolvedPortfolio {
  /// Assets with a weight of at least `min_weight`.
  pub assets: Vec<String>,
  pub weights: Vec<f64>,
  pub expected_return: f64,
  pub risk: f64,
  pub ratio: f64,
  /// Complete rows the solve used.
  pub observation_count: usize,
}

/// Minimize a unimodal `f` on `[lo, hi]`.
fn golden_section<F: FnMut(f64) -> f64>(mut f: F, mut lo: f64, mut hi: f64) -> (f64, f64) {
  let mut a = hi - INV_PHI * (hi - lo);
  let mut b = lo + INV_PHI * (hi - lo);
  let mut fa = f(a);
  let mut fb = f(b);

  while hi - lo > LINE_TOLERANCE {
    if fa <= fb {
      hi = b;
      b = a;
      fb = fa;
      a = hi - INV_PHI * (hi - lo);
      fa = f(a);
    } else {
      lo = a;
      a = b;
      fa = fb;
      b = lo + INV_PHI * (hi - lo);
      fb = f(b);
    }
  }

  if fa <= fb {
    (a, fa)
  } else {
    (b, fb)
  }
}

/// Coordinate search over pairwise transfers.
///
/// Each sweep line-searches every pair `(i, j)` over the transfers that keep both weights
/// in `[0, u]`, endpoints included. A sweep that lowers the cost by at most `tolerance`
/// ends the search; running out of `max_sweeps` first is a solver failure.
fn pairwise_search(
  cost: &RatioCost,
  mut w: Vec<f64>,
  tolerance: f64,
  max_sweeps: u64,
) -> Result<Vec<f64>, SkipReason> {
  let n = w.len();
  let cap = cost.cap;
  let mut current = cost.value(&w);

  for _ in 0..max_sweeps {
    let start = current;
    for i in 0..n {
      for j in (i + 1)..n {
        let (wi, wj) = (w[i], w[j]);
        let lo = -wi.min(cap - wj);
        let hi = (cap - wi).min(wj);
        if hi - lo <= LINE_TOLERANCE {
          continue;
        }

        let mut trial = w.clone();
        let mut along = |d: f64| {
          trial[i] = (wi + d).clamp(0.0, cap);
          trial[j] = (wj - d).clamp(0.0, cap);
          cost.value(&trial)
        };
        let mut best = golden_section(&mut along, lo, hi);
        for d in [lo, hi] {
          let v = along(d);
          if v < best.1 {
            best = (d, v);
          }
        }

        if best.1 < current {
          w[i] = (wi + best.0).clamp(0.0, cap);
          w[j] = (wj - best.0).clamp(0.0, cap);
          current = best.1;
        }
      }
    }

    if start - current <= tolerance {
      return Ok(project_capped_simplex(&w, cap));
    }
  }

  Err(SkipReason::SolverFailed(format!(
    "pairwise search still improving after {max_sweeps} sweeps"
  )))
}

/// Nelder-Mead from the capped equal-weight seed, refined by [`pairwise_search`].
///
/// Running out of Nelder-Mead iterations is not fatal since the pairwise search decides
/// convergence; any other early stop is.
fn solve_weights(cost: &RatioCost, config: &OptimizerConfig) -> Result<Vec<f64>, SkipReason> {
  let n = cost.columns.len();
  let cap = cost.cap;

  let x0 = seed_weights(n, cap);
  let mut simplex = Vec::with_capacity(n + 1);
  simplex.push(x0.clone());
  for i in 0..n {
    let mut point = x0.clone();
    point[i] += cap;
    simplex.push(point);
  }

  let solver = NelderMead::new(simplex)
    .with_sd_tolerance(config.sd_tolerance)
    .map_err(|e| SkipReason::SolverFailed(e.to_string()))?;

  let res = Executor::new(cost.clone(), solver)
    .configure(|state| state.max_iters(config.max_iters))
    .run()
    .map_err(|e| SkipReason::SolverFailed(e.to_string()))?;

  match res.state.get_termination_reason() {
    Some(TerminationReason::SolverConverged) | Some(TerminationReason::MaxItersReached) => {}
    Some(reason) => return Err(SkipReason::SolverFailed(format!("{reason:?}"))),
    None => return Err(SkipReason::SolverFailed("solver did not terminate".to_string())),
  }

  let best_x = res
    .state
    .best_param
    .ok_or_else(|| SkipReason::SolverFailed("solver returned no parameters".to_string()))?;

  pairwise_search(
    cost,
    project_capped_simplex(&best_x, cap),
    config.sd_tolerance,
    config.max_iters,
  )
}

/// Positions of `w` at or above `min_weight` when the kept assets cannot be re-projected.
///
/// The left-out weight stays unallocated, so it may not exceed [`BUDGET_TOLERANCE`].
fn without_dust(w: &[f64], config: &OptimizerConfig) -> Result<Vec<usize>, SkipReason> {
  let kept: Vec<usize> = (0..w.len()).filter(|&i| w[i] >= config.min_weight).collect();
  let dropped: f64 = (0..w.len())
    .filter(|&i| w[i] < config.min_weight)
    .map(|i| w[i])
    .sum();

  if kept.is_empty() || dropped > BUDGET_TOLERANCE {
    warn!(
      kept = kept.len(),
      dropped,
      max_weight = config.max_weight,
      "weights below the minimum cannot be dropped within the cap"
    );
    return Err(SkipReason::Infeasible {
      assets: kept.len(),
      max_weight: config.max_weight,
    });
  }

  Ok(kept)
}

/// Maximize `method` over `assets`, using only rows complete across them.
///
/// Every asset takes part; universe selection happens in [`optimize`].
pub fn solve(
  assets: &[String],
  rows: &[Vec<Option<f64>>],
  method: RatioMethod,
  config: &OptimizerConfig,
) -> Result<SolvedPortfolio, SkipReason> {
  if assets.is_empty() {
    return Err(SkipReason::NoEligibleAssets { rows: rows.len() });
  }

  let indices: Vec<usize> = (0..assets.len()).collect();
  let columns = complete_columns(rows, &indices);
  let found = columns.first().map(|c| c.len()).unwrap_or(0);
  if found < config.min_observations {
    return Err(SkipReason::InsufficientObservations {
      found,
      required: config.min_observations,
    });
  }

  let n = assets.len();
  let cap = config.max_weight;
  if (n as f64) * cap < 1.0 - 1e-12 {
    return Err(SkipReason::Infeasible {
      assets: n,
      max_weight: cap,
    });
  }

  let cost_over = |active: &[usize]| RatioCost {
    columns: active.iter().map(|&i| columns[i].clone()).collect(),
    method,
    target: config.target_return,
    cap,
  };

  // dust is dropped and the rest re-solved until every kept weight clears min_weight
  let mut active = indices;
  let mut weights = solve_weights(&cost_over(&active), config)?;
  loop {
    let kept: Vec<usize> = (0..active.len())
      .filter(|&k| weights[k] >= config.min_weight)
      .collect();
    if kept.len() == active.len() {
      break;
    }

    if (kept.len() as f64) * cap < 1.0 - 1e-12 {
      let kept = without_dust(&weights, config)?;
      weights = kept.iter().map(|&k| weights[k]).collect();
      active = kept.iter().map(|&k| active[k]).collect();
      break;
    }

    let start: Vec<f64> = kept.iter().map(|&k| weights[k]).collect();
    active = kept.iter().map(|&k| active[k]).collect();
    weights = pairwise_search(
      &cost_over(&active),
      project_capped_simplex(&start, cap),
      config.sd_tolerance,
      config.max_iters,
    )?;
  }

  let active_columns: Vec<Vec<f64>> = active.iter().map(|&i| columns[i].clone()).collect();
  let series = portfolio_returns(&weights, &active_columns);
  let stats = ratio_stats(&series, method, config.target_return);

  Ok(SolvedPortfolio {
    assets: active.iter().map(|&i| assets[i].clone()).collect(),
    weights,
    expected_return: stats.mean,
    risk: stats.risk,
    ratio: stats.ratio,
    observation_count: found,
  })
}

/// Optimize one regime partition.
///
/// `Err` carries the reason the partition has no allocation; it is an expected outcome.
pub fn optimize(
  partition: &RegimePartition,
  method: RatioMethod,
  config: &OptimizerConfig,
) -> Result<AllocationResult, SkipReason> {
  let (assets, rows) = match config.universe {
    UniverseMode::Fixed => (partition.assets.clone(), partition.rows.clone()),
    UniverseMode::Dynamic => {
      let keep = eligible_assets(
        &partition.rows,
        partition.assets.len(),
        config.sufficiency_threshold,
      );
      if keep.is_empty() {
        return Err(SkipReason::NoEligibleAssets {
          rows: partition.rows.len(),
        });
      }
      let assets = keep.iter().map(|&i| partition.assets[i].clone()).collect();
      let rows = partition
        .rows
        .iter()
        .map(|r| keep.iter().map(|&i| r.get(i).copied().flatten()).collect())
        .collect();
      (assets, rows)
    }
  };

  let solved = match solve(&assets, &rows, method, config) {
    Ok(solved) => solved,
    Err(reason) => {
      if let SkipReason::SolverFailed(msg) = &reason {
        warn!(
          window = %partition.window,
          regime = %partition.regime,
          %method,
          reason = %msg,
          "solver did not converge"
        );
      }
      return Err(reason);
    }
  };

  debug!(
    window = %partition.window,
    regime = %partition.regime,
    %method,
    assets = solved.assets.len(),
    ratio = solved.ratio,
    "partition optimized"
  );

  let weights: BTreeMap<String, f64> = solved
    .assets
    .into_iter()
    .zip(solved.weights)
    .collect();

  Ok(AllocationResult {
    period_window: partition.window.clone(),
    method,
    regime: partition.regime,
    weights,
    expected_return: solved.expected_return,
    risk: solved.risk,
    risk_ratio: solved.ratio,
    observation_count: solved.observation_count,
  })
}
