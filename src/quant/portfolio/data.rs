//! # Portfolio Data Utilities
//!
//! $$
//! \Pi_{\Delta_u}(\mathbf v)_i = \min\big(u,\ \max(0,\ v_i-\tau)\big),\quad
//! \textstyle\sum_i \Pi_{\Delta_u}(\mathbf v)_i = 1
//! $$
//!
//! Return-series statistics, universe selection and the capped-simplex projection.

use super::types::RatioMethod;

/// Bisection steps for the projection shift; the bracket halves each step.
const PROJECTION_STEPS: usize = 200;

pub(crate) fn sample_mean(xs: &[f64]) -> f64 {
  if xs.is_empty() {
    0.0
  } else {
    xs.iter().sum::<f64>() / xs.len() as f64
  }
}

/// Sample standard deviation (`n - 1` denominator), zero below two points.
pub(crate) fn sample_std(xs: &[f64]) -> f64 {
  if xs.len() < 2 {
    return 0.0;
  }

  let mean = sample_mean(xs);
  let mut acc = 0.0;
  for &x in xs {
    let d = x - mean;
    acc += d * d;
  }
  (acc / (xs.len() - 1) as f64).sqrt()
}

/// Root-mean-square of the excess returns below `target`, zero when there are none.
pub(crate) fn downside_deviation(xs: &[f64], target: f64) -> f64 {
  let mut acc = 0.0;
  let mut n = 0usize;
  for &x in xs {
    let d = x - target;
    if d < 0.0 {
      acc += d * d;
      n += 1;
    }
  }

  if n == 0 {
    0.0
  } else {
    (acc / n as f64).sqrt()
  }
}

/// Portfolio return per period from per-asset columns.
pub(crate) fn portfolio_returns(w: &[f64], columns: &[Vec<f64>]) -> Vec<f64> {
  let n_periods = columns.first().map(|c| c.len()).unwrap_or(0);
  (0..n_periods)
    .map(|t| {
      w.iter()
        .zip(columns.iter())
        .map(|(&wi, col)| wi * col[t])
        .sum()
    })
    .collect()
}

/// Mean, risk and risk-adjusted ratio of a return series.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RatioStats {
  pub mean: f64,
  pub risk: f64,
  pub ratio: f64,
}

/// Sharpe or Sortino statistics of `series` against `target`.
///
/// With zero risk the ratio is `+inf` when the excess mean is positive and `0` otherwise.
pub fn ratio_stats(series: &[f64], method: RatioMethod, target: f64) -> RatioStats {
  let mean = sample_mean(series);
  let excess = mean - target;
  let risk = match method {
    RatioMethod::Sharpe => sample_std(series),
    RatioMethod::Sortino => downside_deviation(series, target),
  };

  let ratio = if risk > 1e-15 {
    excess / risk
  } else if excess > 0.0 {
    f64::INFINITY
  } else {
    0.0
  };

  RatioStats { mean, risk, ratio }
}

/// Euclidean projection of `v` onto `{w : sum(w) = 1, 0 <= w_i <= cap}`.
///
/// The caller guarantees `v.len() * cap >= 1`.
pub fn project_capped_simplex(v: &[f64], cap: f64) -> Vec<f64> {
  if v.is_empty() {
    return Vec::new();
  }

  let clipped_sum = |tau: f64| -> f64 { v.iter().map(|&x| (x - tau).clamp(0.0, cap)).sum() };

  // clipped_sum(lo) = n * cap >= 1 and clipped_sum(hi) = 0
  let mut lo = v.iter().cloned().fold(f64::INFINITY, f64::min) - cap;
  let mut hi = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

  for _ in 0..PROJECTION_STEPS {
    let mid = 0.5 * (lo + hi);
    if clipped_sum(mid) > 1.0 {
      lo = mid;
    } else {
      hi = mid;
    }
    if hi - lo <= f64::EPSILON * hi.abs().max(1.0) {
      break;
    }
  }

  let tau = 0.5 * (lo + hi);
  v.iter().map(|&x| (x - tau).clamp(0.0, cap)).collect()
}

/// Equal weights capped at `cap` and renormalized.
pub fn seed_weights(n: usize, cap: f64) -> Vec<f64> {
  if n == 0 {
    return Vec::new();
  }
  let w = (1.0 / n as f64).min(cap);
  let total = w * n as f64;
  vec![w / total; n]
}

/// Indices of assets with at least `threshold` non-missing share across `rows`.
///
/// The boundary is inclusive. With no rows nothing is eligible.
pub fn eligible_assets(rows: &[Vec<Option<f64>>], n_assets: usize, threshold: f64) -> Vec<usize> {
  if rows.is_empty() {
    return Vec::new();
  }

  let required = threshold * rows.len() as f64;
  (0..n_assets)
    .filter(|&i| {
      let present = rows
        .iter()
        .filter(|r| r.get(i).copied().flatten().is_some())
        .count();
      present as f64 >= required - 1e-9
    })
    .collect()
}

/// Per-asset columns over rows where every selected asset has a value.
pub fn complete_columns(rows: &[Vec<Option<f64>>], assets: &[usize]) -> Vec<Vec<f64>> {
  let mut columns = vec![Vec::new(); assets.len()];
  for row in rows {
    let values: Option<Vec<f64>> = assets
      .iter()
      .map(|&i| row.get(i).copied().flatten())
      .collect();
    if let Some(values) = values {
      for (col, v) in columns.iter_mut().zip(values) {
        col.push(v);
      }
    }
  }
  columns
}
