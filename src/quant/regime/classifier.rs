//! # Regime Classifier
//!
//! $$
//! \bar x_t = \frac{1}{\min(L,t+1)}\sum_{k=\max(0,t-L+1)}^{t} x_k,\qquad
//! \Delta_L \bar x_t = \bar x_t - \bar x_{t-L}
//! $$
//!
//! Growth and inflation are smoothed with a trailing mean whose window shrinks at the
//! start of the series, then differenced over the same lookback. Each period is labeled
//! from its own trend pair only, so a one-period sign change at a window edge flips the
//! label. Historical outputs depend on that, so no hysteresis is applied.

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::types::MacroObservation;
use super::types::Month;
use super::types::RegimeLabel;
use super::types::ALL_REGIMES;

/// Classifier configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeClassifierConfig {
  /// Moving-average window and trend lag, in periods.
  pub lookback: usize,
}

impl Default for RegimeClassifierConfig {
  fn default() -> Self {
    Self { lookback: 3 }
  }
}

/// A macro observation together with its smoothed values, trends and label.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassifiedPeriod {
  pub observation: MacroObservation,
  pub growth_ma: Option<f64>,
  pub inflation_ma: Option<f64>,
  pub growth_trend: Option<f64>,
  pub inflation_trend: Option<f64>,
  pub regime: RegimeLabel,
}

impl ClassifiedPeriod {
  pub fn period(&self) -> Month {
    self.observation.period()
  }
}

/// Trailing mean with `min_periods = 1`.
///
/// A window that contains a missing value has no mean.
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
  let window = window.max(1);
  (0..values.len())
    .map(|t| {
      let start = (t + 1).saturating_sub(window);
      let slice = &values[start..=t];
      let mut acc = 0.0;
      for v in slice {
        acc += (*v)?;
      }
      Some(acc / slice.len() as f64)
    })
    .collect()
}

/// `x[t] - x[t - lag]`, undefined for the first `lag` entries.
pub fn lagged_difference(values: &[Option<f64>], lag: usize) -> Vec<Option<f64>> {
  (0..values.len())
    .map(|t| {
      if t < lag {
        return None;
      }
      Some(values[t]? - values[t - lag]?)
    })
    .collect()
}

/// Classify every period of `series`.
///
/// The output is sorted by date regardless of the input order.
///
/// # Panics
/// Panics if `lookback` is zero.
pub fn classify(series: &[MacroObservation], lookback: usize) -> Vec<ClassifiedPeriod> {
  assert!(lookback > 0, "lookback must be at least one period");

  let mut ordered = series.to_vec();
  ordered.sort_by_key(|o| o.date);

  let growth: Vec<Option<f64>> = ordered.iter().map(|o| o.growth_rate).collect();
  let inflation: Vec<Option<f64>> = ordered.iter().map(|o| o.inflation_rate).collect();

  let growth_ma = rolling_mean(&growth, lookback);
  let inflation_ma = rolling_mean(&inflation, lookback);
  let growth_trend = lagged_difference(&growth_ma, lookback);
  let inflation_trend = lagged_difference(&inflation_ma, lookback);

  let classified: Vec<ClassifiedPeriod> = ordered
    .into_iter()
    .enumerate()
    .map(|(t, observation)| ClassifiedPeriod {
      observation,
      growth_ma: growth_ma[t],
      inflation_ma: inflation_ma[t],
      growth_trend: growth_trend[t],
      inflation_trend: inflation_trend[t],
      regime: RegimeLabel::from_trends(growth_trend[t], inflation_trend[t]),
    })
    .collect();

  debug!(
    periods = classified.len(),
    lookback,
    classified = classified.iter().filter(|p| p.regime.is_classified()).count(),
    "classified macro series"
  );

  classified
}

/// Stateless classifier bound to a configuration.
#[derive(Clone, Debug, Default)]
pub struct RegimeClassifier {
  config: RegimeClassifierConfig,
}

impl RegimeClassifier {
  pub fn new(config: RegimeClassifierConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &RegimeClassifierConfig {
    &self.config
  }

  pub fn classify(&self, series: &[MacroObservation]) -> Vec<ClassifiedPeriod> {
    classify(series, self.config.lookback)
  }
}

/// Count of periods per label.
#[derive(Clone, Debug, PartialEq)]
pub struct RegimeDistribution {
  pub total: usize,
  /// Every label, the four regimes first, including zero counts.
  pub counts: Vec<(RegimeLabel, usize)>,
}

impl RegimeDistribution {
  pub fn from_periods(periods: &[ClassifiedPeriod]) -> Self {
    let counts = ALL_REGIMES
      .iter()
      .chain(std::iter::once(&RegimeLabel::InsufficientData))
      .map(|&label| (label, periods.iter().filter(|p| p.regime == label).count()))
      .collect();

    Self {
      total: periods.len(),
      counts,
    }
  }

  pub fn count(&self, label: RegimeLabel) -> usize {
    self
      .counts
      .iter()
      .find(|(l, _)| *l == label)
      .map(|(_, c)| *c)
      .unwrap_or(0)
  }

  /// Share of `label` in percent of all periods.
  pub fn share(&self, label: RegimeLabel) -> f64 {
    if self.total == 0 {
      0.0
    } else {
      self.count(label) as f64 / self.total as f64 * 100.0
    }
  }
}

/// The last `n` classified periods.
pub fn recent_history(periods: &[ClassifiedPeriod], n: usize) -> &[ClassifiedPeriod] {
  &periods[periods.len().saturating_sub(n)..]
}
