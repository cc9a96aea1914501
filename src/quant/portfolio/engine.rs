//! # Allocation Engine
//!
//! $$
//! \mathcal O = \big\{\operatorname{optimize}(P_{s,k},\,m)\ :\ s\in\text{windows},\ m\in\text{methods},\ k\in\text{regimes}\big\}
//! $$
//!
//! Batch pipeline: classify the macro series, join it to the return table by calendar
//! month, split the joined panel by sub-period window and regime, and optimize every cell.

use std::collections::BTreeMap;

use anyhow::bail;
use anyhow::Result;
use chrono::NaiveDate;
use impl_new_derive::ImplNew;
use rayon::prelude::*;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use super::optimizers::optimize;
use super::types::OptimizerConfig;
use super::types::PartitionOutcome;
use super::types::RatioMethod;
use super::types::RegimePartition;
use super::types::UniverseMode;
use crate::data::ReturnMatrix;
use crate::quant::regime::ClassifiedPeriod;
use crate::quant::regime::MacroObservation;
use crate::quant::regime::Month;
use crate::quant::regime::RegimeClassifier;
use crate::quant::regime::RegimeClassifierConfig;
use crate::quant::regime::RegimeDistribution;
use crate::quant::regime::RegimeLabel;
use crate::quant::regime::ALL_REGIMES;

/// A labeled date range with optional per-window asset exclusions.
///
/// `start` is inclusive, `end` exclusive; a missing bound is open.
#[derive(Clone, Debug, PartialEq, ImplNew, Serialize, Deserialize)]
pub struct SubPeriod {
  pub label: String,
  #[serde(default)]
  pub start: Option<NaiveDate>,
  #[serde(default)]
  pub end: Option<NaiveDate>,
  #[serde(default, rename = "exclude")]
  pub excluded_assets: Vec<String>,
}

impl SubPeriod {
  pub fn full_sample() -> Self {
    Self::new("Full Sample".to_string(), None, None, Vec::new())
  }

  pub fn contains(&self, date: NaiveDate) -> bool {
    self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date < e)
  }
}

/// A return row tagged with the regime of its month.
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledRow {
  pub date: NaiveDate,
  pub regime: RegimeLabel,
  pub values: Vec<Option<f64>>,
}

/// Return rows joined with regime labels.
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledPanel {
  pub assets: Vec<String>,
  pub rows: Vec<LabeledRow>,
}

impl LabeledPanel {
  /// Rows of `regime` inside `window`, without the window's excluded assets.
  pub fn partition(&self, window: &SubPeriod, regime: RegimeLabel) -> RegimePartition {
    let keep: Vec<usize> = (0..self.assets.len())
      .filter(|&i| !window.excluded_assets.contains(&self.assets[i]))
      .collect();

    let rows = self
      .rows
      .iter()
      .filter(|r| r.regime == regime && window.contains(r.date))
      .map(|r| keep.iter().map(|&i| r.values[i]).collect())
      .collect();

    RegimePartition::new(
      window.label.clone(),
      regime,
      keep.iter().map(|&i| self.assets[i].clone()).collect(),
      rows,
    )
  }

  pub fn first_date(&self) -> Option<NaiveDate> {
    self.rows.first().map(|r| r.date)
  }

  pub fn last_date(&self) -> Option<NaiveDate> {
    self.rows.last().map(|r| r.date)
  }
}

/// Inner join of return rows with regime labels on calendar month.
///
/// When several classified periods share a month the latest one wins. Fails when no month
/// overlaps.
pub fn join_regimes(returns: &ReturnMatrix, classified: &[ClassifiedPeriod]) -> Result<LabeledPanel> {
  let mut labels: BTreeMap<Month, (NaiveDate, RegimeLabel)> = BTreeMap::new();
  for period in classified {
    let date = period.observation.date;
    let entry = labels.entry(period.period()).or_insert((date, period.regime));
    if date >= entry.0 {
      *entry = (date, period.regime);
    }
  }

  let rows: Vec<LabeledRow> = returns
    .rows()
    .iter()
    .filter_map(|row| {
      labels.get(&row.period()).map(|&(_, regime)| LabeledRow {
        date: row.date,
        regime,
        values: row.values.clone(),
      })
    })
    .collect();

  if rows.is_empty() {
    bail!(
      "return table ({} rows) and macro series ({} periods) share no calendar month",
      returns.len(),
      classified.len()
    );
  }

  Ok(LabeledPanel {
    assets: returns.assets().to_vec(),
    rows,
  })
}

/// Configuration of an [`AllocationEngine`] run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationEngineConfig {
  pub classifier: RegimeClassifierConfig,
  pub optimizer: OptimizerConfig,
  /// Ratios to maximize; every partition is solved once per method.
  pub methods: Vec<RatioMethod>,
  pub windows: Vec<SubPeriod>,
  /// Solve partitions on the rayon pool.
  pub parallel: bool,
}

impl Default for AllocationEngineConfig {
  fn default() -> Self {
    Self {
      classifier: RegimeClassifierConfig::default(),
      optimizer: OptimizerConfig::default(),
      methods: vec![RatioMethod::Sharpe],
      windows: vec![SubPeriod::full_sample()],
      parallel: false,
    }
  }
}

impl AllocationEngineConfig {
  pub fn validate(&self) -> Result<()> {
    if self.classifier.lookback == 0 {
      bail!("classifier lookback must be at least 1");
    }
    if self.methods.is_empty() {
      bail!("at least one ratio method is required");
    }
    if self.windows.is_empty() {
      bail!("at least one sub-period window is required");
    }
    for w in &self.windows {
      if let (Some(s), Some(e)) = (w.start, w.end) {
        if s >= e {
          bail!("window '{}' starts on {s} but ends on {e}", w.label);
        }
      }
    }
    self.optimizer.validate()
  }
}

/// Everything a run produced.
#[derive(Clone, Debug)]
pub struct AllocationReport {
  pub classified: Vec<ClassifiedPeriod>,
  pub distribution: RegimeDistribution,
  /// Return rows that matched a classified month.
  pub merged_rows: usize,
  pub first_date: Option<NaiveDate>,
  pub last_date: Option<NaiveDate>,
  /// One entry per `(window, method, regime)`, in that nesting order.
  pub outcomes: Vec<PartitionOutcome>,
}

impl AllocationReport {
  pub fn allocated(&self) -> usize {
    self.outcomes.iter().filter(|o| o.allocation().is_some()).count()
  }

  pub fn skipped(&self) -> usize {
    self.outcomes.len() - self.allocated()
  }
}

/// Regime-conditioned allocation engine.
#[derive(Clone, Debug, Default)]
pub struct AllocationEngine {
  config: AllocationEngineConfig,
}

impl AllocationEngine {
  pub fn new(config: AllocationEngineConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &AllocationEngineConfig {
    &self.config
  }

  /// Classify, join and optimize every partition.
  pub fn run(&self, macro_series: &[MacroObservation], returns: &ReturnMatrix) -> Result<AllocationReport> {
    self.config.validate()?;

    let classified = RegimeClassifier::new(self.config.classifier.clone()).classify(macro_series);
    let distribution = RegimeDistribution::from_periods(&classified);
    let panel = join_regimes(returns, &classified)?;

    info!(
      merged_rows = panel.rows.len(),
      first = ?panel.first_date(),
      last = ?panel.last_date(),
      "joined returns with regimes"
    );

    for window in &self.config.windows {
      for asset in &window.excluded_assets {
        if returns.asset_index(asset).is_none() {
          warn!(window = %window.label, %asset, "excluded asset is not in the return table");
        }
      }
    }

    if self.config.optimizer.universe == UniverseMode::Dynamic {
      for asset in returns.assets() {
        let coverage = returns.coverage(asset).unwrap_or(0.0);
        if coverage < self.config.optimizer.sufficiency_threshold {
          warn!(
            %asset,
            coverage,
            threshold = self.config.optimizer.sufficiency_threshold,
            "asset is sparse across the return table and may be left out of dynamic partitions"
          );
        }
      }
    }

    let mut jobs = Vec::new();
    for window in &self.config.windows {
      for &method in &self.config.methods {
        for regime in ALL_REGIMES {
          jobs.push((window, method, regime));
        }
      }
    }

    let solve = |&(window, method, regime): &(&SubPeriod, RatioMethod, RegimeLabel)| {
      let partition = panel.partition(window, regime);
      match optimize(&partition, method, &self.config.optimizer) {
        Ok(result) => PartitionOutcome::Allocated(result),
        Err(reason) => PartitionOutcome::Skipped {
          period_window: window.label.clone(),
          method,
          regime,
          reason,
        },
      }
    };

    let outcomes: Vec<PartitionOutcome> = if self.config.parallel {
      jobs.par_iter().map(solve).collect()
    } else {
      jobs.iter().map(solve).collect()
    };

    for outcome in &outcomes {
      match outcome {
        PartitionOutcome::Allocated(a) => info!(
          window = %a.period_window,
          method = %a.method,
          regime = %a.regime,
          assets = a.weights.len(),
          ratio = a.risk_ratio,
          "allocated"
        ),
        PartitionOutcome::Skipped {
          period_window,
          method,
          regime,
          reason,
        } => info!(
          window = %period_window,
          %method,
          %regime,
          %reason,
          "skipped"
        ),
      }
    }

    Ok(AllocationReport {
      merged_rows: panel.rows.len(),
      first_date: panel.first_date(),
      last_date: panel.last_date(),
      classified,
      distribution,
      outcomes,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::Months;
  use tracing_test::traced_test;

  use super::*;
  use crate::data::ReturnRow;
  use crate::quant::portfolio::types::SkipReason;

  fn month_end(i: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2010, 1, 1)
      .unwrap()
      .checked_add_months(Months::new(i + 1))
      .unwrap()
      .pred_opt()
      .unwrap()
  }

  /// Macro series whose trends flip between two regimes in blocks of six months.
  fn macro_series(n: u32) -> Vec<MacroObservation> {
    (0..n)
      .map(|i| {
        let phase = (i / 6) % 2 == 0;
        let g = if phase { i as f64 * 0.5 } else { 10.0 - i as f64 * 0.1 };
        MacroObservation::new(month_end(i), Some(g), Some(2.0 + (i % 4) as f64 * 0.01))
      })
      .collect()
  }

  fn returns(n: u32) -> ReturnMatrix {
    let rows = (0..n)
      .map(|i| {
        let t = i as f64;
        ReturnRow {
          date: month_end(i),
          values: vec![
            Some((t * 0.7).sin() + 0.4),
            Some((t * 1.3).cos() * 0.8 + 0.3),
            Some((t * 0.5).sin() * 1.5 + 0.2),
          ],
        }
      })
      .collect();
    ReturnMatrix::new(vec!["A".into(), "B".into(), "C".into()], rows).unwrap()
  }

  fn config() -> AllocationEngineConfig {
    AllocationEngineConfig {
      optimizer: OptimizerConfig {
        max_weight: 0.5,
        ..Default::default()
      },
      ..Default::default()
    }
  }

  #[test]
  fn run_reports_every_partition() {
    let report = AllocationEngine::new(config()).run(&macro_series(48), &returns(48)).unwrap();

    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.merged_rows, 48);
    assert_eq!(report.distribution.total, 48);
    for (outcome, regime) in report.outcomes.iter().zip(ALL_REGIMES) {
      assert_eq!(outcome.regime(), regime);
      assert_eq!(outcome.period_window(), "Full Sample");
    }
    for outcome in &report.outcomes {
      if let Some(a) = outcome.allocation() {
        assert!((a.total_weight() - 1.0).abs() < 1e-9);
        assert!(a.largest_weight() <= 0.5 + 1e-9);
      }
    }
  }

  #[test]
  fn disjoint_months_are_a_structural_error() {
    let macro_series: Vec<MacroObservation> = (0..12)
      .map(|i| MacroObservation::new(month_end(100 + i), Some(1.0), Some(1.0)))
      .collect();
    let err = AllocationEngine::new(config()).run(&macro_series, &returns(12)).unwrap_err();
    assert!(err.to_string().contains("share no calendar month"));
  }

  #[test]
  fn join_uses_the_last_observation_of_a_month() {
    let mut classified = RegimeClassifier::default().classify(&macro_series(12));
    let mut extra = classified[11].clone();
    extra.observation.date = month_end(11).pred_opt().unwrap();
    extra.regime = RegimeLabel::SlowingGrowthRisingInflation;
    classified.insert(11, extra);

    let panel = join_regimes(&returns(12), &classified).unwrap();
    assert_eq!(panel.rows.len(), 12);
    assert_eq!(panel.rows[11].regime, classified[12].regime);
  }

  #[test]
  fn windows_bound_dates_and_drop_excluded_assets() {
    let classified = RegimeClassifier::default().classify(&macro_series(24));
    let panel = join_regimes(&returns(24), &classified).unwrap();
    let window = SubPeriod::new(
      "2011".to_string(),
      NaiveDate::from_ymd_opt(2011, 1, 1),
      NaiveDate::from_ymd_opt(2012, 1, 1),
      vec!["B".to_string()],
    );

    let total: usize = ALL_REGIMES
      .iter()
      .map(|&r| {
        let p = panel.partition(&window, r);
        assert_eq!(p.assets, vec!["A".to_string(), "C".to_string()]);
        assert!(p.rows.iter().all(|row| row.len() == 2));
        p.rows.len()
      })
      .sum();
    assert_eq!(total, 12);

    assert!(window.contains(NaiveDate::from_ymd_opt(2011, 1, 1).unwrap()));
    assert!(!window.contains(NaiveDate::from_ymd_opt(2012, 1, 1).unwrap()));
  }

  #[test]
  fn outcomes_follow_window_method_regime_order() {
    let cfg = AllocationEngineConfig {
      methods: vec![RatioMethod::Sharpe, RatioMethod::Sortino],
      windows: vec![
        SubPeriod::new("early".into(), None, NaiveDate::from_ymd_opt(2012, 1, 1), vec![]),
        SubPeriod::new("late".into(), NaiveDate::from_ymd_opt(2012, 1, 1), None, vec![]),
      ],
      ..config()
    };
    let report = AllocationEngine::new(cfg).run(&macro_series(48), &returns(48)).unwrap();

    assert_eq!(report.outcomes.len(), 16);
    assert_eq!(report.outcomes[0].period_window(), "early");
    assert_eq!(report.outcomes[4].method(), RatioMethod::Sortino);
    assert_eq!(report.outcomes[8].period_window(), "late");
    assert_eq!(report.allocated() + report.skipped(), 16);
  }

  #[test]
  fn parallel_run_matches_sequential_run() {
    let sequential = AllocationEngine::new(config()).run(&macro_series(48), &returns(48)).unwrap();
    let parallel = AllocationEngine::new(AllocationEngineConfig {
      parallel: true,
      ..config()
    })
    .run(&macro_series(48), &returns(48))
    .unwrap();

    assert_eq!(sequential.outcomes, parallel.outcomes);
  }

  #[test]
  fn regime_without_rows_is_skipped_not_failed() {
    let report = AllocationEngine::new(config()).run(&macro_series(48), &returns(48)).unwrap();
    let empty = report
      .outcomes
      .iter()
      .filter(|o| report.distribution.count(o.regime()) == 0)
      .collect::<Vec<_>>();

    for outcome in empty {
      assert_eq!(
        outcome.skip_reason(),
        Some(&SkipReason::InsufficientObservations {
          found: 0,
          required: 5
        })
      );
    }
  }

  #[test]
  fn invalid_configuration_is_rejected() {
    let cfg = AllocationEngineConfig {
      methods: vec![],
      ..config()
    };
    assert!(AllocationEngine::new(cfg).run(&macro_series(12), &returns(12)).is_err());
  }

  #[test]
  #[traced_test]
  fn sparse_and_unknown_assets_are_reported() {
    let base = returns(24);
    let rows = base
      .rows()
      .iter()
      .enumerate()
      .map(|(t, r)| {
        let mut values = r.values.clone();
        values.push(if t < 4 { Some(0.1) } else { None });
        ReturnRow {
          date: r.date,
          values,
        }
      })
      .collect();
    let matrix = ReturnMatrix::new(
      vec!["A".into(), "B".into(), "C".into(), "NEW".into()],
      rows,
    )
    .unwrap();
    let cfg = AllocationEngineConfig {
      optimizer: OptimizerConfig {
        universe: UniverseMode::Dynamic,
        ..config().optimizer
      },
      windows: vec![SubPeriod::new("all".into(), None, None, vec!["GONE".into()])],
      ..config()
    };

    let report = AllocationEngine::new(cfg).run(&macro_series(24), &matrix).unwrap();
    assert_eq!(report.outcomes.len(), 4);
    assert!(logs_contain("may be left out of dynamic partitions"));
    assert!(logs_contain("excluded asset is not in the return table"));
  }
}
