//! # Report
//!
//! CSV outputs, terminal tables and the markdown summary.
//!
//! CSV files always carry raw asset identifiers; aliases only change what is displayed.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use prettytable::row;
use prettytable::Table;
use serde::Serialize;
use tracing::info;

use crate::quant::portfolio::AllocationReport;
use crate::quant::portfolio::BacktestReport;
use crate::quant::portfolio::PartitionOutcome;
use crate::quant::regime::ClassifiedPeriod;
use crate::quant::regime::RegimeDistribution;

/// Display names for asset identifiers. Unknown identifiers pass through.
#[derive(Clone, Debug, Default)]
pub struct AssetAliases {
  names: BTreeMap<String, String>,
}

impl AssetAliases {
  pub fn new(names: BTreeMap<String, String>) -> Self {
    Self { names }
  }

  pub fn display<'a>(&'a self, asset: &'a str) -> &'a str {
    self.names.get(asset).map(String::as_str).unwrap_or(asset)
  }
}

#[derive(Serialize)]
struct AllocationRecord<'a> {
  period_window: &'a str,
  method: &'a str,
  regime: &'a str,
  asset_id: &'a str,
  weight: f64,
  expected_return: f64,
  risk_ratio: f64,
  observation_count: usize,
}

#[derive(Serialize)]
struct RegimeRecord {
  date: String,
  growth_rate: Option<f64>,
  inflation_rate: Option<f64>,
  growth_trend: Option<f64>,
  inflation_trend: Option<f64>,
  regime: &'static str,
}

fn ratio_text(ratio: f64) -> String {
  if ratio.is_infinite() {
    "inf".to_string()
  } else {
    format!("{ratio:.3}")
  }
}

/// One CSV row per reported asset of every allocated partition.
pub fn write_allocations<W: Write>(writer: W, outcomes: &[PartitionOutcome]) -> Result<()> {
  let mut wtr = csv::Writer::from_writer(writer);
  for allocation in outcomes.iter().filter_map(PartitionOutcome::allocation) {
    for (asset, weight) in allocation.sorted_weights() {
      wtr.serialize(AllocationRecord {
        period_window: &allocation.period_window,
        method: allocation.method.as_str(),
        regime: allocation.regime.name(),
        asset_id: asset,
        weight,
        expected_return: allocation.expected_return,
        risk_ratio: allocation.risk_ratio,
        observation_count: allocation.observation_count,
      })?;
    }
  }
  wtr.flush()?;
  Ok(())
}

pub fn write_allocations_csv<P: AsRef<Path>>(path: P, outcomes: &[PartitionOutcome]) -> Result<()> {
  let path = path.as_ref();
  let file = File::create(path).with_context(|| format!("failed to create {path:?}"))?;
  write_allocations(file, outcomes).with_context(|| format!("failed to write allocations to {path:?}"))?;
  info!(path = %path.display(), "wrote allocations");
  Ok(())
}

pub fn write_regimes<W: Write>(writer: W, periods: &[ClassifiedPeriod]) -> Result<()> {
  let mut wtr = csv::Writer::from_writer(writer);
  for p in periods {
    wtr.serialize(RegimeRecord {
      date: p.observation.date.format("%Y-%m-%d").to_string(),
      growth_rate: p.observation.growth_rate,
      inflation_rate: p.observation.inflation_rate,
      growth_trend: p.growth_trend,
      inflation_trend: p.inflation_trend,
      regime: p.regime.name(),
    })?;
  }
  wtr.flush()?;
  Ok(())
}

pub fn write_regimes_csv<P: AsRef<Path>>(path: P, periods: &[ClassifiedPeriod]) -> Result<()> {
  let path = path.as_ref();
  let file = File::create(path).with_context(|| format!("failed to create {path:?}"))?;
  write_regimes(file, periods).with_context(|| format!("failed to write regimes to {path:?}"))?;
  info!(path = %path.display(), rows = periods.len(), "wrote classified regimes");
  Ok(())
}

/// Every partition, allocated or skipped, with weights in descending order.
pub fn outcome_table(outcomes: &[PartitionOutcome], aliases: &AssetAliases) -> Table {
  let mut table = Table::new();
  table.set_titles(row![
    "Window", "Method", "Regime", "Asset", "Weight", "Exp. return", "Ratio", "Obs."
  ]);

  for outcome in outcomes {
    match outcome {
      PartitionOutcome::Allocated(a) => {
        for (i, (asset, weight)) in a.sorted_weights().into_iter().enumerate() {
          if i == 0 {
            table.add_row(row![
              a.period_window,
              a.method,
              a.regime.short_name(),
              aliases.display(asset),
              format!("{:.1}%", weight * 100.0),
              format!("{:.3}%", a.expected_return),
              ratio_text(a.risk_ratio),
              a.observation_count
            ]);
          } else {
            table.add_row(row![
              "",
              "",
              "",
              aliases.display(asset),
              format!("{:.1}%", weight * 100.0),
              "",
              "",
              ""
            ]);
          }
        }
      }
      PartitionOutcome::Skipped {
        period_window,
        method,
        regime,
        reason,
      } => {
        table.add_row(row![
          period_window,
          method,
          regime.short_name(),
          format!("skipped: {reason}"),
          "",
          "",
          "",
          ""
        ]);
      }
    }
  }

  table
}

pub fn distribution_table(distribution: &RegimeDistribution) -> Table {
  let mut table = Table::new();
  table.set_titles(row!["Regime", "Periods", "Share"]);
  for &(label, count) in &distribution.counts {
    table.add_row(row![label, count, format!("{:.1}%", distribution.share(label))]);
  }
  table.add_row(row!["Total", distribution.total, ""]);
  table
}

pub fn backtest_table(report: &BacktestReport) -> Table {
  let s = &report.summary;
  let mut table = Table::new();
  table.set_titles(row!["Metric", "Value"]);
  table.add_row(row!["Rebalances", report.rebalances.len()]);
  table.add_row(row!["Periods", report.period_returns.len()]);
  table.add_row(row!["Total return", format!("{:.2}%", s.total_return)]);
  table.add_row(row!["Annualized return", format!("{:.2}%", s.annualized_return)]);
  table.add_row(row!["Annualized volatility", format!("{:.2}%", s.annualized_volatility)]);
  table.add_row(row![
    format!("Annualized {}", report.method),
    ratio_text(s.annualized_ratio)
  ]);
  table.add_row(row!["Maximum drawdown", format!("{:.2}%", s.max_drawdown)]);
  table
}

/// Markdown summary of a run.
pub fn render_markdown(report: &AllocationReport, aliases: &AssetAliases) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "# Regime-Based Optimal Allocations\n");

  if let (Some(first), Some(last)) = (report.first_date, report.last_date) {
    let _ = writeln!(
      out,
      "Merged sample: {} observations from {} to {}.\n",
      report.merged_rows,
      first.format("%Y-%m"),
      last.format("%Y-%m")
    );
  }

  let _ = writeln!(out, "## Regime distribution\n");
  let _ = writeln!(out, "| Regime | Periods | Share |");
  let _ = writeln!(out, "|---|---:|---:|");
  for &(label, count) in &report.distribution.counts {
    let _ = writeln!(
      out,
      "| {} | {} | {:.1}% |",
      label,
      count,
      report.distribution.share(label)
    );
  }

  let _ = writeln!(out, "\n## Allocations");
  for outcome in &report.outcomes {
    let _ = writeln!(
      out,
      "\n### {} / {} / {}\n",
      outcome.period_window(),
      outcome.method(),
      outcome.regime()
    );
    match outcome {
      PartitionOutcome::Allocated(a) => {
        let _ = writeln!(
          out,
          "{} observations, expected return {:.3}%, {} ratio {}.\n",
          a.observation_count,
          a.expected_return,
          a.method,
          ratio_text(a.risk_ratio)
        );
        let _ = writeln!(out, "| Asset | Weight |");
        let _ = writeln!(out, "|---|---:|");
        for (asset, weight) in a.sorted_weights() {
          let _ = writeln!(out, "| {} | {:.1}% |", aliases.display(asset), weight * 100.0);
        }
      }
      PartitionOutcome::Skipped { reason, .. } => {
        let _ = writeln!(out, "No allocation: {reason}.");
      }
    }
  }

  out
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::*;
  use crate::quant::portfolio::AllocationResult;
  use crate::quant::portfolio::RatioMethod;
  use crate::quant::portfolio::SkipReason;
  use crate::quant::regime::classify;
  use crate::quant::regime::MacroObservation;
  use crate::quant::regime::RegimeLabel;

  fn outcomes() -> Vec<PartitionOutcome> {
    vec![
      PartitionOutcome::Allocated(AllocationResult {
        period_window: "Full Sample".into(),
        method: RatioMethod::Sortino,
        regime: RegimeLabel::RisingGrowthFallingInflation,
        weights: [("IE00B4L5Y983".to_string(), 0.25), ("LU0274208692".to_string(), 0.75)]
          .into_iter()
          .collect(),
        expected_return: 0.8,
        risk: 1.2,
        risk_ratio: 0.667,
        observation_count: 42,
      }),
      PartitionOutcome::Skipped {
        period_window: "Full Sample".into(),
        method: RatioMethod::Sortino,
        regime: RegimeLabel::SlowingGrowthRisingInflation,
        reason: SkipReason::InsufficientObservations {
          found: 3,
          required: 5,
        },
      },
    ]
  }

  fn aliases() -> AssetAliases {
    AssetAliases::new(
      [("IE00B4L5Y983".to_string(), "MSCI World".to_string())]
        .into_iter()
        .collect(),
    )
  }

  #[test]
  fn aliases_fall_back_to_raw_id() {
    let aliases = aliases();
    assert_eq!(aliases.display("IE00B4L5Y983"), "MSCI World");
    assert_eq!(aliases.display("UNKNOWN"), "UNKNOWN");
  }

  #[test]
  fn allocation_csv_has_one_row_per_asset() {
    let mut buf = Vec::new();
    write_allocations(&mut buf, &outcomes()).unwrap();
    let text = String::from_utf8(buf).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(
      lines[0],
      "period_window,method,regime,asset_id,weight,expected_return,risk_ratio,observation_count"
    );
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("Full Sample,sortino,\"Rising Growth, Falling Inflation\",LU0274208692,0.75"));
    assert!(!text.contains("MSCI World"));
  }

  #[test]
  fn regime_csv_leaves_missing_trends_empty() {
    let start = NaiveDate::from_ymd_opt(2020, 1, 31).unwrap();
    let series: Vec<MacroObservation> = (0..5)
      .map(|i| MacroObservation::new(start + chrono::Days::new(31 * i), Some(i as f64), Some(1.0)))
      .collect();
    let mut buf = Vec::new();
    write_regimes(&mut buf, &classify(&series, 2)).unwrap();
    let text = String::from_utf8(buf).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(
      lines[0],
      "date,growth_rate,inflation_rate,growth_trend,inflation_trend,regime"
    );
    assert_eq!(lines[1], "2020-01-31,0.0,1.0,,,Insufficient Data");
    assert_eq!(lines.len(), 6);
  }

  #[test]
  fn outcome_table_shows_aliases_and_skips() {
    let rendered = outcome_table(&outcomes(), &aliases()).to_string();
    assert!(rendered.contains("MSCI World"));
    assert!(rendered.contains("75.0%"));
    assert!(rendered.contains("only 3 complete observations (5 required)"));
  }

  #[test]
  fn markdown_lists_every_partition() {
    let start = NaiveDate::from_ymd_opt(2020, 1, 31).unwrap();
    let report = AllocationReport {
      classified: Vec::new(),
      distribution: RegimeDistribution::from_periods(&[]),
      merged_rows: 42,
      first_date: Some(start),
      last_date: Some(start),
      outcomes: outcomes(),
    };
    let md = render_markdown(&report, &aliases());

    assert!(md.contains("## Regime distribution"));
    assert!(md.contains("| MSCI World | 25.0% |"));
    assert!(md.contains("No allocation: only 3 complete observations (5 required)."));
    assert!(md.contains("Slowing Growth, Rising Inflation"));
  }
}
