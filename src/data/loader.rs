//! # Loaders
//!
//! CSV readers for the macro series and the asset return table.
//!
//! Cells are coerced leniently: a trailing `%` and surrounding whitespace are stripped and
//! anything that still fails to parse becomes a missing value. Rows whose date cannot be
//! parsed are dropped with a warning.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use chrono::NaiveDate;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use super::returns::ReturnMatrix;
use super::returns::ReturnRow;
use crate::quant::regime::MacroObservation;

/// Date layouts accepted by [`parse_date`], tried in order.
const DATE_FORMATS: [&str; 4] = ["%d-%m-%Y", "%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"];

/// Column names of the macro table.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroColumns {
  pub date: String,
  pub growth: String,
  pub inflation: String,
}

impl Default for MacroColumns {
  fn default() -> Self {
    Self {
      date: "Date".to_string(),
      growth: "US_GDP_QoQ_Ann".to_string(),
      inflation: "PCE_Prices".to_string(),
    }
  }
}

/// Parse a numeric cell such as `"1.25%"`, `" -0.4 "` or `"3"`.
pub fn parse_percent(raw: &str) -> Option<f64> {
  let trimmed = raw.trim();
  let trimmed = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
  if trimmed.is_empty() {
    return None;
  }
  trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a date in day-month-year, ISO or year-month form. Year-month maps to the first day.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
  let trimmed = raw.trim();
  let trimmed = trimmed.split_whitespace().next().unwrap_or(trimmed);

  DATE_FORMATS
    .iter()
    .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
    .or_else(|| NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d").ok())
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
  csv::ReaderBuilder::new()
    .trim(csv::Trim::All)
    .flexible(true)
    .from_reader(reader)
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize> {
  headers
    .iter()
    .position(|h| h.eq_ignore_ascii_case(name))
    .ok_or_else(|| anyhow!("column '{name}' not found in header {headers:?}"))
}

/// Read the macro series from any CSV source.
pub fn read_macro_csv<R: Read>(reader: R, columns: &MacroColumns) -> Result<Vec<MacroObservation>> {
  let mut rdr = csv_reader(reader);
  let headers = rdr.headers().context("failed to read macro header")?.clone();
  let date_idx = column_index(&headers, &columns.date)?;
  let growth_idx = column_index(&headers, &columns.growth)?;
  let inflation_idx = column_index(&headers, &columns.inflation)?;

  let mut out = Vec::new();
  for (line, record) in rdr.records().enumerate() {
    let record = record.with_context(|| format!("malformed macro record {}", line + 1))?;
    if record.iter().all(|f| f.is_empty()) {
      continue;
    }

    let raw_date = record.get(date_idx).unwrap_or_default();
    let Some(date) = parse_date(raw_date) else {
      warn!(line = line + 1, value = raw_date, "dropping macro row with unparseable date");
      continue;
    };

    out.push(MacroObservation::new(
      date,
      record.get(growth_idx).and_then(parse_percent),
      record.get(inflation_idx).and_then(parse_percent),
    ));
  }

  out.sort_by_key(|o| o.date);
  Ok(out)
}

/// Load the macro series from a CSV file.
pub fn load_macro_csv<P: AsRef<Path>>(path: P, columns: &MacroColumns) -> Result<Vec<MacroObservation>> {
  let path = path.as_ref();
  let file = File::open(path).with_context(|| format!("failed to open macro series {path:?}"))?;
  let series =
    read_macro_csv(file, columns).with_context(|| format!("failed to read macro series {path:?}"))?;
  info!(path = %path.display(), rows = series.len(), "loaded macro series");
  Ok(series)
}

/// Read an asset return table from any CSV source.
///
/// The date column is the one named `date`/`dates` (any case), else the first column.
/// Every other column is an asset.
pub fn read_returns_csv<R: Read>(reader: R) -> Result<ReturnMatrix> {
  let mut rdr = csv_reader(reader);
  let headers = rdr.headers().context("failed to read return header")?.clone();
  if headers.is_empty() {
    return Err(anyhow!("return table has no columns"));
  }

  let date_idx = headers
    .iter()
    .position(|h| h.eq_ignore_ascii_case("date") || h.eq_ignore_ascii_case("dates"))
    .unwrap_or(0);
  let asset_cols: Vec<(usize, String)> = headers
    .iter()
    .enumerate()
    .filter(|(i, h)| *i != date_idx && !h.is_empty())
    .map(|(i, h)| (i, h.to_string()))
    .collect();

  let mut rows = Vec::new();
  for (line, record) in rdr.records().enumerate() {
    let record = record.with_context(|| format!("malformed return record {}", line + 1))?;
    if record.iter().all(|f| f.is_empty()) {
      continue;
    }

    let raw_date = record.get(date_idx).unwrap_or_default();
    let Some(date) = parse_date(raw_date) else {
      warn!(line = line + 1, value = raw_date, "dropping return row with unparseable date");
      continue;
    };

    let values = asset_cols
      .iter()
      .map(|(i, _)| record.get(*i).and_then(parse_percent))
      .collect();
    rows.push(ReturnRow { date, values });
  }

  ReturnMatrix::new(asset_cols.into_iter().map(|(_, name)| name).collect(), rows)
}

/// Load an asset return table from a CSV file.
pub fn load_returns_csv<P: AsRef<Path>>(path: P) -> Result<ReturnMatrix> {
  let path = path.as_ref();
  let file = File::open(path).with_context(|| format!("failed to open return table {path:?}"))?;
  let matrix = read_returns_csv(file).with_context(|| format!("failed to read return table {path:?}"))?;
  info!(
    path = %path.display(),
    rows = matrix.len(),
    assets = matrix.assets().len(),
    "loaded return table"
  );
  Ok(matrix)
}
