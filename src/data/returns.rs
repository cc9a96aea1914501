//! # Asset Return Matrix
//!
//! $$
//! R \in (\mathbb R \cup \{\varnothing\})^{T\times N}
//! $$
//!
//! Date-indexed period returns (percent) with a fixed, ordered asset universe.

use anyhow::bail;
use anyhow::Result;
use chrono::NaiveDate;

use crate::quant::regime::Month;

/// One dated row of returns, aligned with [`ReturnMatrix::assets`].
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnRow {
  pub date: NaiveDate,
  pub values: Vec<Option<f64>>,
}

impl ReturnRow {
  pub fn period(&self) -> Month {
    Month::from_date(self.date)
  }

  /// Whether every asset has a return in this row.
  pub fn is_complete(&self) -> bool {
    self.values.iter().all(|v| v.is_some())
  }
}

/// Asset returns keyed by date. Columns are fixed once built.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReturnMatrix {
  assets: Vec<String>,
  rows: Vec<ReturnRow>,
}

impl ReturnMatrix {
  /// Build a matrix, sorting rows by date.
  ///
  /// Fails on duplicate asset identifiers or rows whose width does not match the universe.
  pub fn new(assets: Vec<String>, mut rows: Vec<ReturnRow>) -> Result<Self> {
    for (i, a) in assets.iter().enumerate() {
      if assets[..i].contains(a) {
        bail!("duplicate asset column '{a}'");
      }
    }
    if let Some(row) = rows.iter().find(|r| r.values.len() != assets.len()) {
      bail!(
        "row {} has {} values but the universe has {} assets",
        row.date,
        row.values.len(),
        assets.len()
      );
    }

    for row in &mut rows {
      for v in &mut row.values {
        *v = v.filter(|x| x.is_finite());
      }
    }
    rows.sort_by_key(|r| r.date);

    Ok(Self { assets, rows })
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn rows(&self) -> &[ReturnRow] {
    &self.rows
  }

  pub fn len(&self) -> usize {
    self.rows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  pub fn asset_index(&self, asset: &str) -> Option<usize> {
    self.assets.iter().position(|a| a == asset)
  }

  /// Share of rows with a return for `asset`, in `[0, 1]`.
  pub fn coverage(&self, asset: &str) -> Option<f64> {
    let idx = self.asset_index(asset)?;
    if self.rows.is_empty() {
      return Some(0.0);
    }
    let present = self.rows.iter().filter(|r| r.values[idx].is_some()).count();
    Some(present as f64 / self.rows.len() as f64)
  }

  /// Rows with a return for every asset.
  pub fn complete_rows(&self) -> impl Iterator<Item = &ReturnRow> {
    self.rows.iter().filter(|r| r.is_complete())
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
  }

  #[test]
  fn rows_are_sorted_and_non_finite_values_dropped() {
    let matrix = ReturnMatrix::new(
      vec!["A".into(), "B".into()],
      vec![
        ReturnRow {
          date: date(2020, 2, 29),
          values: vec![Some(1.0), Some(f64::NAN)],
        },
        ReturnRow {
          date: date(2020, 1, 31),
          values: vec![Some(0.5), Some(0.2)],
        },
      ],
    )
    .unwrap();

    assert_eq!(matrix.rows()[0].date, date(2020, 1, 31));
    assert_eq!(matrix.rows()[1].values[1], None);
    assert_eq!(matrix.complete_rows().count(), 1);
    assert_abs_diff_eq!(matrix.coverage("B").unwrap(), 0.5);
    assert_eq!(matrix.coverage("C"), None);
  }

  #[test]
  fn width_mismatch_is_rejected() {
    let err = ReturnMatrix::new(
      vec!["A".into()],
      vec![ReturnRow {
        date: date(2020, 1, 31),
        values: vec![Some(1.0), Some(2.0)],
      }],
    );
    assert!(err.is_err());
  }

  #[test]
  fn duplicate_assets_are_rejected() {
    assert!(ReturnMatrix::new(vec!["A".into(), "A".into()], vec![]).is_err());
  }
}
