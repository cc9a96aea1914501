//! # Regime Types
//!
//! $$
//! \text{regime}_t = f\big(\operatorname{sgn}\Delta_L \bar g_t,\ \operatorname{sgn}\Delta_L \bar\pi_t\big)
//! $$
//!
//! Macro observations, calendar months and the regime enumeration.

use std::fmt::Display;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::Datelike;
use chrono::NaiveDate;

/// Calendar month used as the join key between macro and return data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
  year: i32,
  month: u32,
}

impl Month {
  /// Build a month, `None` when `month` is outside `1..=12`.
  pub fn new(year: i32, month: u32) -> Option<Self> {
    (1..=12).contains(&month).then_some(Self { year, month })
  }

  /// Month containing `date`.
  pub fn from_date(date: NaiveDate) -> Self {
    Self {
      year: date.year(),
      month: date.month(),
    }
  }

  pub fn year(&self) -> i32 {
    self.year
  }

  pub fn month(&self) -> u32 {
    self.month
  }
}

impl Display for Month {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:04}-{:02}", self.year, self.month)
  }
}

/// One row of the macro series.
///
/// Values are annualized percentages. A missing or non-finite value is `None`.
#[derive(Clone, Debug, PartialEq)]
pub struct MacroObservation {
  /// Observation date as delivered by the source table.
  pub date: NaiveDate,
  /// Real growth rate (e.g. GDP QoQ annualized).
  pub growth_rate: Option<f64>,
  /// Inflation rate (e.g. PCE prices).
  pub inflation_rate: Option<f64>,
}

impl MacroObservation {
  pub fn new(date: NaiveDate, growth_rate: Option<f64>, inflation_rate: Option<f64>) -> Self {
    Self {
      date,
      growth_rate: growth_rate.filter(|v| v.is_finite()),
      inflation_rate: inflation_rate.filter(|v| v.is_finite()),
    }
  }

  /// Month this observation is attached to.
  pub fn period(&self) -> Month {
    Month::from_date(self.date)
  }
}

/// Macroeconomic regime derived from the joint direction of growth and inflation trends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegimeLabel {
  /// Growth trend `>= 0`, inflation trend `< 0`.
  RisingGrowthFallingInflation,
  /// Growth trend `>= 0`, inflation trend `>= 0`.
  RisingGrowthRisingInflation,
  /// Growth trend `< 0`, inflation trend `>= 0`.
  SlowingGrowthRisingInflation,
  /// Growth trend `< 0`, inflation trend `< 0`.
  SlowingGrowthFallingInflation,
  /// At least one trend is undefined.
  InsufficientData,
}

/// The four classifiable regimes in canonical order.
pub const ALL_REGIMES: [RegimeLabel; 4] = [
  RegimeLabel::RisingGrowthFallingInflation,
  RegimeLabel::RisingGrowthRisingInflation,
  RegimeLabel::SlowingGrowthRisingInflation,
  RegimeLabel::SlowingGrowthFallingInflation,
];

impl RegimeLabel {
  /// Map a trend pair to a regime. Zero trends belong to the rising branch.
  pub fn from_trends(growth_trend: Option<f64>, inflation_trend: Option<f64>) -> Self {
    let (Some(g), Some(i)) = (growth_trend, inflation_trend) else {
      return Self::InsufficientData;
    };
    if !g.is_finite() || !i.is_finite() {
      return Self::InsufficientData;
    }

    match (g >= 0.0, i >= 0.0) {
      (true, false) => Self::RisingGrowthFallingInflation,
      (true, true) => Self::RisingGrowthRisingInflation,
      (false, true) => Self::SlowingGrowthRisingInflation,
      (false, false) => Self::SlowingGrowthFallingInflation,
    }
  }

  /// Whether the label is one of the four real regimes.
  pub fn is_classified(&self) -> bool {
    !matches!(self, Self::InsufficientData)
  }

  pub fn name(&self) -> &'static str {
    match self {
      Self::RisingGrowthFallingInflation => "Rising Growth, Falling Inflation",
      Self::RisingGrowthRisingInflation => "Rising Growth, Rising Inflation",
      Self::SlowingGrowthRisingInflation => "Slowing Growth, Rising Inflation",
      Self::SlowingGrowthFallingInflation => "Slowing Growth, Falling Inflation",
      Self::InsufficientData => "Insufficient Data",
    }
  }

  pub fn short_name(&self) -> &'static str {
    match self {
      Self::RisingGrowthFallingInflation => "Rise/Fall",
      Self::RisingGrowthRisingInflation => "Rise/Rise",
      Self::SlowingGrowthRisingInflation => "Slow/Rise",
      Self::SlowingGrowthFallingInflation => "Slow/Fall",
      Self::InsufficientData => "n/a",
    }
  }
}

impl Display for RegimeLabel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.name())
  }
}

impl FromStr for RegimeLabel {
  type Err = anyhow::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let needle = s.trim();
    ALL_REGIMES
      .iter()
      .chain(std::iter::once(&RegimeLabel::InsufficientData))
      .find(|r| r.name().eq_ignore_ascii_case(needle) || r.short_name().eq_ignore_ascii_case(needle))
      .copied()
      .ok_or_else(|| anyhow!("unknown regime label '{needle}'"))
  }
}
