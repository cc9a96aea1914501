//! # Configuration
//!
//! TOML run configuration. Every section is optional and falls back to its defaults.
//!
//! ```toml
//! methods = ["sharpe", "sortino"]
//! parallel = true
//!
//! [inputs]
//! macro = "data/macro.csv"
//! returns = "data/returns.csv"
//!
//! [optimizer]
//! max_weight = 0.25
//! universe = "dynamic"
//!
//! [[windows]]
//! label = "2008-2014"
//! start = "2008-01-01"
//! end = "2015-01-01"
//! exclude = ["NEW_FUND"]
//!
//! [aliases]
//! "IE00B4L5Y983" = "MSCI World"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::data::MacroColumns;
use crate::quant::portfolio::AllocationEngineConfig;
use crate::quant::portfolio::OptimizerConfig;
use crate::quant::portfolio::RatioMethod;
use crate::quant::portfolio::RollingConfig;
use crate::quant::portfolio::SubPeriod;
use crate::quant::regime::RegimeClassifierConfig;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
  #[serde(rename = "macro")]
  pub macro_path: Option<PathBuf>,
  #[serde(rename = "returns")]
  pub returns_path: Option<PathBuf>,
  pub macro_columns: MacroColumns,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
  pub allocations: PathBuf,
  pub regimes: PathBuf,
  pub markdown: Option<PathBuf>,
}

impl Default for OutputConfig {
  fn default() -> Self {
    Self {
      allocations: PathBuf::from("optimal_allocations.csv"),
      regimes: PathBuf::from("economic_regimes_classified.csv"),
      markdown: None,
    }
  }
}

/// Top-level run configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  pub inputs: InputConfig,
  pub classifier: RegimeClassifierConfig,
  pub optimizer: OptimizerConfig,
  pub methods: Vec<RatioMethod>,
  pub windows: Vec<SubPeriod>,
  pub parallel: bool,
  pub rolling: RollingConfig,
  /// Display names for raw asset identifiers.
  pub aliases: BTreeMap<String, String>,
  pub outputs: OutputConfig,
}

impl Default for AppConfig {
  fn default() -> Self {
    let engine = AllocationEngineConfig::default();
    Self {
      inputs: InputConfig::default(),
      classifier: engine.classifier,
      optimizer: engine.optimizer,
      methods: engine.methods,
      windows: engine.windows,
      parallel: engine.parallel,
      rolling: RollingConfig::default(),
      aliases: BTreeMap::new(),
      outputs: OutputConfig::default(),
    }
  }
}

impl AppConfig {
  pub fn from_toml_str(s: &str) -> Result<Self> {
    let config: Self = toml::from_str(s).context("invalid configuration")?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read config {path:?}"))?;
    Self::from_toml_str(&raw).with_context(|| format!("failed to load config {path:?}"))
  }

  pub fn validate(&self) -> Result<()> {
    self.engine_config().validate()?;
    self.rolling.validate()
  }

  pub fn engine_config(&self) -> AllocationEngineConfig {
    AllocationEngineConfig {
      classifier: self.classifier.clone(),
      optimizer: self.optimizer.clone(),
      methods: self.methods.clone(),
      windows: self.windows.clone(),
      parallel: self.parallel,
    }
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use chrono::NaiveDate;

  use super::*;
  use crate::quant::portfolio::UniverseMode;

  #[test]
  fn empty_document_uses_defaults() {
    let config = AppConfig::from_toml_str("").unwrap();
    assert_eq!(config.classifier.lookback, 3);
    assert_eq!(config.optimizer.max_weight, 0.25);
    assert_eq!(config.methods, vec![RatioMethod::Sharpe]);
    assert_eq!(config.windows, vec![SubPeriod::full_sample()]);
    assert_eq!(config.outputs.allocations, PathBuf::from("optimal_allocations.csv"));
    assert_eq!(config.rolling.window, 24);
  }

  #[test]
  fn full_document_is_parsed() {
    let raw = r#"
      methods = ["sharpe", "sortino"]
      parallel = true

      [inputs]
      macro = "macro.csv"
      returns = "returns.csv"

      [inputs.macro_columns]
      growth = "GDP"

      [optimizer]
      max_weight = 0.3
      universe = "dynamic"

      [[windows]]
      label = "2008-2014"
      start = "2008-01-01"
      end = "2015-01-01"
      exclude = ["NEW"]

      [[windows]]
      label = "2015 onward"
      start = "2015-01-01"

      [aliases]
      "IE00B4L5Y983" = "MSCI World"
    "#;
    let config = AppConfig::from_toml_str(raw).unwrap();

    assert_eq!(config.methods, vec![RatioMethod::Sharpe, RatioMethod::Sortino]);
    assert!(config.parallel);
    assert_eq!(config.inputs.macro_path, Some(PathBuf::from("macro.csv")));
    assert_eq!(config.inputs.macro_columns.growth, "GDP");
    assert_eq!(config.inputs.macro_columns.inflation, "PCE_Prices");
    assert_eq!(config.optimizer.universe, UniverseMode::Dynamic);
    assert_eq!(config.optimizer.min_observations, 5);
    assert_eq!(config.windows.len(), 2);
    assert_eq!(config.windows[0].end, NaiveDate::from_ymd_opt(2015, 1, 1));
    assert_eq!(config.windows[0].excluded_assets, vec!["NEW".to_string()]);
    assert_eq!(config.windows[1].end, None);
    assert_eq!(config.aliases["IE00B4L5Y983"], "MSCI World");

    let engine = config.engine_config();
    assert_eq!(engine.windows, config.windows);
  }

  #[test]
  fn invalid_values_are_rejected() {
    assert!(AppConfig::from_toml_str("[optimizer]\nmax_weight = 1.5\n").is_err());
    assert!(AppConfig::from_toml_str("methods = []\n").is_err());
    assert!(AppConfig::from_toml_str("methods = [\"cvar\"]\n").is_err());
    assert!(AppConfig::from_toml_str(
      "[[windows]]\nlabel = \"x\"\nstart = \"2010-01-01\"\nend = \"2009-01-01\"\n"
    )
    .is_err());
  }

  #[test]
  fn shipped_default_config_is_valid() {
    let config = AppConfig::from_toml_str(include_str!("../config/default.toml")).unwrap();
    assert_eq!(config.windows, vec![SubPeriod::full_sample()]);
    assert_eq!(config.rolling.method, RatioMethod::Sortino);
    assert!(config.aliases.is_empty());
  }

  #[test]
  fn loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[classifier]\nlookback = 6").unwrap();
    let config = AppConfig::from_path(file.path()).unwrap();
    assert_eq!(config.classifier.lookback, 6);
    assert!(AppConfig::from_path("/no/such/config.toml").is_err());
  }
}
