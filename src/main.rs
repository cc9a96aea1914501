//! # Classify a macro series
//! regime-alloc classify --macro data/macro.csv
//!
//! # Optimize allocations per regime
//! regime-alloc optimize --config config.toml
//!
//! # Rolling-window backtest
//! regime-alloc backtest --config config.toml --returns data/returns.csv

use std::path::Path;
use std::path::PathBuf;

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use regime_alloc::config::AppConfig;
use regime_alloc::data::load_macro_csv;
use regime_alloc::data::load_returns_csv;
use regime_alloc::quant::portfolio::run_rolling_backtest;
use regime_alloc::quant::portfolio::AllocationEngine;
use regime_alloc::quant::regime::recent_history;
use regime_alloc::quant::regime::RegimeClassifier;
use regime_alloc::quant::regime::RegimeDistribution;
use regime_alloc::report;
use regime_alloc::report::AssetAliases;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "regime-alloc")]
#[command(about = "Macro regime classification and regime-conditioned portfolio optimization")]
#[command(version)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Classify a macro series into growth/inflation regimes
  Classify {
    /// Macro series CSV
    #[arg(long = "macro")]
    macro_path: PathBuf,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output CSV for the classified series
    #[arg(short, long)]
    output: Option<PathBuf>,
  },

  /// Optimize allocations for every regime and sub-period window
  Optimize {
    /// Configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Macro series CSV, overrides the configuration
    #[arg(long = "macro")]
    macro_path: Option<PathBuf>,

    /// Return table CSV, overrides the configuration
    #[arg(long)]
    returns: Option<PathBuf>,

    /// Output CSV for allocations
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Markdown summary file
    #[arg(long)]
    markdown: Option<PathBuf>,
  },

  /// Rolling-window rebalancing backtest
  Backtest {
    /// Configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Return table CSV
    #[arg(long)]
    returns: PathBuf,
  },
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
  match path {
    Some(path) => AppConfig::from_path(path),
    None => Ok(AppConfig::default()),
  }
}

fn classify(macro_path: PathBuf, config: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
  let config = load_config(config.as_deref())?;
  let series = load_macro_csv(&macro_path, &config.inputs.macro_columns)?;
  let classified = RegimeClassifier::new(config.classifier.clone()).classify(&series);

  println!("{}", report::distribution_table(&RegimeDistribution::from_periods(&classified)));
  println!("Recent regimes:");
  for p in recent_history(&classified, 12) {
    println!("  {}  {}", p.period(), p.regime);
  }

  let output = output.unwrap_or(config.outputs.regimes);
  report::write_regimes_csv(&output, &classified)
}

fn optimize(
  config: PathBuf,
  macro_path: Option<PathBuf>,
  returns: Option<PathBuf>,
  output: Option<PathBuf>,
  markdown: Option<PathBuf>,
) -> Result<()> {
  let config = AppConfig::from_path(&config)?;
  let macro_path = macro_path
    .or_else(|| config.inputs.macro_path.clone())
    .ok_or_else(|| anyhow!("no macro series given (--macro or inputs.macro)"))?;
  let returns_path = returns
    .or_else(|| config.inputs.returns_path.clone())
    .ok_or_else(|| anyhow!("no return table given (--returns or inputs.returns)"))?;

  let series = load_macro_csv(&macro_path, &config.inputs.macro_columns)?;
  let returns = load_returns_csv(&returns_path)?;
  let result = AllocationEngine::new(config.engine_config()).run(&series, &returns)?;

  let aliases = AssetAliases::new(config.aliases.clone());
  println!("{}", report::distribution_table(&result.distribution));
  println!("{}", report::outcome_table(&result.outcomes, &aliases));
  println!(
    "{} partitions allocated, {} skipped",
    result.allocated(),
    result.skipped()
  );

  report::write_regimes_csv(&config.outputs.regimes, &result.classified)?;
  let output = output.unwrap_or(config.outputs.allocations);
  report::write_allocations_csv(&output, &result.outcomes)?;
  if let Some(path) = markdown.or(config.outputs.markdown) {
    std::fs::write(&path, report::render_markdown(&result, &aliases))
      .with_context(|| format!("failed to write {path:?}"))?;
  }

  Ok(())
}

fn backtest(config: PathBuf, returns: PathBuf) -> Result<()> {
  let config = AppConfig::from_path(&config)?;
  let returns = load_returns_csv(&returns)?;
  let result = run_rolling_backtest(&returns, &config.optimizer, &config.rolling)?;

  println!("{}", report::backtest_table(&result));
  let aliases = AssetAliases::new(config.aliases);
  for rebalance in &result.rebalances {
    let top = rebalance
      .weights
      .iter()
      .max_by(|a, b| a.1.total_cmp(b.1))
      .map(|(a, w)| format!("{} ({:.1}%)", aliases.display(a), w * 100.0))
      .unwrap_or_else(|| "cash".to_string());
    println!("  {}  top: {top}", rebalance.date);
  }

  Ok(())
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_target(false)
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  match cli.command {
    Commands::Classify {
      macro_path,
      config,
      output,
    } => classify(macro_path, config, output),
    Commands::Optimize {
      config,
      macro_path,
      returns,
      output,
      markdown,
    } => optimize(config, macro_path, returns, output, markdown),
    Commands::Backtest { config, returns } => backtest(config, returns),
  }
}
