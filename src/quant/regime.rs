//! # Regime
//!
//! $$
//! (\Delta_L \bar g_t,\ \Delta_L \bar\pi_t) \mapsto \{\text{RG/FI},\ \text{RG/RI},\ \text{SG/RI},\ \text{SG/FI}\}
//! $$
//!
//! Macroeconomic regime classification from growth and inflation trends.

pub mod classifier;
pub mod types;

pub use classifier::classify;
pub use classifier::recent_history;
pub use classifier::ClassifiedPeriod;
pub use classifier::RegimeClassifier;
pub use classifier::RegimeClassifierConfig;
pub use classifier::RegimeDistribution;
pub use types::MacroObservation;
pub use types::Month;
pub use types::RegimeLabel;
pub use types::ALL_REGIMES;
