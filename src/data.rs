//! # Data
//!
//! Input tables: the macro series and the asset return matrix.

pub mod loader;
pub mod returns;

pub use loader::load_macro_csv;
pub use loader::load_returns_csv;
pub use loader::parse_date;
pub use loader::parse_percent;
pub use loader::read_macro_csv;
pub use loader::read_returns_csv;
pub use loader::MacroColumns;
pub use returns::ReturnMatrix;
pub use returns::ReturnRow;
