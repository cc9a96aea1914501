pub mod portfolio;
pub mod regime;
