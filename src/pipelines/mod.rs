pub mod align;
pub mod compress;
pub mod config;
pub mod plot;
pub mod tidy;
