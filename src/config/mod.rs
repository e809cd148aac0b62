pub mod defs;
pub mod batch;
