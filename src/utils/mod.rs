pub mod command;
pub mod dataset;
pub mod fast5;
pub mod fastx;
pub mod file;
pub mod plotting;
pub mod stats;
pub mod streams;
pub mod summary;
pub mod system;
