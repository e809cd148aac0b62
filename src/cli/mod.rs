pub mod args;

use clap::Parser;
pub use args::{Arguments, Commands, CsTag};

pub fn parse() -> Arguments {
    Arguments::parse()
}
