//! Command-line interface for tablemerge.

mod commands;

pub use commands::{is_verbose, run};
