//! Command-line interface for java-migrator.
//!
//! A single command: migrate the repository given as the positional argument.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
