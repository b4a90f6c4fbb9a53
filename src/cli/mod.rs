//! Command-line interface.
//!
//! Subcommands run one engine pass (`index`, `purge`), the interval
//! scheduler (`schedule`), or chunk a local file for inspection (`chunk`).

pub mod commands;
pub mod parser;

pub use commands::execute;
pub use parser::{Cli, Commands, SourceKind};
