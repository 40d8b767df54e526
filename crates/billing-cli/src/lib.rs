//! Operator CLI for the course billing ledger.
//!
//! Wraps the billing core in a handful of subcommands: migrations, fixtures,
//! deposits, payments, transaction listings, monthly statements and
//! rent-ending notices. Output is JSON on stdout; logs go to stderr.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod seed;
pub mod store;

pub use cli::{Cli, Command};
pub use commands::execute;
pub use config::{Config, LogFormat};
pub use error::{CliError, Outcome, outcome};
pub use store::OperatorStore;
