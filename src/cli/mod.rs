//! CLI module for headless use of the query assistant.
//!
//! The CLI has no query engine attached, so it covers the parts that work
//! offline or against the model only: sheet listing, prompt context
//! inspection, query generation and settings management.
//!
//! ```text
//! querypilot-cli sheets book.xlsx
//! querypilot-cli context -s sales.csv -t orders=mysql://u:p@h/shop -p "total sales by region"
//! querypilot-cli generate -s sales.csv -p "total sales by region"
//! querypilot-cli context --saved -s extra.parquet --save -p "join on id"
//! querypilot-cli config set-mode ai
//! ```

mod args;
mod bootstrap;
mod runner;

pub use args::{Args, Command, ConfigCommand, SourceArgs, TableArg};
pub use bootstrap::{initialize, CliContext};
pub use runner::run;
