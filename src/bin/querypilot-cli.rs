//! querypilot CLI - headless interface to the query assistant
//!
//! # Usage
//!
//! ```bash
//! # List the sheets of a workbook
//! ./target/debug/querypilot-cli sheets reports/q1.xlsx
//!
//! # Show the context the model would receive
//! ./target/debug/querypilot-cli context -s sales.csv -p "total sales by region"
//!
//! # Generate (but do not run) a query, JSON output for scripting
//! ./target/debug/querypilot-cli generate -s sales.csv -p "total sales by region" --json | jq .
//!
//! # Enable assisted mode and allow three repair attempts
//! ./target/debug/querypilot-cli config set-mode ai
//! ./target/debug/querypilot-cli config set-retry 3
//! ```

use anyhow::Result;
use clap::Parser;

use querypilot_lib::cli::{initialize, run, Args};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let ctx = initialize(&args).await?;

    run(&ctx).await
}
