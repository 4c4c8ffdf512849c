//! CLI argument parsing using clap.
//!
//! Defines the command-line interface for querypilot-cli.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::settings::QueryMode;

/// querypilot CLI - turn questions about local data into SQL
#[derive(Parser, Debug, Clone)]
#[command(name = "querypilot-cli")]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Output results as JSON (for scripting/parsing)
    #[arg(long, global = true)]
    pub json: bool,

    /// Show verbose output (debug information)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List the sheets of a spreadsheet
    Sheets {
        /// Path to an xlsx/xls/ods file
        file: PathBuf,
    },

    /// Print the prompt context built from the given sources
    Context(SourceArgs),

    /// Generate a query for the prompt without executing it
    Generate {
        #[command(flatten)]
        sources: SourceArgs,

        /// Query to show the model as a starting point
        #[arg(long)]
        previous: Option<String>,

        /// API key (overrides settings and env vars)
        #[arg(long, env = "QUERYPILOT_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },

    /// Show or change assistant settings
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// Print the current settings (credential redacted)
    Show,

    /// Switch between "ai" and "expert" mode
    SetMode { mode: QueryMode },

    /// Set the number of automatic repair attempts (0 - 5)
    SetRetry { limit: u32 },
}

/// Sources and prompt shared by `context` and `generate`.
#[derive(clap::Args, Debug, Clone)]
pub struct SourceArgs {
    /// Data file to include (repeatable)
    #[arg(short = 's', long = "source")]
    pub files: Vec<PathBuf>,

    /// Relational table as TABLE=CONNECTION (repeatable)
    #[arg(short = 't', long = "table", value_parser = parse_table)]
    pub tables: Vec<TableArg>,

    /// Sheet to select for spreadsheet sources
    #[arg(long)]
    pub sheet: Option<String>,

    /// Start from the saved source list
    #[arg(long)]
    pub saved: bool,

    /// Save the resulting source list
    #[arg(long)]
    pub save: bool,

    /// Natural-language request
    #[arg(short = 'p', long)]
    pub prompt: String,
}

/// A `TABLE=CONNECTION` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableArg {
    pub table: String,
    pub connection: String,
}

fn parse_table(value: &str) -> Result<TableArg, String> {
    let (table, connection) = value
        .split_once('=')
        .ok_or_else(|| format!("expected TABLE=CONNECTION, got '{}'", value))?;
    let (table, connection) = (table.trim(), connection.trim());
    if table.is_empty() || connection.is_empty() {
        return Err(format!("expected TABLE=CONNECTION, got '{}'", value));
    }
    Ok(TableArg {
        table: table.to_string(),
        connection: connection.to_string(),
    })
}
