//! CLI bootstrap - environment, logging and settings for a CLI run.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::settings::SettingsManager;
use crate::sources::SourceStore;

use super::args::Args;

/// Services shared by every CLI command.
pub struct CliContext {
    /// Settings manager
    pub settings_manager: Arc<SettingsManager>,

    /// Persisted source list (`~/.querypilot/sources.json`)
    pub source_store: Arc<SourceStore>,

    /// Command-line arguments
    pub args: Args,
}

/// Load `.env`, install logging and read settings.
pub async fn initialize(args: &Args) -> Result<CliContext> {
    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        // Only warn on errors other than file not found
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("[cli] Failed to load .env file: {}", e);
        }
    }

    // Initialize logging based on verbosity
    let log_level = if args.verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match format!("querypilot_lib={}", log_level).parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let settings_manager = Arc::new(
        SettingsManager::new()
            .await
            .context("Failed to initialize settings manager")?,
    );

    // Ensure settings file exists (creates template on first run)
    if let Err(e) = settings_manager.ensure_settings_file().await {
        tracing::warn!("Failed to create settings template: {}", e);
    }

    if args.verbose {
        eprintln!(
            "[cli] Settings loaded from {}",
            settings_manager.path().display()
        );
    }

    Ok(CliContext {
        settings_manager,
        source_store: Arc::new(SourceStore::new()),
        args: args.clone(),
    })
}
