//! CLI command runner.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::assistant::{normalize_query, OpenAiCompatibleGenerator};
use crate::collaborators::{
    GenerationRequest, QueryExecutor, QueryGenerator, QueryResult, SubResourceLister,
};
use crate::prompt::{build_prompt_context, data_preview, source_descriptor};
use crate::settings::AssistantSettings;
use crate::sources::{DataSource, MetadataResolver, SourceRegistry, WorkbookSheetLister};

use super::args::{Command, ConfigCommand, SourceArgs};
use super::bootstrap::CliContext;

/// Executor used when no query engine is attached. Previews fail, so
/// sources keep their discovered sheets but no columns.
struct DetachedEngine;

#[async_trait]
impl QueryExecutor for DetachedEngine {
    async fn execute(
        &self,
        _query: &str,
        _offset: usize,
        _limit: usize,
        _cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        bail!("no query engine attached")
    }
}

/// Run the command selected on the command line.
pub async fn run(ctx: &CliContext) -> Result<()> {
    match &ctx.args.command {
        Command::Sheets { file } => list_sheets(ctx, file).await,
        Command::Context(sources) => print_context(ctx, sources).await,
        Command::Generate {
            sources,
            previous,
            api_key,
        } => generate(ctx, sources, previous.as_deref(), api_key.as_deref()).await,
        Command::Config { action } => configure(ctx, action).await,
    }
}

async fn list_sheets(ctx: &CliContext, file: &Path) -> Result<()> {
    let sheets = WorkbookSheetLister::new()
        .list(&file.to_string_lossy())
        .await?;

    if ctx.args.json {
        println!("{}", serde_json::to_string(&sheets)?);
    } else {
        for sheet in sheets {
            println!("{}", sheet);
        }
    }
    Ok(())
}

/// Register the requested sources and discover what can be discovered offline.
///
/// Saved sources keep their stored metadata; only sources named on the
/// command line are resolved.
async fn load_sources(ctx: &CliContext, args: &SourceArgs) -> Vec<DataSource> {
    let saved = if args.saved {
        ctx.source_store.load().await
    } else {
        Vec::new()
    };
    let registry = Arc::new(SourceRegistry::with_sources(saved));
    let mut ids = Vec::new();
    for file in &args.files {
        ids.push(registry.add_file(file.to_string_lossy()));
    }
    for table in &args.tables {
        ids.push(registry.add_table(&table.table, &table.connection, None));
    }

    let resolver = MetadataResolver::new(
        registry.clone(),
        Arc::new(DetachedEngine),
        Arc::new(WorkbookSheetLister::new()),
    );
    resolver.resolve_many(&ids).await;

    if let Some(sheet) = &args.sheet {
        for source in registry.snapshot() {
            if source.sheet_options.contains(sheet) {
                resolver.select_sheet(source.id, sheet).await;
            } else if !source.sheet_options.is_empty() {
                eprintln!("[cli] Sheet '{}' not found in {}", sheet, source.locator);
            }
        }
    }

    let sources = registry.snapshot();
    if args.save {
        if let Err(e) = ctx.source_store.save(&sources).await {
            tracing::warn!("Failed to persist sources: {:#}", e);
        }
    }
    if ctx.args.verbose {
        for source in &sources {
            eprintln!(
                "[cli] {} ({}): {:?}",
                source.alias(),
                source.locator,
                source.status
            );
        }
    }
    sources
}

async fn print_context(ctx: &CliContext, args: &SourceArgs) -> Result<()> {
    let sources = load_sources(ctx, args).await;
    let context = build_prompt_context(&args.prompt, &sources);

    if ctx.args.json {
        let json = serde_json::json!({
            "context": context,
            "source": source_descriptor(&sources),
            "sources": sources,
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        println!("{}", context);
    }
    Ok(())
}

async fn generate(
    ctx: &CliContext,
    args: &SourceArgs,
    previous: Option<&str>,
    api_key: Option<&str>,
) -> Result<()> {
    let mut config = ctx.settings_manager.model_config().await;
    if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
        config.credential = key.to_string();
    }
    if ctx.args.verbose {
        eprintln!("[cli] Model: {:?}", config);
    }

    let sources = load_sources(ctx, args).await;
    let request = GenerationRequest {
        prompt: build_prompt_context(&args.prompt, &sources),
        source: source_descriptor(&sources),
        previous_query: previous.map(String::from),
        data_preview: data_preview(None, &sources),
    };

    // Ctrl-C aborts the pending request
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let generated = OpenAiCompatibleGenerator::new()
        .generate(&request, &config, &cancel)
        .await;
    interrupt.abort();

    let mut generated = generated.context("Query generation failed")?;
    generated.query_text = normalize_query(&generated.query_text);

    if ctx.args.json {
        println!("{}", serde_json::to_string_pretty(&generated)?);
    } else {
        println!("{}", generated.query_text);
        if let Some(rationale) = &generated.rationale {
            eprintln!("\n{}", rationale);
        }
    }
    Ok(())
}

async fn configure(ctx: &CliContext, action: &ConfigCommand) -> Result<()> {
    let manager = &ctx.settings_manager;
    match action {
        ConfigCommand::Show => {
            let settings = redacted(manager.get().await);
            if ctx.args.json {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            } else {
                println!("# {}", manager.path().display());
                print!("{}", toml::to_string_pretty(&settings)?);
            }
        }
        ConfigCommand::SetMode { mode } => {
            manager.set_mode(*mode).await?;
            println!("mode = {}", mode);
        }
        ConfigCommand::SetRetry { limit } => {
            let stored = manager.set_retry_limit(*limit).await?;
            if stored != *limit {
                eprintln!("[cli] Retry limit clamped to {}", stored);
            }
            println!("retry_limit = {}", stored);
        }
    }
    Ok(())
}

fn redacted(mut settings: AssistantSettings) -> AssistantSettings {
    if !settings.model.credential.is_empty() {
        settings.model.credential = "<redacted>".to_string();
    }
    settings
}
