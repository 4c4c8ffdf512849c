//! Schema discovery for registered sources.
//!
//! The resolver figures out which sheets a source has (for readers that need
//! one selected) and runs a tiny preview query to learn column names. It
//! keeps no state between calls; every result is written back through the
//! [`SourceRegistry`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::model::{
    read_expression, SourceId, SourcePatch, SourceStatus, UNSUPPORTED_TYPE,
};
use super::registry::SourceRegistry;
use crate::collaborators::{QueryExecutor, SubResourceLister};
use crate::error::error_message;

/// Rows fetched by the preview query. Only the header matters.
pub const PREVIEW_ROWS: usize = 3;

/// Status message when a workbook has no sheets.
pub const NO_SUB_RESOURCES: &str = "no sub-resources found";

/// Status message when the preview returned no columns.
pub const NO_COLUMNS: &str = "could not parse columns";

/// Options for a single resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Requested sheet. `None` keeps the source's current selection,
    /// `Some(None)` explicitly clears it.
    pub sheet: Option<Option<String>>,
    /// Re-list sheets even if some are already known.
    pub force_sheet_rediscovery: bool,
}

impl ResolveOptions {
    pub fn with_sheet(sheet: impl Into<String>) -> Self {
        Self {
            sheet: Some(Some(sheet.into())),
            force_sheet_rediscovery: false,
        }
    }

    pub fn rediscover() -> Self {
        Self {
            sheet: None,
            force_sheet_rediscovery: true,
        }
    }
}

/// Resolves readable structure and columns of registered sources.
pub struct MetadataResolver {
    registry: Arc<SourceRegistry>,
    executor: Arc<dyn QueryExecutor>,
    lister: Arc<dyn SubResourceLister>,
}

impl MetadataResolver {
    pub fn new(
        registry: Arc<SourceRegistry>,
        executor: Arc<dyn QueryExecutor>,
        lister: Arc<dyn SubResourceLister>,
    ) -> Self {
        Self {
            registry,
            executor,
            lister,
        }
    }

    /// Resolve one source. Failures end up in the source's status, never here.
    pub async fn resolve(&self, id: SourceId, options: ResolveOptions) {
        let Some(source) = self.registry.get(id) else {
            tracing::debug!("Skipping resolution of unknown source {}", id);
            return;
        };

        let Some(reader) = source.reader_kind else {
            self.registry
                .update(id, SourcePatch::status(SourceStatus::failed(UNSUPPORTED_TYPE)));
            return;
        };

        let Some(ticket) = self.registry.begin_resolution(id) else {
            return;
        };
        self.registry
            .update_resolution(&ticket, SourcePatch::status(SourceStatus::Loading));

        let mut sheet_name = match options.sheet {
            Some(requested) => requested,
            None => source.sheet_name.clone(),
        };
        let mut sheet_options = source.sheet_options.clone();

        if reader.supports_sub_resources()
            && (options.force_sheet_rediscovery || sheet_options.is_empty())
        {
            match self.lister.list(&source.locator).await {
                Ok(sheets) if sheets.is_empty() => {
                    tracing::warn!("No sheets found in {}", source.locator);
                    self.registry.update_resolution(
                        &ticket,
                        SourcePatch::status(SourceStatus::failed(NO_SUB_RESOURCES))
                            .with_sheet_options(Vec::new())
                            .with_sheet_name(None),
                    );
                    return;
                }
                Ok(sheets) => {
                    let keep_current = sheet_name
                        .as_ref()
                        .is_some_and(|current| sheets.contains(current));
                    if !keep_current {
                        sheet_name = sheets.first().cloned();
                    }

                    // Re-read aliases so a rename made while listing is not lost.
                    let mut aliases = self
                        .registry
                        .get(id)
                        .map(|current| current.aliases)
                        .unwrap_or(source.aliases.clone());
                    aliases.seed_sheets(&sheets);
                    self.registry
                        .update_resolution(&ticket, SourcePatch::default().with_aliases(aliases));
                    sheet_options = sheets;
                }
                Err(e) => {
                    let message = error_message(&e);
                    tracing::warn!("Failed to list sheets of {}: {}", source.locator, message);
                    self.registry
                        .update_resolution(&ticket, SourcePatch::status(SourceStatus::failed(message)));
                    return;
                }
            }
        }

        let sheet = if reader.supports_sub_resources() {
            sheet_name.as_deref()
        } else {
            None
        };
        let preview = format!(
            "SELECT * FROM {} LIMIT {}",
            read_expression(reader, &source.locator, sheet, source.relational_connection()),
            PREVIEW_ROWS
        );
        tracing::debug!("Previewing source {}: {}", id, preview);

        let patch = SourcePatch::default()
            .with_sheet_options(sheet_options)
            .with_sheet_name(sheet_name);
        let patch = match self
            .executor
            .execute(&preview, 0, PREVIEW_ROWS, &CancellationToken::new())
            .await
        {
            Ok(result) if result.columns.is_empty() => SourcePatch {
                status: Some(SourceStatus::failed(NO_COLUMNS)),
                ..patch.with_columns(Vec::new())
            },
            Ok(result) => {
                tracing::debug!(
                    "Resolved {} column(s) for source {}",
                    result.columns.len(),
                    id
                );
                SourcePatch {
                    status: Some(SourceStatus::Ready),
                    ..patch.with_columns(result.columns)
                }
            }
            Err(e) => {
                let message = error_message(&e);
                tracing::warn!("Preview of {} failed: {}", source.locator, message);
                SourcePatch {
                    status: Some(SourceStatus::failed(message)),
                    ..patch.with_columns(Vec::new())
                }
            }
        };
        self.registry.update_resolution(&ticket, patch);
    }

    /// Resolve several sources concurrently, forcing sheet discovery for
    /// readers that have sheets. Used after a bulk import.
    pub async fn resolve_many(&self, ids: &[SourceId]) {
        let resolutions = ids.iter().map(|id| {
            let force = self
                .registry
                .get(*id)
                .and_then(|source| source.reader_kind)
                .is_some_and(|reader| reader.supports_sub_resources());
            self.resolve(
                *id,
                ResolveOptions {
                    sheet: None,
                    force_sheet_rediscovery: force,
                },
            )
        });
        futures::future::join_all(resolutions).await;
    }

    /// Switch the selected sheet and re-resolve columns for it.
    pub async fn select_sheet(&self, id: SourceId, sheet: &str) {
        self.registry.update(
            id,
            SourcePatch::default().with_sheet_name(Some(sheet.to_string())),
        );
        self.resolve(id, ResolveOptions::with_sheet(sheet)).await;
    }
}
