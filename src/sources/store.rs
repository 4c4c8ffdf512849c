//! JSON persistence for the source list.
//!
//! The store is wired to the registry as its change listener. Every snapshot
//! is handed to a background writer that keeps only the newest pending one,
//! so bursts of updates during resolution collapse into a single write.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use super::model::{AliasKey, DataSource, SourceStatus};
use super::registry::ChangeListener;

/// Status given to sources that were still resolving when last saved.
pub const INTERRUPTED: &str = "metadata resolution interrupted";

/// Get the path to the persisted source list.
pub fn sources_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".querypilot")
        .join("sources.json")
}

/// File-backed list of data sources.
pub struct SourceStore {
    path: PathBuf,
}

impl SourceStore {
    /// Store at the default location (`~/.querypilot/sources.json`).
    pub fn new() -> Self {
        Self::at(sources_path())
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted sources. A missing or unreadable file yields an empty list.
    pub async fn load(&self) -> Vec<DataSource> {
        if !self.path.exists() {
            tracing::debug!("Source list not found at {:?}, starting empty", self.path);
            return Vec::new();
        }

        let sources = match self.read().await {
            Ok(sources) => sources,
            Err(e) => {
                tracing::warn!("Ignoring source list at {:?}: {:#}", self.path, e);
                return Vec::new();
            }
        };

        tracing::info!("Loaded {} source(s) from {:?}", sources.len(), self.path);
        sources.into_iter().map(normalize_loaded).collect()
    }

    async fn read(&self) -> Result<Vec<DataSource>> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .context("Failed to read source list")?;
        serde_json::from_str(&contents).context("Failed to deserialize source list")
    }

    /// Persist a snapshot atomically (temp file, then rename).
    pub async fn save(&self, sources: &[DataSource]) -> Result<()> {
        let json = serde_json::to_string_pretty(sources).context("Failed to serialize sources")?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &json).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        tracing::debug!("Saved {} source(s) to {:?}", sources.len(), self.path);
        Ok(())
    }

    /// Build a registry listener that persists every snapshot in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn listener(self: Arc<Self>) -> ChangeListener {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<DataSource>>();

        tokio::spawn(async move {
            while let Some(mut snapshot) = rx.recv().await {
                while let Ok(newer) = rx.try_recv() {
                    snapshot = newer;
                }
                if let Err(e) = self.save(&snapshot).await {
                    tracing::warn!("Failed to persist sources: {:#}", e);
                }
            }
        });

        Arc::new(move |snapshot: &[DataSource]| {
            let _ = tx.send(snapshot.to_vec());
        })
    }
}

impl Default for SourceStore {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_loaded(mut source: DataSource) -> DataSource {
    if source.status.is_loading() {
        source.status = if source.columns.is_empty() {
            SourceStatus::failed(INTERRUPTED)
        } else {
            SourceStatus::Ready
        };
    }
    if source.alias().trim().is_empty() {
        let alias = source.default_alias_for(&AliasKey::Default);
        source.aliases.set(AliasKey::Default, alias);
    }
    source
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::sources::model::{SourceDescriptor, SourcePatch};
    use crate::sources::registry::SourceRegistry;

    fn csv(path: &str) -> DataSource {
        DataSource::from_descriptor(SourceDescriptor::File {
            path: path.to_string(),
        })
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SourceStore::at(dir.path().join("sources.json"));
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(SourceStore::at(&path).load().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_normalizes_loading() {
        let dir = tempfile::tempdir().unwrap();
        let store = SourceStore::at(dir.path().join("nested").join("sources.json"));

        let pending = csv("/data/pending.csv");
        let mut known = csv("/data/known.csv");
        known.columns = vec!["a".to_string()];
        let mut broken = csv("/data/broken.csv");
        broken.status = SourceStatus::failed("bad header");

        store
            .save(&[pending.clone(), known.clone(), broken.clone()])
            .await
            .unwrap();
        let loaded = store.load().await;

        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].id, pending.id);
        assert_eq!(loaded[0].status, SourceStatus::failed(INTERRUPTED));
        assert_eq!(loaded[1].status, SourceStatus::Ready);
        assert_eq!(loaded[2].status, SourceStatus::failed("bad header"));
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_blank_alias_recomputed_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SourceStore::at(dir.path().join("sources.json"));

        let mut source = csv("/data/sales.csv");
        source.aliases.set(AliasKey::Default, "  ".to_string());
        store.save(&[source]).await.unwrap();

        assert_eq!(store.load().await[0].alias(), "sales.csv");
    }

    #[tokio::test]
    async fn test_listener_persists_latest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SourceStore::at(dir.path().join("sources.json")));
        let registry = SourceRegistry::new();
        registry.set_change_listener(store.clone().listener());

        let id = registry.add_file("/data/a.csv");
        registry.update(
            id,
            SourcePatch::status(SourceStatus::Ready).with_columns(vec!["x".to_string()]),
        );

        let mut loaded = Vec::new();
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            loaded = store.load().await;
            if loaded.first().is_some_and(|s| s.status == SourceStatus::Ready) {
                break;
            }
        }
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].columns, vec!["x".to_string()]);
    }
}
