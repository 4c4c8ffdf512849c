//! In-process registry of imported data sources.
//!
//! The registry exclusively owns every [`DataSource`] record. Callers get
//! cloned snapshots; all mutations are synchronous and go through this type.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::model::{AliasKey, DataSource, SourceDescriptor, SourceId, SourcePatch};

/// Callback invoked with the full, ordered snapshot after every mutation.
pub type ChangeListener = Arc<dyn Fn(&[DataSource]) + Send + Sync>;

/// Proof that a metadata resolution was the latest one started for a source.
///
/// Updates carrying an outdated ticket are dropped, so a slow resolution can
/// never overwrite the result of a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionTicket {
    id: SourceId,
    seq: u64,
}

impl ResolutionTicket {
    pub fn source_id(&self) -> SourceId {
        self.id
    }
}

#[derive(Default)]
struct Inner {
    sources: Vec<DataSource>,
    tickets: HashMap<SourceId, u64>,
    next_seq: u64,
}

/// Ordered collection of data sources with their discovery state.
#[derive(Default)]
pub struct SourceRegistry {
    inner: RwLock<Inner>,
    listener: RwLock<Option<ChangeListener>>,
}

impl SourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with previously persisted sources.
    pub fn with_sources(sources: Vec<DataSource>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                sources,
                ..Default::default()
            }),
            listener: RwLock::new(None),
        }
    }

    /// Install the listener notified after each mutation (used for persistence).
    pub fn set_change_listener(&self, listener: ChangeListener) {
        *self.listener.write() = Some(listener);
    }

    /// Insert a new source and return its id. Never rejects.
    pub fn add(&self, descriptor: SourceDescriptor) -> SourceId {
        let source = DataSource::from_descriptor(descriptor);
        let id = source.id;
        tracing::debug!(
            "Adding source {} ({}) with reader {:?}",
            id,
            source.locator,
            source.reader_kind
        );
        self.mutate(|inner| {
            inner.sources.push(source);
            true
        });
        id
    }

    /// Import a file by path.
    pub fn add_file(&self, path: impl Into<String>) -> SourceId {
        self.add(SourceDescriptor::File { path: path.into() })
    }

    /// Declare a relational table reachable through `connection`.
    pub fn add_table(
        &self,
        table: impl Into<String>,
        connection: impl Into<String>,
        alias: Option<String>,
    ) -> SourceId {
        self.add(SourceDescriptor::RelationalTable {
            table: table.into(),
            connection: connection.into(),
            alias,
        })
    }

    /// Delete a source. No-op if it does not exist.
    pub fn remove(&self, id: SourceId) {
        self.mutate(|inner| {
            inner.tickets.remove(&id);
            let before = inner.sources.len();
            inner.sources.retain(|source| source.id != id);
            inner.sources.len() != before
        });
    }

    /// Remove every source.
    pub fn clear(&self) {
        self.mutate(|inner| {
            inner.tickets.clear();
            let had_sources = !inner.sources.is_empty();
            inner.sources.clear();
            had_sources
        });
    }

    /// Merge `patch` into an existing source. No-op if it does not exist.
    pub fn update(&self, id: SourceId, patch: SourcePatch) {
        self.mutate(|inner| match find_mut(&mut inner.sources, id) {
            Some(source) => {
                source.apply(patch);
                true
            }
            None => false,
        });
    }

    /// Set an alias. Blank input stores the computed default instead.
    ///
    /// Returns the alias actually stored, or `None` if the source is unknown.
    pub fn set_alias(&self, id: SourceId, key: AliasKey, value: &str) -> Option<String> {
        let mut stored = None;
        self.mutate(|inner| {
            let Some(source) = find_mut(&mut inner.sources, id) else {
                return false;
            };
            let trimmed = value.trim();
            let alias = if trimmed.is_empty() {
                source.default_alias_for(&key)
            } else {
                trimmed.to_string()
            };
            source.aliases.set(key, alias.clone());
            stored = Some(alias);
            true
        });
        stored
    }

    /// Snapshot of a single source.
    pub fn get(&self, id: SourceId) -> Option<DataSource> {
        self.inner
            .read()
            .sources
            .iter()
            .find(|source| source.id == id)
            .cloned()
    }

    /// Ordered snapshot of every source.
    pub fn snapshot(&self) -> Vec<DataSource> {
        self.inner.read().sources.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().sources.is_empty()
    }

    /// Whether any source is still resolving its metadata.
    pub fn any_loading(&self) -> bool {
        self.inner
            .read()
            .sources
            .iter()
            .any(|source| source.status.is_loading())
    }

    /// Start a resolution for `id`, invalidating any resolution already in flight.
    pub fn begin_resolution(&self, id: SourceId) -> Option<ResolutionTicket> {
        let mut inner = self.inner.write();
        if !inner.sources.iter().any(|source| source.id == id) {
            return None;
        }
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.tickets.insert(id, seq);
        Some(ResolutionTicket { id, seq })
    }

    /// Apply a resolution result if `ticket` is still the latest for its source.
    ///
    /// Returns `false` when the update was discarded as stale.
    pub fn update_resolution(&self, ticket: &ResolutionTicket, patch: SourcePatch) -> bool {
        let mut applied = false;
        self.mutate(|inner| {
            if inner.tickets.get(&ticket.id) != Some(&ticket.seq) {
                return false;
            }
            if let Some(source) = find_mut(&mut inner.sources, ticket.id) {
                source.apply(patch);
                applied = true;
            }
            applied
        });
        if !applied {
            tracing::debug!("Discarding stale resolution result for source {}", ticket.id);
        }
        applied
    }

    /// Run a mutation and notify the listener if it changed anything.
    fn mutate<F>(&self, f: F)
    where
        F: FnOnce(&mut Inner) -> bool,
    {
        let snapshot = {
            let mut inner = self.inner.write();
            if !f(&mut inner) {
                return;
            }
            inner.sources.clone()
        };

        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener(&snapshot);
        }
    }
}

fn find_mut(sources: &mut [DataSource], id: SourceId) -> Option<&mut DataSource> {
    sources.iter_mut().find(|source| source.id == id)
}
