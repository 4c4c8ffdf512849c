//! Data source registry and schema discovery.
//!
//! - [`model`]: the `DataSource` record and its keys, statuses and patches
//! - [`registry`]: the in-process owner of all sources
//! - [`resolver`]: asynchronous sheet and column discovery
//! - [`sheets`]: spreadsheet sheet listing
//! - [`store`]: JSON persistence of the source list

pub mod model;
pub mod registry;
pub mod resolver;
pub mod sheets;
pub mod store;

pub use model::{
    AliasKey, AliasMap, DataSource, ReaderKind, SourceDescriptor, SourceId, SourceKind,
    SourcePatch, SourceStatus,
};
pub use registry::{ChangeListener, ResolutionTicket, SourceRegistry};
pub use resolver::{MetadataResolver, ResolveOptions};
pub use sheets::WorkbookSheetLister;
pub use store::SourceStore;
