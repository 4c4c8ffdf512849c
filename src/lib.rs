//! Assisted SQL generation over a registry of local and relational data sources.
//!
//! - [`sources`]: data source registry, metadata discovery and persistence
//! - [`prompt`]: deterministic prompt context built from the registry
//! - [`assistant`]: the generate / execute / repair orchestrator and its model client
//! - [`collaborators`]: contracts of the external query engine, model and listers
//! - [`settings`]: model configuration and assistant mode

pub mod assistant;
pub mod collaborators;
pub mod error;
pub mod prompt;
pub mod settings;
pub mod sources;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(test)]
mod testing;

pub use assistant::{QueryEvent, QueryOrchestrator, SessionStatus};
pub use error::{AssistError, Result};
pub use settings::{ModelConfig, QueryMode, SettingsManager};
pub use sources::{DataSource, MetadataResolver, SourceRegistry};
