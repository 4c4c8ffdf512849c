//! Prompt context assembled from the current data sources.

pub mod context;

pub use context::{build_prompt_context, column_hint, data_preview, source_descriptor};
