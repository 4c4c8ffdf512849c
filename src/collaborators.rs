//! Contracts of the external services the assistant drives.
//!
//! The query engine, the generative model and the sheet lister all live
//! outside this crate. These traits are the only surface the registry,
//! resolver and orchestrator see, which keeps them testable with scripted
//! implementations.
//!
//! Errors are plain `anyhow::Error`s; their display text is what users see.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::settings::ModelConfig;

/// Columnar result of a query, already rendered to strings by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Human-readable elapsed time (e.g. "12ms").
    pub elapsed: String,
}

/// Executes SQL text against the engine.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run `query`, returning at most `limit` rows starting at page `offset`.
    ///
    /// The token is advisory: implementations may ignore it, and callers
    /// must still check it once the call settles.
    async fn execute(
        &self,
        query: &str,
        offset: usize,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<QueryResult>;
}

/// Lists named sub-resources (e.g. workbook sheets) of a source.
#[async_trait]
pub trait SubResourceLister: Send + Sync {
    async fn list(&self, locator: &str) -> Result<Vec<String>>;
}

/// Input to a query generation call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_preview: Option<String>,
}

/// Input to a query repair call: the generation request plus the failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairRequest {
    #[serde(flatten)]
    pub base: GenerationRequest,
    pub failed_query: String,
    pub error_message: String,
    /// 1-based repair attempt number.
    pub attempt: u32,
}

/// Query text produced by the model, with its optional explanation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedQuery {
    #[serde(rename = "sql")]
    pub query_text: String,
    #[serde(default, rename = "reasoning", skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// Generates and repairs queries from natural language.
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
        config: &ModelConfig,
        cancel: &CancellationToken,
    ) -> Result<GeneratedQuery>;

    async fn repair(
        &self,
        request: &RepairRequest,
        config: &ModelConfig,
        cancel: &CancellationToken,
    ) -> Result<GeneratedQuery>;
}

/// Outcome recorded for a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Successful,
    Fail,
}

impl std::fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryStatus::Successful => write!(f, "successful"),
            HistoryStatus::Fail => write!(f, "fail"),
        }
    }
}

/// A previously executed query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub query_text: String,
    pub timestamp: DateTime<Utc>,
    pub status: HistoryStatus,
}

/// Read-only access to executed query history.
#[async_trait]
pub trait QueryHistory: Send + Sync {
    async fn list(&self) -> Result<Vec<HistoryEntry>>;
}
