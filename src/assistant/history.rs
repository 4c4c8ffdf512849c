//! Executor wrapper that records every executed query.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{
    HistoryEntry, HistoryStatus, QueryExecutor, QueryHistory, QueryResult,
};

/// Number of entries kept and returned by [`QueryHistory::list`].
pub const HISTORY_LIMIT: usize = 50;

/// Wraps an executor, keeping the latest executions in memory.
pub struct RecordingExecutor {
    inner: Arc<dyn QueryExecutor>,
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl RecordingExecutor {
    pub fn new(inner: Arc<dyn QueryExecutor>) -> Self {
        Self {
            inner,
            entries: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
        }
    }

    fn record(&self, query: &str, status: HistoryStatus) {
        let mut entries = self.entries.lock();
        if entries.len() == HISTORY_LIMIT {
            entries.pop_back();
        }
        entries.push_front(HistoryEntry {
            query_text: query.to_string(),
            timestamp: Utc::now(),
            status,
        });
    }
}

#[async_trait]
impl QueryExecutor for RecordingExecutor {
    async fn execute(
        &self,
        query: &str,
        offset: usize,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        let result = self.inner.execute(query, offset, limit, cancel).await;
        let status = if result.is_ok() {
            HistoryStatus::Successful
        } else {
            HistoryStatus::Fail
        };
        self.record(query, status);
        result
    }
}

#[async_trait]
impl QueryHistory for RecordingExecutor {
    /// Latest executions, newest first.
    async fn list(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self.entries.lock().iter().cloned().collect())
    }
}
