//! Scripted collaborators for unit and scenario tests.

#![cfg(test)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{
    GeneratedQuery, GenerationRequest, QueryExecutor, QueryGenerator, QueryResult, RepairRequest,
    SubResourceLister,
};
use crate::settings::ModelConfig;

type ExecHandler = Box<dyn Fn(&str, usize) -> Result<QueryResult, String> + Send + Sync>;

/// Build a result with the given columns and rows.
pub fn result(columns: &[&str], rows: &[&[&str]]) -> QueryResult {
    QueryResult {
        columns: columns.iter().map(|c| c.to_string()).collect(),
        rows: rows
            .iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect(),
        elapsed: "1ms".to_string(),
    }
}

/// Executor driven by a closure of `(query, call_index)`.
pub struct ScriptedExecutor {
    handler: ExecHandler,
    calls: Mutex<Vec<String>>,
    count: AtomicUsize,
    /// Signalled when an execution starts.
    pub entered: Arc<Notify>,
    /// When set, each execution waits for a permit before returning.
    gate: Option<Arc<Notify>>,
}

impl ScriptedExecutor {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, usize) -> Result<QueryResult, String> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
            entered: Arc::new(Notify::new()),
            gate: None,
        }
    }

    /// Replay `responses` in order; the last one repeats.
    pub fn sequence(responses: Vec<Result<QueryResult, String>>) -> Self {
        Self::new(move |_, index| {
            let last = responses.len().saturating_sub(1);
            responses[index.min(last)].clone()
        })
    }

    pub fn always_fail(message: &str) -> Self {
        let message = message.to_string();
        Self::new(move |_, _| Err(message.clone()))
    }

    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        query: &str,
        _offset: usize,
        _limit: usize,
        _cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        let index = self.count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(query.to_string());
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        (self.handler)(query, index).map_err(|message| anyhow!(message))
    }
}

/// Lister returning a fixed answer per call, in order (last repeats).
pub struct ScriptedLister {
    responses: Vec<Result<Vec<String>, String>>,
    count: AtomicUsize,
}

impl ScriptedLister {
    pub fn new(responses: Vec<Result<Vec<&str>, &str>>) -> Self {
        Self {
            responses: responses
                .into_iter()
                .map(|r| {
                    r.map(|sheets| sheets.into_iter().map(String::from).collect())
                        .map_err(String::from)
                })
                .collect(),
            count: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubResourceLister for ScriptedLister {
    async fn list(&self, _locator: &str) -> Result<Vec<String>> {
        let index = self.count.fetch_add(1, Ordering::SeqCst);
        let last = self.responses.len().saturating_sub(1);
        self.responses[index.min(last)]
            .clone()
            .map_err(|message| anyhow!(message))
    }
}

/// Generator replaying fixed generate/repair answers and recording requests.
pub struct ScriptedGenerator {
    generate: Result<GeneratedQuery, String>,
    repairs: Vec<Result<GeneratedQuery, String>>,
    pub generate_requests: Mutex<Vec<GenerationRequest>>,
    pub repair_requests: Mutex<Vec<RepairRequest>>,
    /// Signalled when a repair starts.
    pub repair_entered: Arc<Notify>,
    /// Repairs block until the session is cancelled, then fail like an
    /// aborted HTTP request.
    wait_for_cancel: bool,
}

impl ScriptedGenerator {
    pub fn new(
        generate: Result<&str, &str>,
        repairs: Vec<Result<&str, &str>>,
    ) -> Self {
        let to_query = |r: Result<&str, &str>| {
            r.map(|sql| GeneratedQuery {
                query_text: sql.to_string(),
                rationale: None,
            })
            .map_err(String::from)
        };
        Self {
            generate: to_query(generate),
            repairs: repairs.into_iter().map(to_query).collect(),
            generate_requests: Mutex::new(Vec::new()),
            repair_requests: Mutex::new(Vec::new()),
            repair_entered: Arc::new(Notify::new()),
            wait_for_cancel: false,
        }
    }

    pub fn with_cancellable_repair(mut self) -> Self {
        self.wait_for_cancel = true;
        self
    }

    pub fn with_rationale(mut self, rationale: &str) -> Self {
        if let Ok(query) = &mut self.generate {
            query.rationale = Some(rationale.to_string());
        }
        self
    }

    pub fn repair_calls(&self) -> usize {
        self.repair_requests.lock().len()
    }
}

#[async_trait]
impl QueryGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
        _config: &ModelConfig,
        _cancel: &CancellationToken,
    ) -> Result<GeneratedQuery> {
        self.generate_requests.lock().push(request.clone());
        self.generate.clone().map_err(|message| anyhow!(message))
    }

    async fn repair(
        &self,
        request: &RepairRequest,
        _config: &ModelConfig,
        cancel: &CancellationToken,
    ) -> Result<GeneratedQuery> {
        let index = {
            let mut requests = self.repair_requests.lock();
            requests.push(request.clone());
            requests.len() - 1
        };
        self.repair_entered.notify_one();
        if self.wait_for_cancel {
            cancel.cancelled().await;
            return Err(anyhow!("AI request cancelled"));
        }
        let last = self.repairs.len().saturating_sub(1);
        self.repairs
            .get(index.min(last))
            .cloned()
            .unwrap_or_else(|| Err("no scripted repair".to_string()))
            .map_err(|message| anyhow!(message))
    }
}
