//! Query generation and repair state machine.
//!
//! A session turns one prompt into a query, executes it and, when execution
//! fails, asks the model for a fix up to `retry_limit` times:
//!
//! ```text
//! idle -> generating -> success
//!                    -> error            (generation failed, or failed with no budget)
//!                    -> retrying (1..N)  -> success | error | cancelled
//! ```
//!
//! Every submitted session ends in exactly one of `success`, `error` or
//! `cancelled`. Cancellation is cooperative and observed before each
//! execution, after each execution settles, and at the start of each repair.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::events::{QueryEvent, SessionStatus};
use super::normalize::normalize_query;
use crate::collaborators::{
    GenerationRequest, QueryExecutor, QueryGenerator, QueryResult, RepairRequest,
};
use crate::error::{error_message, AssistError, Result};
use crate::prompt::{build_prompt_context, data_preview, source_descriptor};
use crate::settings::{ModelConfig, QueryMode, SettingsManager};
use crate::sources::SourceRegistry;

/// Rows requested when running a generated query.
pub const EXECUTION_ROW_LIMIT: usize = 200;

const GENERATING_MESSAGE: &str = "Generating query...";
const EXECUTED_MESSAGE: &str = "Query executed successfully";
const CANCELLED_MESSAGE: &str = "Query session cancelled";

/// Snapshot of the current (or last) query session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationSession {
    pub status: SessionStatus,
    /// 0 while generating, 1-based during repair.
    pub attempt: u32,
    pub current_query_text: Option<String>,
    pub last_error: Option<String>,
    pub message: String,
}

enum Execution {
    Succeeded,
    Failed(String),
    Cancelled,
}

/// State owned by one running session.
struct SessionRun {
    epoch: u64,
    token: CancellationToken,
    config: ModelConfig,
    session: OrchestrationSession,
}

/// Clears the cancel slot and the in-flight flag when a session ends,
/// including when the `submit` future is dropped mid-session.
struct InFlightGuard<'a> {
    in_flight: &'a AtomicBool,
    cancel: &'a Mutex<Option<CancellationToken>>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        *self.cancel.lock() = None;
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Drives query sessions against the registry and external collaborators.
pub struct QueryOrchestrator {
    registry: Arc<SourceRegistry>,
    generator: Arc<dyn QueryGenerator>,
    executor: Arc<dyn QueryExecutor>,
    settings: Arc<SettingsManager>,
    session: RwLock<OrchestrationSession>,
    /// Bumped whenever the visible session is reset; older runs stop publishing.
    epoch: AtomicU64,
    in_flight: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    last_result: RwLock<Option<QueryResult>>,
    event_tx: Option<mpsc::UnboundedSender<QueryEvent>>,
}

impl QueryOrchestrator {
    pub fn new(
        registry: Arc<SourceRegistry>,
        generator: Arc<dyn QueryGenerator>,
        executor: Arc<dyn QueryExecutor>,
        settings: Arc<SettingsManager>,
    ) -> Self {
        Self {
            registry,
            generator,
            executor,
            settings,
            session: RwLock::new(OrchestrationSession::default()),
            epoch: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            cancel: Mutex::new(None),
            last_result: RwLock::new(None),
            event_tx: None,
        }
    }

    /// Emit [`QueryEvent`]s on `tx` while sessions run.
    pub fn with_event_channel(mut self, tx: mpsc::UnboundedSender<QueryEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn session(&self) -> OrchestrationSession {
        self.session.read().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.session.read().status
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Result of the last execution that completed without cancellation.
    pub fn last_result(&self) -> Option<QueryResult> {
        self.last_result.read().clone()
    }

    /// Run a full session for `prompt` and return its terminal snapshot.
    ///
    /// Fails without touching the session when the assistant is disabled, the
    /// prompt is blank or another session is in flight.
    pub async fn submit(
        &self,
        prompt: &str,
        previous_query: Option<&str>,
    ) -> Result<OrchestrationSession> {
        if self.settings.mode().await != QueryMode::Ai {
            return Err(AssistError::AssistantDisabled);
        }
        if prompt.trim().is_empty() {
            return Err(AssistError::EmptyPrompt);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AssistError::Busy);
        }
        let _guard = InFlightGuard {
            in_flight: &self.in_flight,
            cancel: &self.cancel,
        };

        let token = CancellationToken::new();
        *self.cancel.lock() = Some(token.clone());

        let mut run = SessionRun {
            epoch: self.epoch.load(Ordering::SeqCst),
            token,
            config: self.settings.model_config().await,
            session: OrchestrationSession {
                status: SessionStatus::Generating,
                message: GENERATING_MESSAGE.to_string(),
                ..Default::default()
            },
        };
        self.publish(&run);

        let sources = self.registry.snapshot();
        let request = GenerationRequest {
            prompt: build_prompt_context(prompt, &sources),
            source: source_descriptor(&sources),
            previous_query: previous_query
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(String::from),
            data_preview: data_preview(self.last_result.read().as_ref(), &sources),
        };
        tracing::info!(
            "Starting query session with {} source(s), retry limit {}",
            sources.len(),
            run.config.retry_limit
        );

        self.run_session(&mut run, request).await;

        tracing::info!(
            "Query session finished: {} (attempt {})",
            run.session.status,
            run.session.attempt
        );
        Ok(run.session)
    }

    /// Request cancellation of the session in flight. Returns `false` if idle.
    pub fn cancel(&self) -> bool {
        match self.cancel.lock().as_ref() {
            Some(token) => {
                tracing::debug!("Cancelling query session");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Switch between assisted and manual mode.
    ///
    /// Leaving assisted mode cancels any running session and resets the
    /// visible session to idle. Persistence failures are logged only.
    pub async fn set_mode(&self, mode: QueryMode) {
        if let Err(e) = self.settings.set_mode(mode).await {
            tracing::warn!("Failed to persist query mode: {:#}", e);
        }
        if mode == QueryMode::Ai {
            return;
        }

        self.cancel();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let idle = OrchestrationSession::default();
        *self.session.write() = idle.clone();
        self.emit(QueryEvent::Status {
            status: idle.status,
            attempt: idle.attempt,
            message: idle.message,
        });
    }

    async fn run_session(&self, run: &mut SessionRun, request: GenerationRequest) {
        let generated = match self
            .generator
            .generate(&request, &run.config, &run.token)
            .await
        {
            Ok(generated) => generated,
            Err(e) => {
                if run.token.is_cancelled() {
                    return self.finish_cancelled(run);
                }
                let message = error_message(&e);
                tracing::warn!("Query generation failed: {}", message);
                return self.finish(run, SessionStatus::Error, message);
            }
        };

        let query = normalize_query(&generated.query_text);
        let failure = match self.execute(run, &query).await {
            Execution::Succeeded => {
                let message = generated
                    .rationale
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| EXECUTED_MESSAGE.to_string());
                return self.finish(run, SessionStatus::Success, message);
            }
            Execution::Cancelled => return self.finish_cancelled(run),
            Execution::Failed(error) => error,
        };

        self.repair(run, request, query, failure).await;
    }

    async fn repair(
        &self,
        run: &mut SessionRun,
        base: GenerationRequest,
        failed_query: String,
        error: String,
    ) {
        let limit = run.config.retry_limit;
        if limit == 0 {
            return self.finish(run, SessionStatus::Error, error);
        }

        let mut failed_query = failed_query;
        let mut last_error = error;

        for attempt in 1..=limit {
            if run.token.is_cancelled() {
                return self.finish_cancelled(run);
            }

            run.session.status = SessionStatus::Retrying;
            run.session.attempt = attempt;
            run.session.message = format!("Repairing query (attempt {}/{})...", attempt, limit);
            self.publish(run);

            let request = RepairRequest {
                base: base.clone(),
                failed_query: failed_query.clone(),
                error_message: last_error.clone(),
                attempt,
            };
            let repaired = match self.generator.repair(&request, &run.config, &run.token).await {
                Ok(repaired) => repaired,
                Err(e) => {
                    if run.token.is_cancelled() {
                        return self.finish_cancelled(run);
                    }
                    last_error = error_message(&e);
                    tracing::warn!("Repair attempt {} failed: {}", attempt, last_error);
                    run.session.last_error = Some(last_error.clone());
                    continue;
                }
            };

            let query = normalize_query(&repaired.query_text);
            match self.execute(run, &query).await {
                Execution::Succeeded => {
                    let message =
                        format!("Query repaired successfully (attempt {}/{})", attempt, limit);
                    return self.finish(run, SessionStatus::Success, message);
                }
                Execution::Cancelled => return self.finish_cancelled(run),
                Execution::Failed(error) => {
                    failed_query = query;
                    last_error = error;
                }
            }
        }

        self.finish(run, SessionStatus::Error, last_error);
    }

    /// Execute `query`, honouring the cancellation checkpoints around the call.
    async fn execute(&self, run: &mut SessionRun, query: &str) -> Execution {
        if run.token.is_cancelled() {
            return Execution::Cancelled;
        }

        run.session.current_query_text = Some(query.to_string());
        self.publish(run);
        self.emit_if_current(
            run,
            QueryEvent::QueryText {
                query_text: query.to_string(),
            },
        );

        let outcome = self
            .executor
            .execute(query, 0, EXECUTION_ROW_LIMIT, &run.token)
            .await;

        if run.token.is_cancelled() {
            tracing::debug!("Discarding execution result of a cancelled session");
            return Execution::Cancelled;
        }

        match outcome {
            Ok(result) => {
                tracing::debug!(
                    "Query returned {} row(s) in {}",
                    result.rows.len(),
                    result.elapsed
                );
                *self.last_result.write() = Some(result.clone());
                self.emit_if_current(run, QueryEvent::Executed { result });
                Execution::Succeeded
            }
            Err(e) => {
                let error = error_message(&e);
                tracing::debug!("Query execution failed: {}", error);
                run.session.last_error = Some(error.clone());
                self.emit_if_current(
                    run,
                    QueryEvent::ExecutionFailed {
                        query_text: query.to_string(),
                        error: error.clone(),
                    },
                );
                Execution::Failed(error)
            }
        }
    }

    fn finish(&self, run: &mut SessionRun, status: SessionStatus, message: String) {
        if status == SessionStatus::Error {
            run.session.last_error = Some(message.clone());
        }
        run.session.status = status;
        run.session.message = message;
        self.publish(run);
    }

    fn finish_cancelled(&self, run: &mut SessionRun) {
        self.finish(run, SessionStatus::Cancelled, CANCELLED_MESSAGE.to_string());
    }

    /// Make the run's session visible, unless the session was reset meanwhile.
    fn publish(&self, run: &SessionRun) {
        {
            let mut shared = self.session.write();
            if self.epoch.load(Ordering::SeqCst) != run.epoch {
                return;
            }
            *shared = run.session.clone();
        }
        self.emit(QueryEvent::Status {
            status: run.session.status,
            attempt: run.session.attempt,
            message: run.session.message.clone(),
        });
    }

    fn emit_if_current(&self, run: &SessionRun, event: QueryEvent) {
        if self.epoch.load(Ordering::SeqCst) == run.epoch {
            self.emit(event);
        }
    }

    fn emit(&self, event: QueryEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}
