//! Scenario tests wiring the registry, resolver and orchestrator together
//! against scripted collaborators.

#![cfg(test)]

use std::sync::Arc;

use proptest::prelude::*;
use tokio::sync::{mpsc, Notify};

use super::events::{QueryEvent, SessionStatus};
use super::orchestrator::QueryOrchestrator;
use crate::error::AssistError;
use crate::settings::{AssistantSettings, ModelConfig, QueryMode, SettingsManager};
use crate::sources::model::{SourcePatch, SourceStatus, UNSUPPORTED_TYPE};
use crate::sources::{MetadataResolver, ResolveOptions, SourceRegistry};
use crate::testing::{result, ScriptedExecutor, ScriptedGenerator, ScriptedLister};

struct Harness {
    _dir: tempfile::TempDir,
    registry: Arc<SourceRegistry>,
    generator: Arc<ScriptedGenerator>,
    executor: Arc<ScriptedExecutor>,
    orchestrator: Arc<QueryOrchestrator>,
}

fn harness(
    retry_limit: u32,
    generator: ScriptedGenerator,
    executor: ScriptedExecutor,
    events: Option<mpsc::UnboundedSender<QueryEvent>>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let settings = SettingsManager::from_settings(
        AssistantSettings {
            mode: QueryMode::Ai,
            model: ModelConfig {
                retry_limit,
                ..Default::default()
            },
            ..Default::default()
        },
        dir.path().join("settings.toml"),
    );

    let registry = Arc::new(SourceRegistry::new());
    let generator = Arc::new(generator);
    let executor = Arc::new(executor);
    let mut orchestrator = QueryOrchestrator::new(
        registry.clone(),
        generator.clone(),
        executor.clone(),
        Arc::new(settings),
    );
    if let Some(tx) = events {
        orchestrator = orchestrator.with_event_channel(tx);
    }

    Harness {
        _dir: dir,
        registry,
        generator,
        executor,
        orchestrator: Arc::new(orchestrator),
    }
}

fn terminal_statuses(rx: &mut mpsc::UnboundedReceiver<QueryEvent>) -> Vec<SessionStatus> {
    let mut terminal = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let QueryEvent::Status { status, .. } = event {
            if status.is_terminal() {
                terminal.push(status);
            }
        }
    }
    terminal
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_failing_execution_uses_whole_budget(retry_limit in 0u32..=5) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let h = harness(
                retry_limit,
                ScriptedGenerator::new(Ok("SELECT broken"), vec![Ok("SELECT still_broken")]),
                ScriptedExecutor::always_fail("engine error"),
                Some(tx),
            );

            let session = h.orchestrator.submit("anything", None).await.unwrap();

            assert_eq!(session.status, SessionStatus::Error);
            assert_eq!(session.attempt, retry_limit);
            assert_eq!(h.generator.repair_calls(), retry_limit as usize);
            assert_eq!(h.executor.calls().len(), retry_limit as usize + 1);
            assert_eq!(session.message, "engine error");
            assert_eq!(terminal_statuses(&mut rx), vec![SessionStatus::Error]);

            let attempts: Vec<u32> = h
                .generator
                .repair_requests
                .lock()
                .iter()
                .map(|r| r.attempt)
                .collect();
            assert_eq!(attempts, (1..=retry_limit).collect::<Vec<_>>());
        });
    }
}

#[tokio::test]
async fn test_zero_retry_limit_fails_without_repair() {
    let h = harness(
        0,
        ScriptedGenerator::new(Ok("SELECT nope FROM t"), vec![Ok("SELECT 1")]),
        ScriptedExecutor::always_fail("column nope not found"),
        None,
    );

    let session = h.orchestrator.submit("show nope", None).await.unwrap();

    assert_eq!(session.status, SessionStatus::Error);
    assert_eq!(session.attempt, 0);
    assert_eq!(session.message, "column nope not found");
    assert_eq!(h.generator.repair_calls(), 0);
}

#[tokio::test]
async fn test_total_sales_by_region_repaired_on_first_attempt() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let h = harness(
        2,
        ScriptedGenerator::new(
            Ok("select regoin, sum(amount) from read_csv('/data/sales.csv') group by regoin"),
            vec![Ok(
                "```sql\nselect region, sum(amount) from read_csv('/data/sales.csv') group by region;\n```",
            )],
        ),
        ScriptedExecutor::new(|query, _| {
            if query.contains("regoin") {
                Err("Schema error: No field named regoin".to_string())
            } else {
                Ok(result(&["region", "sum(amount)"], &[&["north", "10"], &["south", "7"]]))
            }
        }),
        Some(tx),
    );
    let id = h.registry.add_file("/data/sales.csv");
    h.registry.update(
        id,
        SourcePatch::status(SourceStatus::Ready)
            .with_columns(vec!["region".to_string(), "amount".to_string()]),
    );

    let session = h
        .orchestrator
        .submit("total sales by region", None)
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Success);
    assert_eq!(session.attempt, 1);
    let final_query = session.current_query_text.unwrap();
    assert!(final_query.starts_with("SELECT region, sum(amount) FROM read_csv('/data/sales.csv')"));
    assert!(!final_query.ends_with(';'));
    assert_eq!(terminal_statuses(&mut rx), vec![SessionStatus::Success]);

    let generation = h.generator.generate_requests.lock()[0].clone();
    assert!(generation.prompt.starts_with("total sales by region\n\nData source 1: /data/sales.csv"));
    assert!(generation.prompt.contains("Suggested read: read_csv('/data/sales.csv')"));
    assert_eq!(generation.source.as_deref(), Some("/data/sales.csv"));
    assert_eq!(
        generation.data_preview.as_deref(),
        Some(r#"{"header":["region","amount"],"sample":[]}"#)
    );

    let repair = h.generator.repair_requests.lock()[0].clone();
    assert_eq!(repair.attempt, 1);
    assert_eq!(repair.error_message, "Schema error: No field named regoin");
    assert!(repair.failed_query.contains("regoin"));
    assert_eq!(repair.base, generation);

    let last = h.orchestrator.last_result().unwrap();
    assert_eq!(last.rows.len(), 2);
}

#[tokio::test]
async fn test_generation_failure_is_terminal() {
    let h = harness(
        3,
        ScriptedGenerator::new(Err("401 Unauthorized"), vec![Ok("SELECT 1")]),
        ScriptedExecutor::sequence(vec![Ok(result(&["1"], &[]))]),
        None,
    );

    let session = h.orchestrator.submit("anything", None).await.unwrap();

    assert_eq!(session.status, SessionStatus::Error);
    assert_eq!(session.message, "401 Unauthorized");
    assert_eq!(session.current_query_text, None);
    assert!(h.executor.calls().is_empty());
    assert_eq!(h.generator.repair_calls(), 0);
}

#[tokio::test]
async fn test_cancel_while_retrying_discards_late_result() {
    let gate = Arc::new(Notify::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let h = harness(
        2,
        ScriptedGenerator::new(Ok("SELECT brokn"), vec![Ok("SELECT fixed")]),
        ScriptedExecutor::sequence(vec![
            Err("syntax error".to_string()),
            Ok(result(&["fixed"], &[&["1"]])),
        ])
        .with_gate(gate.clone()),
        Some(tx),
    );

    let orchestrator = h.orchestrator.clone();
    let session = tokio::spawn(async move { orchestrator.submit("fix me", None).await });

    // First execution fails.
    h.executor.entered.notified().await;
    gate.notify_one();

    // The repaired query is now executing.
    h.executor.entered.notified().await;
    assert_eq!(h.orchestrator.status(), SessionStatus::Retrying);
    assert!(h.orchestrator.cancel());
    gate.notify_one();

    let session = session.await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Cancelled);
    assert_eq!(session.attempt, 1);
    assert_eq!(session.current_query_text.as_deref(), Some("SELECT fixed"));
    assert_eq!(h.orchestrator.last_result(), None);
    assert_eq!(h.executor.calls().len(), 2);
    assert_eq!(terminal_statuses(&mut rx), vec![SessionStatus::Cancelled]);
    assert!(!h.orchestrator.is_busy());
}

#[tokio::test]
async fn test_cancel_during_final_repair_is_cancelled() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let h = harness(
        1,
        ScriptedGenerator::new(Ok("SELECT brokn"), vec![]).with_cancellable_repair(),
        ScriptedExecutor::always_fail("syntax error"),
        Some(tx),
    );

    let orchestrator = h.orchestrator.clone();
    let session = tokio::spawn(async move { orchestrator.submit("fix me", None).await });

    h.generator.repair_entered.notified().await;
    assert_eq!(h.orchestrator.status(), SessionStatus::Retrying);
    assert!(h.orchestrator.cancel());

    let session = session.await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Cancelled);
    assert_eq!(session.attempt, 1);
    assert_eq!(session.current_query_text.as_deref(), Some("SELECT brokn"));
    assert_eq!(h.executor.calls().len(), 1);
    assert_eq!(terminal_statuses(&mut rx), vec![SessionStatus::Cancelled]);
    assert!(!h.orchestrator.is_busy());
}

#[tokio::test]
async fn test_dropped_session_releases_cancel_slot() {
    let gate = Arc::new(Notify::new());
    let h = harness(
        1,
        ScriptedGenerator::new(Ok("SELECT 1"), vec![]),
        ScriptedExecutor::sequence(vec![Ok(result(&["1"], &[]))]).with_gate(gate.clone()),
        None,
    );

    let orchestrator = h.orchestrator.clone();
    let session = tokio::spawn(async move { orchestrator.submit("one", None).await });
    h.executor.entered.notified().await;
    assert!(h.orchestrator.is_busy());

    session.abort();
    assert!(session.await.unwrap_err().is_cancelled());

    assert!(!h.orchestrator.is_busy());
    assert!(!h.orchestrator.cancel());
}

#[tokio::test]
async fn test_second_submit_while_running_is_busy() {
    let gate = Arc::new(Notify::new());
    let h = harness(
        1,
        ScriptedGenerator::new(Ok("SELECT 1"), vec![]),
        ScriptedExecutor::sequence(vec![Ok(result(&["1"], &[]))]).with_gate(gate.clone()),
        None,
    );

    let orchestrator = h.orchestrator.clone();
    let first = tokio::spawn(async move { orchestrator.submit("one", None).await });
    h.executor.entered.notified().await;

    let before = h.orchestrator.session();
    let err = h.orchestrator.submit("two", None).await.unwrap_err();
    assert!(matches!(err, AssistError::Busy));
    assert_eq!(h.orchestrator.session(), before);
    assert_eq!(h.generator.generate_requests.lock().len(), 1);

    gate.notify_one();
    let session = first.await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Success);
    assert!(!h.orchestrator.is_busy());
}

#[tokio::test]
async fn test_second_session_previews_last_result() {
    let h = harness(
        0,
        ScriptedGenerator::new(Ok("SELECT a FROM t"), vec![]),
        ScriptedExecutor::sequence(vec![Ok(result(
            &["a"],
            &[&["1"], &["2"], &["3"], &["4"]],
        ))]),
        None,
    );

    h.orchestrator.submit("first", None).await.unwrap();
    h.orchestrator
        .submit("second", Some("SELECT a FROM t"))
        .await
        .unwrap();

    let requests = h.generator.generate_requests.lock().clone();
    assert_eq!(requests[0].data_preview, None);
    assert_eq!(requests[1].previous_query.as_deref(), Some("SELECT a FROM t"));
    assert_eq!(
        requests[1].data_preview.as_deref(),
        Some(r#"{"header":["a"],"sample":[["1"],["2"],["3"]]}"#)
    );
}

#[tokio::test]
async fn test_rediscovered_sheets_flow_into_context() {
    let h = harness(
        0,
        ScriptedGenerator::new(Ok("SELECT 1"), vec![]),
        ScriptedExecutor::sequence(vec![Ok(result(&["amount"], &[]))]),
        None,
    );
    let resolver = MetadataResolver::new(
        h.registry.clone(),
        h.executor.clone(),
        Arc::new(ScriptedLister::new(vec![
            Ok(vec!["A", "B"]),
            Ok(vec!["A", "C"]),
        ])),
    );
    let id = h.registry.add_file("/data/book.xlsx");

    resolver.select_sheet(id, "B").await;
    assert_eq!(h.registry.get(id).unwrap().sheet_name.as_deref(), Some("B"));

    resolver.resolve(id, ResolveOptions::rediscover()).await;
    let source = h.registry.get(id).unwrap();
    assert_eq!(source.sheet_name.as_deref(), Some("A"));
    assert_eq!(source.status, SourceStatus::Ready);

    h.orchestrator.submit("sum amount", None).await.unwrap();
    let request = h.generator.generate_requests.lock()[0].clone();
    assert!(request
        .prompt
        .contains("Suggested read: read_excel('/data/book.xlsx', sheet_name => 'A')"));
    assert_eq!(request.source.as_deref(), Some("/data/book.xlsx#A"));
}

#[tokio::test]
async fn test_unsupported_source_stays_failed_through_resolution() {
    let h = harness(
        0,
        ScriptedGenerator::new(Ok("SELECT 1"), vec![]),
        ScriptedExecutor::sequence(vec![Ok(result(&["a"], &[]))]),
        None,
    );
    let resolver = MetadataResolver::new(
        h.registry.clone(),
        h.executor.clone(),
        Arc::new(ScriptedLister::new(vec![Ok(vec!["S"])])),
    );
    let id = h.registry.add_file("/data/readme.md");

    resolver.resolve_many(&[id]).await;
    resolver.resolve(id, ResolveOptions::rediscover()).await;

    assert_eq!(
        h.registry.get(id).unwrap().status,
        SourceStatus::failed(UNSUPPORTED_TYPE)
    );
    assert!(h.executor.calls().is_empty());
}
