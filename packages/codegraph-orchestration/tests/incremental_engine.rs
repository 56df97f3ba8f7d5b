//! End-to-end integration tests driving the full C2 -> C8 run through `coordinator::run` against
//! a real (in-memory) SQLite store and fake Splitter/description adapters. Covers scenarios S1,
//! S3, S4, S5, S6 and the L1/L2/L3 idempotence laws.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use thiserror::Error;

use tokio_util::sync::CancellationToken;

use codegraph_core::domain::{Direction, ProjectId};
use codegraph_core::error::{Categorized, ErrorCategory};
use codegraph_core::ports::{
    DerivedConnection, ProjectDescriptionSource, SplitterClient, SplitterRequest, SplitterResponse,
};
use codegraph_orchestration::{coordinator, Configuration, RunOutcome};
use codegraph_storage::SqliteConnectionGraphStore;

#[derive(Debug, Error)]
#[error("fake splitter failure")]
struct FakeSplitterError {
    category: ErrorCategory,
}

impl Categorized for FakeSplitterError {
    fn category(&self) -> ErrorCategory {
        self.category
    }
}

/// Echoes one derived connection per snippet, tagged `HTTP/GET` with the description supplied at
/// construction. Counts calls so tests can assert the Splitter was (or wasn't) invoked.
struct EchoSplitter {
    calls: AtomicUsize,
    description: String,
    technology: String,
}

impl EchoSplitter {
    fn new(description: &str, technology: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            description: description.to_string(),
            technology: technology.to_string(),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SplitterClient for EchoSplitter {
    type Error = FakeSplitterError;

    async fn split(&self, request: SplitterRequest) -> Result<SplitterResponse, Self::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SplitterResponse {
            connections: request
                .snippets
                .iter()
                .enumerate()
                .map(|(i, s)| DerivedConnection {
                    source_index: i,
                    direction: Direction::Outgoing,
                    start_line: s.start_line,
                    end_line: s.end_line,
                    code_snippet: s.code.clone(),
                    description: self.description.clone(),
                    technology_name: self.technology.clone(),
                })
                .collect(),
        })
    }
}

struct AlwaysFailSplitter;

#[async_trait]
impl SplitterClient for AlwaysFailSplitter {
    type Error = FakeSplitterError;

    async fn split(&self, _request: SplitterRequest) -> Result<SplitterResponse, Self::Error> {
        Err(FakeSplitterError {
            category: ErrorCategory::Permanent,
        })
    }
}

struct NoDescriptions;

#[async_trait]
impl ProjectDescriptionSource for NoDescriptions {
    // Reuses the store's error type purely to satisfy `OrchestratorError: From<D::Error>` — this
    // adapter never actually produces an error.
    type Error = codegraph_storage::StorageError;

    async fn description(&self, _project_id: ProjectId) -> Result<Option<String>, Self::Error> {
        Ok(None)
    }
}

async fn store_with_two_projects() -> SqliteConnectionGraphStore {
    let store = SqliteConnectionGraphStore::open_in_memory().unwrap();
    store
        .execute_batch_for_tests(
            "INSERT INTO projects (id, name, root_path, description) VALUES
                (1, 'svc-a', '/repo/a', 'service a'),
                (2, 'svc-b', '/repo/b', 'service b');",
        )
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn l1_empty_checkpoint_is_a_no_op() {
    let store = store_with_two_projects().await;
    let splitter = EchoSplitter::new("derived", "HTTP/GET");

    let outcome = coordinator::run(&store, &splitter, &NoDescriptions, &Configuration::default())
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::NothingToDo);
    assert_eq!(splitter.call_count(), 0);
}

/// S1: a one-line connection survives a pure insert elsewhere in the file, with its description
/// and technology untouched and no Splitter call (L2).
#[tokio::test]
async fn s1_clean_shift_survives_with_shifted_range_and_no_splitter_call() {
    let store = store_with_two_projects().await;
    let project_a = ProjectId(1);

    let old_content = "a\nb\nCONN\nd\n";
    let new_content = "a\na2\nb\nCONN\nd\n";

    let file = store.upsert_file(project_a, "svc.go", "go", "hash-old").await.unwrap();
    store
        .execute_batch_for_tests(&format!(
            "INSERT INTO connections (file_id, direction, start_line, end_line, code_snippet, description, technology_name)
             VALUES ({}, 'outgoing', 3, 3, 'CONN', 'calls downstream', 'HTTP/GET');",
            file.id.0
        ))
        .await
        .unwrap();
    store
        .execute_batch_for_tests(&format!(
            "INSERT INTO checkpoint_queue (project_id, file_path, change_kind, old_content, new_content, created_at)
             VALUES (1, 'svc.go', 'modified', '{old_content}', '{new_content}', '2026-01-01T00:00:00Z');"
        ))
        .await
        .unwrap();

    let splitter = EchoSplitter::new("should never run", "HTTP/GET");
    let outcome = coordinator::run(&store, &splitter, &NoDescriptions, &Configuration::default())
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Processed);
    assert_eq!(splitter.call_count(), 0, "clean shift must not invoke the splitter");

    let connections = store.connections_by_file(file.id).await.unwrap();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].start_line, 4);
    assert_eq!(connections[0].end_line, 4);
    assert_eq!(connections[0].code_snippet, "CONN");
    assert_eq!(connections[0].description, "calls downstream");

    let remaining = store.list_checkpoint_rows().await.unwrap();
    assert!(remaining.is_empty());
}

/// S3: an added file yields exactly one Splitter call covering the whole file and inserts every
/// returned connection.
#[tokio::test]
async fn s3_added_file_is_split_whole_and_persisted() {
    let store = store_with_two_projects().await;
    let new_content = "package main\n\nfunc main() {}\n";
    store
        .execute_batch_for_tests(&format!(
            "INSERT INTO checkpoint_queue (project_id, file_path, change_kind, new_content, created_at)
             VALUES (1, 'svc/queue.go', 'added', '{new_content}', '2026-01-01T00:00:00Z');"
        ))
        .await
        .unwrap();

    let splitter = EchoSplitter::new("starts the queue consumer", "AMQP");
    let outcome = coordinator::run(&store, &splitter, &NoDescriptions, &Configuration::default())
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Processed);
    assert_eq!(splitter.call_count(), 1);

    let file = store.file_by_path(ProjectId(1), "svc/queue.go").await.unwrap().unwrap();
    let connections = store.connections_by_file(file.id).await.unwrap();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].technology_name, "AMQP");

    assert!(store.list_checkpoint_rows().await.unwrap().is_empty());
}

/// S4: deleting a file removes its connections (and cascades any mappings) without any Splitter
/// call.
#[tokio::test]
async fn s4_deleted_file_removes_its_connections_with_no_splitter_call() {
    let store = store_with_two_projects().await;
    let project_a = ProjectId(1);

    let file = store.upsert_file(project_a, "old.go", "go", "hash").await.unwrap();
    store
        .execute_batch_for_tests(&format!(
            "INSERT INTO connections (file_id, direction, start_line, end_line, code_snippet, description, technology_name)
             VALUES ({id}, 'outgoing', 1, 1, 'a', 'd1', 'HTTP/GET'),
                    ({id}, 'incoming', 2, 2, 'b', 'd2', 'HTTP/POST');",
            id = file.id.0
        ))
        .await
        .unwrap();
    store
        .execute_batch_for_tests(
            "INSERT INTO checkpoint_queue (project_id, file_path, change_kind, old_content, created_at)
             VALUES (1, 'old.go', 'deleted', 'a\nb\n', '2026-01-01T00:00:00Z');",
        )
        .await
        .unwrap();

    let splitter = EchoSplitter::new("should never run", "HTTP/GET");
    let outcome = coordinator::run(&store, &splitter, &NoDescriptions, &Configuration::default())
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Processed);
    assert_eq!(splitter.call_count(), 0);
    assert!(store.file_by_path(project_a, "old.go").await.unwrap().is_none());
    assert!(store.list_checkpoint_rows().await.unwrap().is_empty());
}

/// S5: an outgoing HTTP GET /health in one project's newly-added file matches an incoming
/// GET /health already sitting in another project.
#[tokio::test]
async fn s5_cross_project_http_match_is_recorded() {
    let store = store_with_two_projects().await;

    let file_b = store.upsert_file(ProjectId(2), "b.go", "go", "hash").await.unwrap();
    store
        .execute_batch_for_tests(&format!(
            "INSERT INTO connections (file_id, direction, start_line, end_line, code_snippet, description, technology_name)
             VALUES ({}, 'incoming', 1, 1, 'handleHealth', 'GET /health', 'HTTP/GET');",
            file_b.id.0
        ))
        .await
        .unwrap();

    store
        .execute_batch_for_tests(
            "INSERT INTO checkpoint_queue (project_id, file_path, change_kind, new_content, created_at)
             VALUES (1, 'client.go', 'added', 'callHealth()', '2026-01-01T00:00:00Z');",
        )
        .await
        .unwrap();

    let splitter = EchoSplitter::new("GET /health", "HTTP/GET");
    let outcome = coordinator::run(&store, &splitter, &NoDescriptions, &Configuration::default())
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Processed);
    let mapping_count = store.count_connection_mappings_for_tests().await.unwrap();
    assert_eq!(mapping_count, 1);
}

/// S6: a permanent Splitter failure aborts the whole run — no connections land for the added file
/// and its checkpoint row remains pending for the next run.
#[tokio::test]
async fn s6_splitter_permanent_failure_aborts_with_checkpoint_intact() {
    let store = store_with_two_projects().await;
    store
        .execute_batch_for_tests(
            "INSERT INTO checkpoint_queue (project_id, file_path, change_kind, new_content, created_at)
             VALUES (1, 'svc/queue.go', 'added', 'package main', '2026-01-01T00:00:00Z');",
        )
        .await
        .unwrap();

    let err = coordinator::run(&store, &AlwaysFailSplitter, &NoDescriptions, &Configuration::default())
        .await
        .unwrap_err();

    assert!(err.is_splitter_failure());
    assert!(store.file_by_path(ProjectId(1), "svc/queue.go").await.unwrap().is_some());
    let remaining = store.list_checkpoint_rows().await.unwrap();
    assert_eq!(remaining.len(), 1);
}

/// L3: modifying a file then reverting it before the next run coalesces to a no-op content-wise
/// (old == new), which the Reconciler's byte-exact comparison treats as a clean shift needing no
/// Splitter call even though two checkpoint rows were consumed.
#[tokio::test]
async fn l3_revert_before_next_run_triggers_no_splitter_call() {
    let store = store_with_two_projects().await;
    let project_a = ProjectId(1);

    let original = "a\nb\nCONN\nd\n";
    let file = store.upsert_file(project_a, "svc.go", "go", "hash").await.unwrap();
    store
        .execute_batch_for_tests(&format!(
            "INSERT INTO connections (file_id, direction, start_line, end_line, code_snippet, description, technology_name)
             VALUES ({}, 'outgoing', 3, 3, 'CONN', 'calls downstream', 'HTTP/GET');",
            file.id.0
        ))
        .await
        .unwrap();

    let temp = "a\nb\nCONN\nd\ne\n";
    store
        .execute_batch_for_tests(&format!(
            "INSERT INTO checkpoint_queue (project_id, file_path, change_kind, old_content, new_content, created_at)
             VALUES (1, 'svc.go', 'modified', '{original}', '{temp}', '2026-01-01T00:00:00Z');"
        ))
        .await
        .unwrap();
    store
        .execute_batch_for_tests(&format!(
            "INSERT INTO checkpoint_queue (project_id, file_path, change_kind, old_content, new_content, created_at)
             VALUES (1, 'svc.go', 'modified', '{temp}', '{original}', '2026-01-01T00:00:01Z');"
        ))
        .await
        .unwrap();

    let splitter = EchoSplitter::new("should never run", "HTTP/GET");
    let outcome = coordinator::run(&store, &splitter, &NoDescriptions, &Configuration::default())
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Processed);
    assert_eq!(splitter.call_count(), 0);
    let connections = store.connections_by_file(file.id).await.unwrap();
    assert_eq!(connections[0].code_snippet, "CONN");
    assert_eq!(connections[0].description, "calls downstream");
}

/// A cancellation signal observed before a project's batches are split aborts the run cleanly: no
/// connections land for the cancelled project and its checkpoint row remains pending.
#[tokio::test]
async fn cancellation_aborts_before_next_batch_with_checkpoint_intact() {
    let store = store_with_two_projects().await;
    store
        .execute_batch_for_tests(
            "INSERT INTO checkpoint_queue (project_id, file_path, change_kind, new_content, created_at)
             VALUES (1, 'svc/queue.go', 'added', 'package main', '2026-01-01T00:00:00Z');",
        )
        .await
        .unwrap();

    let splitter = EchoSplitter::new("should never run", "HTTP/GET");
    let token = CancellationToken::new();
    token.cancel();

    let err = coordinator::run_with_cancellation(
        &store,
        &splitter,
        &NoDescriptions,
        &Configuration::default(),
        &token,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        codegraph_orchestration::OrchestratorError::Cancelled
    ));
    assert_eq!(splitter.call_count(), 0);
    assert!(store.list_checkpoint_rows().await.unwrap().len() == 1);
}

/// A run against an on-disk store must be durable: reopening the same database file after the
/// process "restarts" still shows the committed connection and the drained checkpoint queue.
#[tokio::test]
async fn run_against_on_disk_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("graph.sqlite3");

    {
        let store = SqliteConnectionGraphStore::open(&db_path).unwrap();
        store
            .execute_batch_for_tests(
                "INSERT INTO projects (id, name, root_path, description) VALUES (1, 'svc-a', '/repo/a', 'service a');",
            )
            .await
            .unwrap();
        store
            .execute_batch_for_tests(
                "INSERT INTO checkpoint_queue (project_id, file_path, change_kind, new_content, created_at)
                 VALUES (1, 'svc/queue.go', 'added', 'package main', '2026-01-01T00:00:00Z');",
            )
            .await
            .unwrap();

        let splitter = EchoSplitter::new("starts the queue consumer", "AMQP");
        let outcome = coordinator::run(&store, &splitter, &NoDescriptions, &Configuration::default())
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Processed);
    }

    let reopened = SqliteConnectionGraphStore::open(&db_path).unwrap();
    let file = reopened.file_by_path(ProjectId(1), "svc/queue.go").await.unwrap().unwrap();
    let connections = reopened.connections_by_file(file.id).await.unwrap();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].technology_name, "AMQP");
    assert!(reopened.list_checkpoint_rows().await.unwrap().is_empty());
}
