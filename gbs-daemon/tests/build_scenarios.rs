//! End-to-end build scenarios: sessions, ingestion, builds against an
//! in-memory DuckDB graph, and drivers that fail or stall on purpose.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use gbs_core::{
    BatchOutcome, EndpointSpec, GbsError, MappingConfig, MappingRule, NodeSpec, RelationshipSpec,
    Table, WriteBatch,
};
use gbs_daemon::graph::{
    ConnectionManager, DriverError, DriverFactory, DriverResult, DuckGraphFactory, GraphDriver,
    GraphStats,
};
use gbs_daemon::session::{SessionRegistry, SessionStore, INTERRUPTED};
use gbs_daemon::{BuildFailure, BuildStatus, GraphBuilder, RetryPolicy};

/// Wraps the in-memory DuckDB graph, failing the first `failures` batch
/// writes and sleeping `delay` before each write. With
/// `reject_relationships` every relationship batch fails.
struct FlakyFactory {
    inner: DuckGraphFactory,
    failures: Arc<AtomicUsize>,
    executes: Arc<AtomicUsize>,
    delay: Duration,
    reject_relationships: bool,
}

struct FlakyDriver {
    inner: Arc<dyn GraphDriver>,
    failures: Arc<AtomicUsize>,
    executes: Arc<AtomicUsize>,
    delay: Duration,
    reject_relationships: bool,
}

impl GraphDriver for FlakyDriver {
    fn verify(&self) -> DriverResult<()> {
        self.inner.verify()
    }

    fn execute(&self, batch: &WriteBatch) -> DriverResult<BatchOutcome> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        if self.reject_relationships && matches!(batch, WriteBatch::Relationships { .. }) {
            return Err(DriverError::Statement("relationship write rejected".to_string()));
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DriverError::Statement("transient write failure".to_string()));
        }
        self.inner.execute(batch)
    }

    fn stats(&self) -> DriverResult<GraphStats> {
        self.inner.stats()
    }
}

impl DriverFactory for FlakyFactory {
    fn connect(&self) -> DriverResult<Arc<dyn GraphDriver>> {
        Ok(Arc::new(FlakyDriver {
            inner: self.inner.connect()?,
            failures: self.failures.clone(),
            executes: self.executes.clone(),
            delay: self.delay,
            reject_relationships: self.reject_relationships,
        }))
    }

    fn target(&self) -> String {
        "flaky".to_string()
    }
}

struct Harness {
    registry: Arc<SessionRegistry>,
    connections: Arc<ConnectionManager>,
    builder: Arc<GraphBuilder>,
    executes: Arc<AtomicUsize>,
}

fn harness_with(registry: SessionRegistry, failures: usize, delay: Duration, attempts: u32) -> Harness {
    harness_from(registry, failures, delay, false, attempts)
}

fn harness_from(
    registry: SessionRegistry,
    failures: usize,
    delay: Duration,
    reject_relationships: bool,
    attempts: u32,
) -> Harness {
    let executes = Arc::new(AtomicUsize::new(0));
    let factory = FlakyFactory {
        inner: DuckGraphFactory::in_memory(),
        failures: Arc::new(AtomicUsize::new(failures)),
        executes: executes.clone(),
        delay,
        reject_relationships,
    };
    let registry = Arc::new(registry);
    let connections = Arc::new(ConnectionManager::new(
        Arc::new(factory),
        1,
        Duration::ZERO,
    ));
    let retry = RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(5));
    let builder = Arc::new(GraphBuilder::new(
        registry.clone(),
        connections.clone(),
        retry,
    ));
    Harness {
        registry,
        connections,
        builder,
        executes,
    }
}

fn harness() -> Harness {
    harness_with(
        SessionRegistry::in_memory(Duration::from_secs(60), 16),
        0,
        Duration::ZERO,
        3,
    )
}

fn people_mapping() -> MappingConfig {
    MappingConfig::new(
        vec![NodeSpec::new("people", "Person", &["id"]).with_properties(&["name"])],
        vec![RelationshipSpec::new(
            "edges",
            "KNOWS",
            EndpointSpec::new("Person", &["src"]),
            EndpointSpec::new("Person", &["dst"]),
        )],
    )
}

async fn ingest(registry: &SessionRegistry, id: &str, name: &str, records: serde_json::Value) {
    let records = records.as_array().cloned().unwrap();
    let table = Table::from_json_records(name, &records).unwrap();
    registry.ingest_table(id, table).await.unwrap();
}

async fn people_session(h: &Harness) -> String {
    let id = h.registry.create_session().await.unwrap();
    ingest(
        &h.registry,
        &id,
        "people",
        json!([{"id": 1, "name": "Ann"}, {"id": 2, "name": "Bo"}]),
    )
    .await;
    ingest(&h.registry, &id, "edges", json!([{"src": 1, "dst": 2}])).await;
    id
}

#[tokio::test]
async fn test_people_and_edges() {
    let h = harness();
    let id = people_session(&h).await;

    let result = h.builder.build(&id, people_mapping(), 1000).await.unwrap();

    assert_eq!(result.status, BuildStatus::Succeeded);
    assert_eq!(result.nodes_created, 2);
    assert_eq!(result.relationships_created, 1);
    assert_eq!(result.rows_skipped(), 0);

    let stats = h.connections.stats().await.unwrap();
    assert_eq!(stats.node_count, 2);
    assert_eq!(stats.relationship_count, 1);
    assert_eq!(stats.labels, vec!["Person".to_string()]);
    assert_eq!(stats.relationship_types, vec!["KNOWS".to_string()]);

    let session = h.registry.get_session(&id).await.unwrap();
    assert_eq!(session.status, BuildStatus::Succeeded);
    assert_eq!(session.last_result, Some(result));
}

#[tokio::test]
async fn test_null_endpoint_is_skipped() {
    let h = harness();
    let id = h.registry.create_session().await.unwrap();
    ingest(
        &h.registry,
        &id,
        "people",
        json!([{"id": 1, "name": "Ann"}, {"id": 2, "name": "Bo"}]),
    )
    .await;
    ingest(&h.registry, &id, "edges", json!([{"src": 1, "dst": null}])).await;

    let result = h.builder.build(&id, people_mapping(), 10).await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.nodes_created, 2);
    assert_eq!(result.relationships_created, 0);
    assert_eq!(result.relationship_rows_skipped, 1);
}

#[tokio::test]
async fn test_rebuild_is_idempotent() {
    let h = harness();
    let id = people_session(&h).await;

    h.builder.build(&id, people_mapping(), 1).await.unwrap();
    let second = h.builder.build(&id, people_mapping(), 1).await.unwrap();

    assert!(second.is_success());
    assert_eq!(second.nodes_created, 0);
    assert_eq!(second.nodes_merged, 2);
    assert_eq!(second.relationships_created, 0);
    assert_eq!(second.relationships_merged, 1);

    let stats = h.connections.stats().await.unwrap();
    assert_eq!(stats.node_count, 2);
    assert_eq!(stats.relationship_count, 1);
}

#[tokio::test]
async fn test_concurrent_builds_on_one_session_conflict() {
    let h = harness_with(
        SessionRegistry::in_memory(Duration::from_secs(60), 16),
        0,
        Duration::from_millis(50),
        3,
    );
    let id = people_session(&h).await;

    let (a, b) = tokio::join!(
        h.builder.build(&id, people_mapping(), 1),
        h.builder.build(&id, people_mapping(), 1)
    );

    let conflicts = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(GbsError::Conflict { .. })))
        .count();
    let successes = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Ok(result) if result.is_success()))
        .count();
    assert_eq!(conflicts, 1);
    assert_eq!(successes, 1);
}

#[tokio::test]
async fn test_builds_across_sessions_share_the_connection() {
    let h = harness();
    let first = people_session(&h).await;
    let second = people_session(&h).await;

    let builds = vec![
        h.builder.build(&first, people_mapping(), 1),
        h.builder.build(&second, people_mapping(), 1),
    ];
    let results = futures::future::join_all(builds).await;

    for result in results {
        assert!(result.unwrap().is_success());
    }
    // Same natural keys, so the second build merged into the first.
    let stats = h.connections.stats().await.unwrap();
    assert_eq!(stats.node_count, 2);
    assert_eq!(stats.relationship_count, 1);
}

#[tokio::test]
async fn test_ingest_while_building_conflicts() {
    let h = harness_with(
        SessionRegistry::in_memory(Duration::from_secs(60), 16),
        0,
        Duration::from_millis(100),
        3,
    );
    let id = people_session(&h).await;

    let builder = h.builder.clone();
    let build_id = id.clone();
    let build =
        tokio::spawn(async move { builder.build(&build_id, people_mapping(), 1).await });
    tokio::time::sleep(Duration::from_millis(30)).await;

    let table = Table::from_json_records("people", &[json!({"id": 3, "name": "Cy"})]).unwrap();
    let err = h.registry.ingest_table(&id, table).await.err().unwrap();
    assert!(matches!(err, GbsError::Conflict { .. }));

    assert!(build.await.unwrap().unwrap().is_success());
}

#[tokio::test]
async fn test_deleted_session_is_gone() {
    let h = harness();
    let id = people_session(&h).await;

    assert!(h.registry.delete_session(&id).await);
    assert!(!h.registry.delete_session(&id).await);

    let err = h.registry.get_session(&id).await.err().unwrap();
    assert!(matches!(err, GbsError::NotFound { .. }));
    let err = h.builder.build(&id, people_mapping(), 1).await.err().unwrap();
    assert!(matches!(err, GbsError::NotFound { .. }));
}

#[tokio::test]
async fn test_sweep_removes_idle_sessions() {
    let h = harness_with(SessionRegistry::in_memory(Duration::ZERO, 16), 0, Duration::ZERO, 3);
    let id = h.registry.create_session().await.unwrap();

    assert_eq!(h.registry.sweep_expired().await, 1);
    assert_eq!(h.registry.session_count().await, 0);
    assert!(h.registry.get_session(&id).await.is_err());
}

#[tokio::test]
async fn test_unknown_column_rejected_before_writing() {
    let h = harness();
    let id = people_session(&h).await;
    let mapping = MappingConfig::new(
        vec![NodeSpec::new("people", "Person", &["id"]).with_properties(&["nmae"])],
        vec![],
    );

    let err = h.builder.build(&id, mapping, 10).await.err().unwrap();

    match err {
        GbsError::InvalidMapping(violations) => {
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].rule, MappingRule::UnknownColumn);
            assert_eq!(violations[0].reference, "people.nmae");
        }
        other => panic!("expected InvalidMapping, got {:?}", other),
    }
    assert_eq!(h.executes.load(Ordering::SeqCst), 0);

    let session = h.registry.get_session(&id).await.unwrap();
    assert_eq!(session.status, BuildStatus::Failed);
    assert!(matches!(
        session.last_result.and_then(|r| r.failure),
        Some(BuildFailure::InvalidMapping { .. })
    ));
}

#[tokio::test]
async fn test_transient_write_failures_are_retried() {
    let h = harness_with(
        SessionRegistry::in_memory(Duration::from_secs(60), 16),
        2,
        Duration::ZERO,
        3,
    );
    let id = people_session(&h).await;

    let result = h.builder.build(&id, people_mapping(), 1000).await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.nodes_created, 2);
    assert_eq!(result.relationships_created, 1);
    // Two failed attempts on the first batch, then one write per step.
    assert_eq!(h.executes.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_build() {
    let h = harness_with(
        SessionRegistry::in_memory(Duration::from_secs(60), 16),
        100,
        Duration::ZERO,
        3,
    );
    let id = people_session(&h).await;

    let result = h.builder.build(&id, people_mapping(), 1000).await.unwrap();

    assert_eq!(result.status, BuildStatus::Failed);
    assert_eq!(result.batches_committed, 0);
    match &result.failure {
        Some(BuildFailure::WriteFailed {
            batch, attempts, ..
        }) => {
            assert_eq!(*batch, 0);
            assert_eq!(*attempts, 3);
        }
        other => panic!("expected WriteFailed, got {:?}", other),
    }
    assert!(result
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("transient write failure"));
    assert!(matches!(
        result.clone().into_result(),
        Err(GbsError::WriteFailed { .. })
    ));

    // The session is usable again after a failed build.
    let session = h.registry.get_session(&id).await.unwrap();
    assert_eq!(session.status, BuildStatus::Failed);
    assert!(!session.is_building());
}

#[tokio::test]
async fn test_failed_relationship_step_keeps_committed_nodes() {
    let h = harness_from(
        SessionRegistry::in_memory(Duration::from_secs(60), 16),
        0,
        Duration::ZERO,
        true,
        3,
    );
    let id = people_session(&h).await;

    let result = h.builder.build(&id, people_mapping(), 1).await.unwrap();

    assert_eq!(result.status, BuildStatus::Failed);
    assert_eq!(result.nodes_created, 2);
    assert_eq!(result.relationships_created, 0);
    assert_eq!(result.batches_committed, 2);
    assert!(matches!(
        result.failure,
        Some(BuildFailure::WriteFailed { attempts: 3, .. })
    ));

    // No rollback across batches.
    let stats = h.connections.stats().await.unwrap();
    assert_eq!(stats.node_count, 2);
    assert_eq!(stats.relationship_count, 0);

    let session = h.registry.get_session(&id).await.unwrap();
    assert_eq!(session.status, BuildStatus::Failed);
    assert_eq!(session.last_result, Some(result));
}

#[tokio::test]
async fn test_dropped_build_still_finishes() {
    let h = harness_with(
        SessionRegistry::in_memory(Duration::from_secs(60), 16),
        0,
        Duration::from_millis(200),
        3,
    );
    let id = people_session(&h).await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        h.builder.build(&id, people_mapping(), 1000),
    )
    .await;
    assert!(abandoned.is_err());

    // Two batches of 200ms each, well inside the wait.
    tokio::time::sleep(Duration::from_millis(1000)).await;

    let session = h.registry.get_session(&id).await.unwrap();
    assert!(!session.is_building());
    assert_eq!(session.status, BuildStatus::Succeeded);
    assert_eq!(session.last_result.map(|r| r.nodes_created), Some(2));

    let rebuilt = h.builder.build(&id, people_mapping(), 1000).await.unwrap();
    assert_eq!(rebuilt.nodes_merged, 2);
}

#[tokio::test]
async fn test_repeated_keys_count_once() {
    let h = harness();
    let id = h.registry.create_session().await.unwrap();
    ingest(
        &h.registry,
        &id,
        "people",
        json!([{"id": 1, "name": "Ann"}, {"id": 1, "name": "Ann"}, {"id": 2, "name": "Bo"}]),
    )
    .await;
    ingest(
        &h.registry,
        &id,
        "edges",
        json!([{"src": 1, "dst": 2}, {"src": 1, "dst": 2}]),
    )
    .await;

    let first = h.builder.build(&id, people_mapping(), 1).await.unwrap();
    let second = h.builder.build(&id, people_mapping(), 1).await.unwrap();

    assert_eq!((first.nodes_created, first.nodes_merged), (2, 0));
    assert_eq!((second.nodes_created, second.nodes_merged), (0, 2));
    assert_eq!(
        (first.relationships_created, second.relationships_merged),
        (1, 1)
    );
    assert_eq!(second.rows_skipped(), 0);
    assert_eq!(h.connections.stats().await.unwrap().node_count, 2);
}

#[tokio::test]
async fn test_sessions_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let store = SessionStore::open(dir.path()).unwrap();
        let h = harness_with(
            SessionRegistry::new(Duration::from_secs(60), 16, Some(store)),
            0,
            Duration::ZERO,
            3,
        );
        let id = people_session(&h).await;
        h.builder.build(&id, people_mapping(), 100).await.unwrap();
        id
    };

    let store = SessionStore::open(dir.path()).unwrap();
    let registry = SessionRegistry::new(Duration::from_secs(60), 16, Some(store));
    assert_eq!(registry.load_all().await.unwrap(), 1);

    let session = registry.get_session(&id).await.unwrap();
    assert_eq!(session.tables.len(), 2);
    assert_eq!(session.total_rows(), 3);
    assert_eq!(session.status, BuildStatus::Succeeded);
    assert_eq!(session.last_mapping.as_deref(), Some(&people_mapping()));
    assert_eq!(session.last_result.map(|r| r.nodes_created), Some(2));
}

#[tokio::test]
async fn test_interrupted_build_restores_as_failed() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let store = SessionStore::open(dir.path()).unwrap();
        let registry = SessionRegistry::new(Duration::from_secs(60), 16, Some(store));
        let id = registry.create_session().await.unwrap();
        registry
            .begin_build(&id, Arc::new(people_mapping()))
            .await
            .unwrap();
        id
    };

    let store = SessionStore::open(dir.path()).unwrap();
    let registry = SessionRegistry::new(Duration::from_secs(60), 16, Some(store));
    registry.load_all().await.unwrap();

    let session = registry.get_session(&id).await.unwrap();
    assert_eq!(session.status, BuildStatus::Failed);
    assert_eq!(
        session.last_result.and_then(|r| r.error).as_deref(),
        Some(INTERRUPTED)
    );
}
