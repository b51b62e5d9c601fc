//! Session registry: lifecycle, persistence and expiry of sessions.

use chrono::Utc;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use gbs_core::{GbsError, MappingConfig, Result, Table, TableSummary, Tables};

use super::model::{Session, SessionInfo};
use super::store::SessionStore;
use crate::build::{BuildFailure, BuildResult, BuildStatus};

/// Error recorded on a build that was running when the process stopped.
pub const INTERRUPTED: &str = "build interrupted by restart";

/// Sole owner of every session.
///
/// The session map is locked per operation and never across a build.
/// Mutations are written through to the store when one is configured;
/// failures there are logged rather than returned.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    store: Option<SessionStore>,
    /// Serializes write-through so the newest snapshot always lands last.
    persist_lock: Mutex<()>,
    ttl: Duration,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(ttl: Duration, max_sessions: usize, store: Option<SessionStore>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            persist_lock: Mutex::new(()),
            ttl,
            max_sessions,
        }
    }

    /// Registry without a session store; nothing survives the process.
    pub fn in_memory(ttl: Duration, max_sessions: usize) -> Self {
        Self::new(ttl, max_sessions, None)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of sessions currently in memory.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Allocate a new empty session.
    pub async fn create_session(&self) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        {
            let mut sessions = self.sessions.write().await;
            self.check_capacity(&sessions)?;
            sessions.insert(id.clone(), Session::new(id.clone()));
        }

        info!("Created session {}", id);
        self.sync(&id).await;
        Ok(id)
    }

    /// Look up a session and mark it accessed.
    ///
    /// Sessions not in memory are loaded from the store.
    pub async fn get_session(&self, id: &str) -> Result<Session> {
        let expired = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(id).map(|s| s.is_expired(Utc::now(), self.ttl)) {
                Some(false) => {
                    if let Some(session) = sessions.get_mut(id) {
                        session.touch();
                        return Ok(session.clone());
                    }
                    false
                }
                Some(true) => sessions.remove(id).is_some(),
                None => false,
            }
        };
        if !expired {
            return self.load(id).await;
        }

        info!("Session {} expired", id);
        self.sync(id).await;
        Err(GbsError::not_found(id))
    }

    /// Update the last-access timestamp.
    pub async fn touch(&self, id: &str) -> Result<()> {
        self.get_session(id).await.map(|_| ())
    }

    /// Summary of one session.
    pub async fn info(&self, id: &str) -> Result<SessionInfo> {
        Ok(self.get_session(id).await?.info(self.ttl))
    }

    /// Summaries of every live session, oldest first.
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let now = Utc::now();
        let sessions = self.sessions.read().await;
        let mut infos: Vec<SessionInfo> = sessions
            .values()
            .filter(|s| !s.is_expired(now, self.ttl))
            .map(|s| s.info(self.ttl))
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    /// Remove a session from memory and from the store.
    ///
    /// Idempotent; returns whether the session was in memory.
    pub async fn delete_session(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            info!("Deleted session {}", id);
        }
        self.sync(id).await;
        removed
    }

    /// Write a session to the store now.
    pub async fn persist(&self, id: &str) -> Result<()> {
        if !self.sessions.read().await.contains_key(id) {
            return Err(GbsError::not_found(id));
        }
        self.write_through(id).await
    }

    /// Load a persisted session into memory and mark it accessed.
    ///
    /// Missing, expired or undecodable blobs surface as `NotFound`; the
    /// latter two are removed from the store. A loaded session counts
    /// against the session limit like a created one.
    pub async fn load(&self, id: &str) -> Result<Session> {
        let (session, repaired) = self.restore(id).await?;

        let session = {
            let mut sessions = self.sessions.write().await;
            if !sessions.contains_key(id) {
                self.check_capacity(&sessions)?;
            }
            let entry = sessions.entry(id.to_string()).or_insert(session);
            entry.touch();
            entry.clone()
        };
        if repaired {
            self.sync(id).await;
        }
        Ok(session)
    }

    /// Restore every persisted session; returns how many were restored.
    pub async fn load_all(&self) -> Result<usize> {
        let Some(store) = self.store.clone() else {
            return Ok(0);
        };
        let ids = blocking(move || store.ids()).await?;

        let mut restored = 0;
        for id in ids {
            if self.sessions.read().await.contains_key(&id) {
                continue;
            }
            if let Ok((session, repaired)) = self.restore(&id).await {
                {
                    let mut sessions = self.sessions.write().await;
                    if self.check_capacity(&sessions).is_err() {
                        // Blob stays on disk and can be loaded once room frees up.
                        continue;
                    }
                    sessions.entry(id.clone()).or_insert(session);
                }
                if repaired {
                    self.sync(&id).await;
                }
                restored += 1;
            }
        }

        info!("Restored {} sessions", restored);
        Ok(restored)
    }

    /// Read, validate and repair one blob. Does not touch the map.
    ///
    /// The flag tells whether an interrupted build had to be repaired.
    async fn restore(&self, id: &str) -> Result<(Session, bool)> {
        let Some(store) = self.store.clone() else {
            return Err(GbsError::not_found(id));
        };

        let key = id.to_string();
        let loaded = blocking(move || store.load(&key)).await;
        let mut session = match loaded {
            Ok(Some(session)) if session.id == id => session,
            Ok(Some(session)) => {
                warn!("Session blob {} holds session {}, ignoring", id, session.id);
                return Err(GbsError::not_found(id));
            }
            Ok(None) => return Err(GbsError::not_found(id)),
            Err(GbsError::Serialization(e)) => {
                warn!("Dropping undecodable session {}: {}", id, e);
                self.remove_persisted(id).await;
                return Err(GbsError::not_found(id));
            }
            Err(e) => {
                error!("Failed to read session {}: {}", id, e);
                return Err(GbsError::not_found(id));
            }
        };

        let repaired = recover_interrupted(&mut session);
        if repaired {
            warn!("Session {} was building at shutdown, marked failed", id);
        }
        if session.is_expired(Utc::now(), self.ttl) {
            info!("Dropping expired session {}", id);
            self.remove_persisted(id).await;
            return Err(GbsError::not_found(id));
        }

        debug!("Loaded session {} ({} tables)", id, session.tables.len());
        Ok((session, repaired))
    }

    /// Delete every idle session whose time-to-live has elapsed.
    ///
    /// Sessions that are building are never swept.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<String> = sessions
                .values()
                .filter(|s| s.is_expired(now, self.ttl))
                .map(|s| s.id.clone())
                .collect();
            for id in &ids {
                sessions.remove(id);
            }
            ids
        };

        for id in &expired {
            info!("Session {} expired", id);
            self.sync(id).await;
        }
        expired.len()
    }

    /// Replace (or add) one table of a session.
    ///
    /// Rejected while the session is building, and when a table of the
    /// same name already exists with different columns or types.
    pub async fn ingest_table(&self, id: &str, table: Table) -> Result<TableSummary> {
        self.get_session(id).await?;

        let summary = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(id)
                .ok_or_else(|| GbsError::not_found(id))?;

            if session.is_building() {
                return Err(GbsError::conflict(id, "cannot ingest while a build is running"));
            }
            if let Some(existing) = session.tables.get(table.name()) {
                if let Some(message) = existing.schema_difference(&table) {
                    return Err(GbsError::SchemaChanged {
                        table: table.name().to_string(),
                        message,
                    });
                }
            }

            let summary = table.summary();
            Arc::make_mut(&mut session.tables).insert(table.name().to_string(), table);
            session.touch();
            summary
        };

        info!(
            "Ingested table {} into session {} ({} rows)",
            summary.table_name, id, summary.total_rows
        );
        self.sync(id).await;
        Ok(summary)
    }

    /// Flip a session to `building` and hand out a read-only snapshot of
    /// its tables.
    ///
    /// Fails with `Conflict` if a build is already running.
    pub async fn begin_build(&self, id: &str, mapping: Arc<MappingConfig>) -> Result<Arc<Tables>> {
        self.get_session(id).await?;

        let tables = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(id)
                .ok_or_else(|| GbsError::not_found(id))?;

            if session.is_building() {
                return Err(GbsError::conflict(id, "a build is already running"));
            }
            session.status = BuildStatus::Building;
            session.last_mapping = Some(mapping);
            session.last_result = Some(BuildResult::begin());
            session.touch();
            session.tables.clone()
        };

        self.sync(id).await;
        Ok(tables)
    }

    /// Record the outcome of a build and release the session.
    pub async fn finish_build(&self, id: &str, result: BuildResult) -> Result<()> {
        {
            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions.get_mut(id) else {
                warn!("Session {} was removed during its build", id);
                return Err(GbsError::not_found(id));
            };
            session.status = result.status;
            session.last_result = Some(result);
            session.touch();
        }

        self.sync(id).await;
        Ok(())
    }

    /// `ResourceExhausted` if no further live session fits.
    fn check_capacity(&self, sessions: &HashMap<String, Session>) -> Result<()> {
        let now = Utc::now();
        let live = sessions
            .values()
            .filter(|s| !s.is_expired(now, self.ttl))
            .count();
        if live >= self.max_sessions {
            warn!("Session limit reached ({})", self.max_sessions);
            return Err(GbsError::ResourceExhausted {
                resource: "sessions".to_string(),
                limit: self.max_sessions,
            });
        }
        Ok(())
    }

    /// Write-through that logs instead of failing.
    async fn sync(&self, id: &str) {
        if let Err(e) = self.write_through(id).await {
            error!("Failed to persist session {}: {}", id, e);
        }
    }

    /// Save the current in-memory state of `id`, or remove its blob if the
    /// session is gone.
    async fn write_through(&self, id: &str) -> Result<()> {
        let Some(store) = self.store.clone() else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;

        let snapshot = self.sessions.read().await.get(id).cloned();
        let key = id.to_string();
        blocking(move || match snapshot {
            Some(session) => store.save(&session),
            None => store.remove(&key),
        })
        .await
    }

    async fn remove_persisted(&self, id: &str) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let key = id.to_string();
        if let Err(e) = blocking(move || store.remove(&key)).await {
            error!("Failed to remove persisted session {}: {}", id, e);
        }
    }
}

/// Mark a session persisted mid-build as failed.
fn recover_interrupted(session: &mut Session) -> bool {
    if !session.is_building() {
        return false;
    }
    let mut result = session.last_result.take().unwrap_or_else(BuildResult::begin);
    let elapsed = (Utc::now() - result.started_at).to_std().unwrap_or_default();
    result.fail(
        BuildFailure::Interrupted {
            message: INTERRUPTED.to_string(),
        },
        elapsed,
    );
    session.status = BuildStatus::Failed;
    session.last_result = Some(result);
    true
}

/// Run blocking store I/O off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| GbsError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use tokio_test::{assert_err, assert_ok};

    const HOUR: Duration = Duration::from_secs(3600);

    fn people(records: &[serde_json::Value]) -> Table {
        Table::from_json_records("people", records).unwrap()
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let registry = SessionRegistry::in_memory(HOUR, 4);
        let id = registry.create_session().await.unwrap();

        let session = registry.get_session(&id).await.unwrap();
        assert_eq!(session.status, BuildStatus::Idle);
        assert!(session.tables.is_empty());

        assert!(registry.delete_session(&id).await);
        assert!(!registry.delete_session(&id).await);
        assert!(matches!(
            registry.get_session(&id).await,
            Err(GbsError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_session_limit() {
        let registry = SessionRegistry::in_memory(HOUR, 2);
        registry.create_session().await.unwrap();
        registry.create_session().await.unwrap();

        let err = registry.create_session().await.unwrap_err();
        assert!(matches!(err, GbsError::ResourceExhausted { limit: 2, .. }));
    }

    #[tokio::test]
    async fn test_touch_moves_last_access() {
        let registry = SessionRegistry::in_memory(HOUR, 4);
        let id = registry.create_session().await.unwrap();
        let before = registry.get_session(&id).await.unwrap().last_access;

        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.touch(&id).await.unwrap();

        let after = registry.get_session(&id).await.unwrap().last_access;
        assert!(after > before);
        assert!(registry.touch("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_ingest_replaces_rows_and_keeps_schema() {
        let registry = SessionRegistry::in_memory(HOUR, 4);
        let id = registry.create_session().await.unwrap();

        registry
            .ingest_table(&id, people(&[json!({"id": 1}), json!({"id": 2})]))
            .await
            .unwrap();
        let summary = registry
            .ingest_table(&id, people(&[json!({"id": 3})]))
            .await
            .unwrap();
        assert_eq!(summary.total_rows, 1);

        let session = registry.get_session(&id).await.unwrap();
        assert_eq!(session.tables["people"].row_count(), 1);

        let err = registry
            .ingest_table(&id, people(&[json!({"id": "x"})]))
            .await
            .unwrap_err();
        assert!(matches!(err, GbsError::SchemaChanged { .. }));
    }

    #[tokio::test]
    async fn test_build_status_transitions() {
        let registry = SessionRegistry::in_memory(HOUR, 4);
        let id = registry.create_session().await.unwrap();
        let mapping = Arc::new(MappingConfig::default());

        registry.begin_build(&id, mapping.clone()).await.unwrap();
        assert!(matches!(
            registry.begin_build(&id, mapping.clone()).await,
            Err(GbsError::Conflict { .. })
        ));
        assert!(matches!(
            registry.ingest_table(&id, people(&[json!({"id": 1})])).await,
            Err(GbsError::Conflict { .. })
        ));

        let mut result = BuildResult::begin();
        result.succeed(Duration::ZERO);
        registry.finish_build(&id, result).await.unwrap();

        let session = registry.get_session(&id).await.unwrap();
        assert_eq!(session.status, BuildStatus::Succeeded);
        assert!(session.last_mapping.is_some());
        assert!(session.last_result.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_sweep_spares_building_sessions() {
        let registry = SessionRegistry::in_memory(Duration::ZERO, 4);
        let idle = registry.create_session().await.unwrap();
        let busy = registry.create_session().await.unwrap();

        // Mark `busy` as building directly: with a zero ttl every lookup
        // would already see it expired.
        registry
            .sessions
            .write()
            .await
            .get_mut(&busy)
            .unwrap()
            .status = BuildStatus::Building;

        assert_eq!(registry.sweep_expired().await, 1);
        assert_eq!(registry.session_count().await, 1);
        assert!(registry.sessions.read().await.contains_key(&busy));
        assert!(matches!(
            registry.get_session(&idle).await,
            Err(GbsError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();

        let id = {
            let registry = SessionRegistry::new(HOUR, 4, Some(store.clone()));
            let id = registry.create_session().await.unwrap();
            registry
                .ingest_table(&id, people(&[json!({"id": 1, "name": "Ann"})]))
                .await
                .unwrap();
            registry.persist(&id).await.unwrap();
            id
        };

        let registry = SessionRegistry::new(HOUR, 4, Some(store.clone()));
        assert_eq!(registry.load_all().await.unwrap(), 1);
        let session = registry.get_session(&id).await.unwrap();
        assert_eq!(session.tables["people"].row_count(), 1);

        registry.delete_session(&id).await;
        assert!(store.load(&id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_session_falls_back_to_store() {
        let dir = tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        store.save(&Session::new("persisted-only")).unwrap();

        let registry = SessionRegistry::new(HOUR, 4, Some(store));
        assert_eq!(registry.session_count().await, 0);
        registry.get_session("persisted-only").await.unwrap();
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_loading_respects_session_limit() {
        let dir = tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        for id in ["a", "b", "c"] {
            store.save(&Session::new(id)).unwrap();
        }

        let registry = SessionRegistry::new(HOUR, 2, Some(store.clone()));
        assert_eq!(registry.load_all().await.unwrap(), 2);
        assert_eq!(registry.session_count().await, 2);

        // "c" stays on disk but does not fit.
        let err = registry.get_session("c").await.unwrap_err();
        assert!(matches!(err, GbsError::ResourceExhausted { limit: 2, .. }));
        assert_eq!(registry.session_count().await, 2);
        assert!(store.load("c").unwrap().is_some());

        registry.delete_session("a").await;
        registry.get_session("c").await.unwrap();
        assert_eq!(registry.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_short_row_blob_is_dropped_on_load() {
        let dir = tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let mut session = Session::new("s1");
        Arc::make_mut(&mut session.tables)
            .insert("people".to_string(), people(&[json!({"id": 1, "name": "Ann"})]));
        store.save(&session).unwrap();

        let path = dir.path().join("s1.json");
        let mut blob: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        blob["tables"]["people"]["rows"][0] = json!([{"type": "integer", "value": 1}]);
        std::fs::write(&path, serde_json::to_vec(&blob).unwrap()).unwrap();

        let registry = SessionRegistry::new(HOUR, 4, Some(store.clone()));
        assert_eq!(registry.load_all().await.unwrap(), 0);
        assert!(matches!(
            registry.get_session("s1").await,
            Err(GbsError::NotFound { .. })
        ));
        assert!(store.ids().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_build_restored_as_failed() {
        let dir = tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let mut session = Session::new("s1");
        session.status = BuildStatus::Building;
        session.last_result = Some(BuildResult::begin());
        store.save(&session).unwrap();

        let registry = SessionRegistry::new(HOUR, 4, Some(store));
        registry.load_all().await.unwrap();

        let session = registry.get_session("s1").await.unwrap();
        assert_eq!(session.status, BuildStatus::Failed);
        let result = session.last_result.unwrap();
        assert_eq!(result.error.as_deref().map(|e| e.contains(INTERRUPTED)), Some(true));
    }

    #[test]
    fn test_undecodable_and_expired_blobs_are_dropped() {
        tokio_test::block_on(async {
            let dir = tempdir().unwrap();
            let store = SessionStore::open(dir.path()).unwrap();
            std::fs::write(dir.path().join("broken.json"), b"{").unwrap();
            store.save(&Session::new("old")).unwrap();

            let registry = SessionRegistry::new(Duration::ZERO, 4, Some(store.clone()));
            assert_eq!(assert_ok!(registry.load_all().await), 0);
            assert_err!(registry.get_session("broken").await);

            assert!(store.ids().unwrap().is_empty());
        });
    }
}
