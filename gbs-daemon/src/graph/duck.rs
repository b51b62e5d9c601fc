//! DuckDB-backed property graph.

use duckdb::{params, Connection, ToSql};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use gbs_core::{BatchOutcome, NodeWrite, Properties, RelationshipWrite, WriteBatch};

use super::driver::{DriverError, DriverFactory, DriverResult, GraphDriver, GraphStats};
use super::schema::{
    INSERT_NODE, INSERT_RELATIONSHIP, SCHEMA_SQL, SCHEMA_VERSION, SELECT_NODE,
    SELECT_RELATIONSHIP, UPDATE_NODE, UPDATE_RELATIONSHIP,
};

/// Database name DuckDB uses for a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

impl From<duckdb::Error> for DriverError {
    fn from(e: duckdb::Error) -> Self {
        DriverError::Statement(e.to_string())
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(e: serde_json::Error) -> Self {
        DriverError::Statement(format!("invalid properties: {}", e))
    }
}

/// One connection to a DuckDB property graph.
pub struct DuckGraph {
    conn: Mutex<Connection>,
}

impl DuckGraph {
    fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Acquire the connection lock, recovering from a poisoned mutex.
    fn acquire_conn(&self) -> MutexGuard<'_, Connection> {
        lock_recovering(&self.conn)
    }
}

impl GraphDriver for DuckGraph {
    fn verify(&self) -> DriverResult<()> {
        let conn = self.acquire_conn();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i32>(0))
            .map(|_| ())
            .map_err(|e| DriverError::Connection(e.to_string()))
    }

    fn execute(&self, batch: &WriteBatch) -> DriverResult<BatchOutcome> {
        let mut conn = self.acquire_conn();
        let tx = conn.transaction()?;

        let outcome = match batch {
            WriteBatch::Nodes { label, items } => merge_nodes(&tx, label, items)?,
            WriteBatch::Relationships {
                rel_type,
                source_label,
                target_label,
                items,
            } => merge_relationships(&tx, rel_type, source_label, target_label, items)?,
        };

        // Dropping an uncommitted transaction rolls it back, so any `?`
        // above leaves the batch invisible.
        tx.commit()?;
        Ok(outcome)
    }

    fn stats(&self) -> DriverResult<GraphStats> {
        let conn = self.acquire_conn();

        let node_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM graph_nodes", [], |row| row.get(0))?;
        let relationship_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM graph_relationships", [], |row| row.get(0))?;

        Ok(GraphStats {
            node_count: node_count as usize,
            relationship_count: relationship_count as usize,
            labels: distinct(&conn, "SELECT DISTINCT label FROM graph_nodes ORDER BY label")?,
            relationship_types: distinct(
                &conn,
                "SELECT DISTINCT rel_type FROM graph_relationships ORDER BY rel_type",
            )?,
        })
    }
}

fn merge_nodes(conn: &Connection, label: &str, items: &[NodeWrite]) -> DriverResult<BatchOutcome> {
    let mut outcome = BatchOutcome::default();

    for item in items {
        match fetch_properties(conn, SELECT_NODE, params![label, item.key])? {
            Some(mut existing) => {
                existing.extend(item.properties.clone());
                let encoded = serde_json::to_string(&existing)?;
                conn.execute(UPDATE_NODE, params![encoded, label, item.key])?;
                outcome.merged += 1;
            }
            None => {
                let encoded = serde_json::to_string(&item.properties)?;
                conn.execute(INSERT_NODE, params![label, item.key, encoded])?;
                outcome.created += 1;
            }
        }
    }

    Ok(outcome)
}

fn merge_relationships(
    conn: &Connection,
    rel_type: &str,
    source_label: &str,
    target_label: &str,
    items: &[RelationshipWrite],
) -> DriverResult<BatchOutcome> {
    let mut outcome = BatchOutcome::default();

    for item in items {
        let source = fetch_properties(conn, SELECT_NODE, params![source_label, item.source_key])?;
        let target = fetch_properties(conn, SELECT_NODE, params![target_label, item.target_key])?;
        if source.is_none() || target.is_none() {
            outcome.unresolved += 1;
            continue;
        }

        let existing = fetch_properties(
            conn,
            SELECT_RELATIONSHIP,
            params![
                rel_type,
                source_label,
                item.source_key,
                target_label,
                item.target_key
            ],
        )?;
        match existing {
            Some(mut existing) => {
                existing.extend(item.properties.clone());
                let encoded = serde_json::to_string(&existing)?;
                conn.execute(
                    UPDATE_RELATIONSHIP,
                    params![
                        encoded,
                        rel_type,
                        source_label,
                        item.source_key,
                        target_label,
                        item.target_key
                    ],
                )?;
                outcome.merged += 1;
            }
            None => {
                let encoded = serde_json::to_string(&item.properties)?;
                conn.execute(
                    INSERT_RELATIONSHIP,
                    params![
                        rel_type,
                        source_label,
                        item.source_key,
                        target_label,
                        item.target_key,
                        encoded
                    ],
                )?;
                outcome.created += 1;
            }
        }
    }

    Ok(outcome)
}

/// Properties of the first row matched by `sql`, if any.
fn fetch_properties(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> DriverResult<Option<Properties>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;

    if let Some(row) = rows.next()? {
        let text: String = row.get(0)?;
        return Ok(Some(serde_json::from_str(&text)?));
    }
    Ok(None)
}

fn distinct(conn: &Connection, sql: &str) -> DriverResult<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let mut values = Vec::new();
    while let Some(row) = rows.next()? {
        values.push(row.get(0)?);
    }
    Ok(values)
}

fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Recovering from poisoned database mutex");
            poisoned.into_inner()
        }
    }
}

/// Open a database and make sure the graph schema exists.
fn open_database(database: &str) -> DriverResult<Connection> {
    let conn = if database == IN_MEMORY {
        Connection::open_in_memory()
    } else {
        if let Some(parent) = Path::new(database).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DriverError::Connection(format!("cannot create {:?}: {}", parent, e))
                })?;
            }
        }
        Connection::open(database)
    }
    .map_err(|e| DriverError::Connection(format!("cannot open {}: {}", database, e)))?;

    conn.execute_batch(SCHEMA_SQL)
        .map_err(|e| DriverError::Connection(format!("cannot initialize schema: {}", e)))?;
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?)",
        params![SCHEMA_VERSION],
    )?;

    Ok(conn)
}

/// Hands out [`DuckGraph`] connections to one database.
///
/// The first successful connect opens the database and keeps that
/// connection as the root; later connects clone it, so an in-memory graph
/// survives reconnects for the lifetime of the factory.
pub struct DuckGraphFactory {
    database: String,
    root: Mutex<Option<Connection>>,
}

impl DuckGraphFactory {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            root: Mutex::new(None),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY)
    }
}

impl DriverFactory for DuckGraphFactory {
    fn connect(&self) -> DriverResult<Arc<dyn GraphDriver>> {
        let mut root = lock_recovering(&self.root);

        let conn = match root.as_ref() {
            Some(conn) => conn.try_clone(),
            None => {
                let conn = open_database(&self.database)?;
                let clone = conn.try_clone();
                *root = Some(conn);
                clone
            }
        }
        .map_err(|e| DriverError::Connection(e.to_string()))?;

        Ok(Arc::new(DuckGraph::new(conn)))
    }

    fn target(&self) -> String {
        self.database.clone()
    }
}
