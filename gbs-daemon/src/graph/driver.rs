//! Driver boundary between the connection manager and a graph database.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use gbs_core::{BatchOutcome, WriteBatch};

/// Errors reported by a graph driver.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The connection itself is broken or could not be opened.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A statement failed (constraint violation, bad data, ...).
    #[error("Statement error: {0}")]
    Statement(String),
}

impl DriverError {
    /// Whether the driver should be discarded and reopened.
    pub fn is_connection(&self) -> bool {
        matches!(self, DriverError::Connection(_))
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Summary of what the graph currently holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub relationship_count: usize,
    pub labels: Vec<String>,
    pub relationship_types: Vec<String>,
}

/// A live connection to a graph database.
///
/// Calls are blocking; the connection manager runs them on tokio's blocking
/// pool. Implementations must be safe to share between concurrent builds.
pub trait GraphDriver: Send + Sync {
    /// Cheap liveness probe.
    fn verify(&self) -> DriverResult<()>;

    /// Apply one batch in a single transaction.
    ///
    /// Nodes are merged by `(label, key)`. Relationships are merged by
    /// `(type, source, target)` and only written when both endpoint nodes
    /// exist; the rest are reported as `unresolved`. On error nothing from
    /// the batch may remain visible.
    fn execute(&self, batch: &WriteBatch) -> DriverResult<BatchOutcome>;

    /// Counts, labels and relationship types.
    fn stats(&self) -> DriverResult<GraphStats>;
}

/// Opens driver connections.
pub trait DriverFactory: Send + Sync {
    fn connect(&self) -> DriverResult<Arc<dyn GraphDriver>>;

    /// Where connections go, for logs.
    fn target(&self) -> String;
}
