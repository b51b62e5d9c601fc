//! Shared application state for the server.

use std::sync::Arc;
use std::time::Instant;

use crate::build::GraphBuilder;
use crate::graph::ConnectionManager;
use crate::session::SessionRegistry;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Every live session
    pub registry: Arc<SessionRegistry>,
    /// Runs builds against the shared graph connection
    pub builder: Arc<GraphBuilder>,
    /// Process-wide graph connection
    pub connections: Arc<ConnectionManager>,
    /// Batch size used when a build request does not name one
    pub default_batch_size: usize,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        registry: Arc<SessionRegistry>,
        builder: Arc<GraphBuilder>,
        connections: Arc<ConnectionManager>,
        default_batch_size: usize,
    ) -> Self {
        Self {
            registry,
            builder,
            connections,
            default_batch_size,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}
