//! Graph build orchestrator.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use gbs_core::{compile, validate, GbsError, MappingConfig, MappingViolation, Result};

use super::materializer::{Materializer, RetryPolicy};
use super::result::{BuildFailure, BuildResult};
use crate::graph::ConnectionManager;
use crate::session::SessionRegistry;

/// Runs builds: at most one per session, any number across sessions.
#[derive(Clone)]
pub struct GraphBuilder {
    registry: Arc<SessionRegistry>,
    materializer: Arc<Materializer>,
}

impl GraphBuilder {
    pub fn new(
        registry: Arc<SessionRegistry>,
        connections: Arc<ConnectionManager>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            materializer: Arc::new(Materializer::new(connections, retry)),
        }
    }

    /// Build the graph for `session_id` under `mapping`.
    ///
    /// Fails with `Conflict` if the session is already building and with
    /// `InvalidMapping` if the mapping does not compile; both happen before
    /// any write. Write failures do not produce an error: the returned
    /// result has status `failed`. Either way the outcome is recorded on
    /// the session.
    ///
    /// The build runs on its own task and finishes even if the returned
    /// future is dropped.
    pub async fn build(
        &self,
        session_id: &str,
        mapping: MappingConfig,
        batch_size: usize,
    ) -> Result<BuildResult> {
        let builder = self.clone();
        let id = session_id.to_string();
        let task = tokio::spawn(async move { builder.run(&id, mapping, batch_size).await });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Build task for session {} died: {}", session_id, e);
                let mut result = BuildResult::begin();
                result.fail(
                    BuildFailure::Interrupted {
                        message: format!("build task failed: {}", e),
                    },
                    Duration::ZERO,
                );
                self.record(session_id, result.clone()).await;
                Ok(result)
            }
        }
    }

    async fn run(
        &self,
        session_id: &str,
        mapping: MappingConfig,
        batch_size: usize,
    ) -> Result<BuildResult> {
        let batch_size = batch_size.max(1);
        let mapping = Arc::new(mapping);
        let tables = self.registry.begin_build(session_id, mapping.clone()).await?;
        let started = Instant::now();

        info!(
            "Build started for session {} ({} node specs, {} relationship specs, batch size {})",
            session_id,
            mapping.nodes.len(),
            mapping.relationships.len(),
            batch_size
        );

        let plan = match compile(&tables, &mapping) {
            Ok(plan) => plan,
            Err(e) => {
                let failure = match &e {
                    GbsError::InvalidMapping(violations) => BuildFailure::InvalidMapping {
                        violations: violations.clone(),
                    },
                    other => BuildFailure::Interrupted {
                        message: other.to_string(),
                    },
                };
                let mut result = BuildResult::begin();
                result.fail(failure, started.elapsed());
                warn!("Build for session {} rejected: {}", session_id, e);
                self.record(session_id, result).await;
                return Err(e);
            }
        };

        let result = self.materializer.execute(&plan, &tables, batch_size).await;
        info!(
            "Build {} for session {}: {} nodes created, {} merged; {} relationships created, {} merged; {} rows skipped in {}ms",
            result.status,
            session_id,
            result.nodes_created,
            result.nodes_merged,
            result.relationships_created,
            result.relationships_merged,
            result.rows_skipped(),
            result.duration_ms
        );

        self.record(session_id, result.clone()).await;
        Ok(result)
    }

    /// Check `mapping` against the session's tables without building.
    pub async fn validate(
        &self,
        session_id: &str,
        mapping: &MappingConfig,
    ) -> Result<Vec<MappingViolation>> {
        let session = self.registry.get_session(session_id).await?;
        Ok(validate(&session.tables, mapping))
    }

    async fn record(&self, session_id: &str, result: BuildResult) {
        if let Err(e) = self.registry.finish_build(session_id, result).await {
            warn!("Could not record build result for {}: {}", session_id, e);
        }
    }
}
