//! Batch execution half of the materializer: writes every batch of a plan
//! through the connection manager, retrying failed batches with backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use gbs_core::{BatchIter, BatchOutcome, CompiledPlan, GbsError, PlanStep, Tables, WriteBatch};

use super::result::{BuildFailure, BuildResult};
use crate::graph::ConnectionManager;

/// Retry budget for a single write batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per batch, including the first.
    pub attempts: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
            max_backoff,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_millis(5000))
    }
}

/// Executes compiled plans against the graph.
pub struct Materializer {
    connections: Arc<ConnectionManager>,
    retry: RetryPolicy,
}

impl Materializer {
    pub fn new(connections: Arc<ConnectionManager>, retry: RetryPolicy) -> Self {
        Self { connections, retry }
    }

    /// Run every step of `plan` over `tables` in plan order.
    ///
    /// Never returns an error: a batch that exhausts its retries ends the
    /// build with status `failed`. Batches committed before the failure
    /// stay in the graph.
    pub async fn execute(&self, plan: &CompiledPlan, tables: &Tables, batch_size: usize) -> BuildResult {
        let started = Instant::now();
        let mut result = BuildResult::begin();

        for step in plan.steps() {
            if let Err(failure) = self.run_step(step, tables, batch_size, &mut result).await {
                result.fail(failure, started.elapsed());
                return result;
            }
        }

        result.succeed(started.elapsed());
        result
    }

    async fn run_step(
        &self,
        step: &PlanStep,
        tables: &Tables,
        batch_size: usize,
        result: &mut BuildResult,
    ) -> Result<(), BuildFailure> {
        let mut batches = BatchIter::new(step, tables, batch_size).map_err(|e| match e {
            GbsError::InvalidMapping(violations) => BuildFailure::InvalidMapping { violations },
            other => BuildFailure::Interrupted {
                message: other.to_string(),
            },
        })?;

        let mut outcome = Ok(());
        for (index, batch) in batches.by_ref().enumerate() {
            match self.write(step, index, batch).await {
                Ok(written) => match step {
                    PlanStep::Node(_) => result.record_nodes(written),
                    PlanStep::Relationship(_) => result.record_relationships(written),
                },
                Err(failure) => {
                    outcome = Err(failure);
                    break;
                }
            }
        }

        match step {
            PlanStep::Node(_) => result.node_rows_skipped += batches.skipped(),
            PlanStep::Relationship(_) => result.relationship_rows_skipped += batches.skipped(),
        }
        info!(
            "{}: {} rows read, {} skipped, {} folded into repeated keys",
            step.describe(),
            batches.rows_read(),
            batches.skipped(),
            batches.folded()
        );
        outcome
    }

    /// Write one batch, retrying per the policy.
    async fn write(
        &self,
        step: &PlanStep,
        index: usize,
        batch: WriteBatch,
    ) -> Result<BatchOutcome, BuildFailure> {
        let batch = Arc::new(batch);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let message = match self.connections.acquire().await {
                Ok(handle) => match self.connections.execute(&handle, batch.clone()).await {
                    Ok(outcome) => {
                        debug!(
                            "{} batch {}: {} created, {} merged, {} unresolved",
                            step.describe(),
                            index,
                            outcome.created,
                            outcome.merged,
                            outcome.unresolved
                        );
                        return Ok(outcome);
                    }
                    Err(e) => e.to_string(),
                },
                Err(e) => e.to_string(),
            };

            if attempt >= self.retry.attempts {
                error!(
                    "{} batch {} failed after {} attempts: {}",
                    step.describe(),
                    index,
                    attempt,
                    message
                );
                return Err(BuildFailure::WriteFailed {
                    step: step.describe(),
                    batch: index,
                    attempts: attempt,
                    message,
                });
            }

            let delay = self.retry.delay(attempt);
            warn!(
                "{} batch {} failed (attempt {}/{}), retrying in {:?}: {}",
                step.describe(),
                index,
                attempt,
                self.retry.attempts,
                delay,
                message
            );
            tokio::time::sleep(delay).await;
        }
    }
}
