//! Build status and per-build results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use gbs_core::{BatchOutcome, GbsError, MappingViolation, Result};

/// Build state of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    #[default]
    Idle,
    Building,
    Succeeded,
    Failed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Idle => "idle",
            BuildStatus::Building => "building",
            BuildStatus::Succeeded => "succeeded",
            BuildStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a build ended in `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildFailure {
    /// The mapping did not compile; nothing was written.
    InvalidMapping { violations: Vec<MappingViolation> },
    /// A batch kept failing after its retry budget.
    WriteFailed {
        step: String,
        batch: usize,
        attempts: u32,
        message: String,
    },
    /// The process stopped while the build was running.
    Interrupted { message: String },
}

impl BuildFailure {
    /// Text recorded as the build's error.
    pub fn message(&self) -> String {
        match self {
            BuildFailure::Interrupted { message } => message.clone(),
            other => other.to_error().to_string(),
        }
    }

    /// Error form of the failure.
    pub fn to_error(&self) -> GbsError {
        match self.clone() {
            BuildFailure::InvalidMapping { violations } => GbsError::InvalidMapping(violations),
            BuildFailure::WriteFailed {
                step,
                batch,
                attempts,
                message,
            } => GbsError::WriteFailed {
                step,
                batch,
                attempts,
                message,
            },
            BuildFailure::Interrupted { message } => GbsError::Unavailable { message },
        }
    }
}

/// Record of one build, retained on the session until the next build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    pub status: BuildStatus,
    pub nodes_created: usize,
    pub nodes_merged: usize,
    pub relationships_created: usize,
    pub relationships_merged: usize,
    /// Node rows whose natural key contained a null.
    pub node_rows_skipped: usize,
    /// Relationship rows with a null endpoint key or a missing endpoint node.
    pub relationship_rows_skipped: usize,
    pub batches_committed: usize,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<BuildFailure>,
}

impl BuildResult {
    /// A fresh result for a build starting now.
    pub fn begin() -> Self {
        Self {
            status: BuildStatus::Building,
            nodes_created: 0,
            nodes_merged: 0,
            relationships_created: 0,
            relationships_merged: 0,
            node_rows_skipped: 0,
            relationship_rows_skipped: 0,
            batches_committed: 0,
            duration_ms: 0,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
            failure: None,
        }
    }

    pub(crate) fn record_nodes(&mut self, outcome: BatchOutcome) {
        self.nodes_created += outcome.created;
        self.nodes_merged += outcome.merged;
        self.batches_committed += 1;
    }

    pub(crate) fn record_relationships(&mut self, outcome: BatchOutcome) {
        self.relationships_created += outcome.created;
        self.relationships_merged += outcome.merged;
        self.relationship_rows_skipped += outcome.unresolved;
        self.batches_committed += 1;
    }

    pub(crate) fn succeed(&mut self, elapsed: Duration) {
        self.status = BuildStatus::Succeeded;
        self.close(elapsed);
    }

    pub(crate) fn fail(&mut self, failure: BuildFailure, elapsed: Duration) {
        self.status = BuildStatus::Failed;
        self.error = Some(failure.message());
        self.failure = Some(failure);
        self.close(elapsed);
    }

    fn close(&mut self, elapsed: Duration) {
        self.duration_ms = elapsed.as_millis() as u64;
        self.finished_at = Some(Utc::now());
    }

    /// Rows skipped across all steps.
    pub fn rows_skipped(&self) -> usize {
        self.node_rows_skipped + self.relationship_rows_skipped
    }

    pub fn is_success(&self) -> bool {
        self.status == BuildStatus::Succeeded
    }

    /// `Ok(self)` for a successful build, the recorded error otherwise.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        match self.failure {
            Some(failure) => Err(failure.to_error()),
            None => Err(GbsError::Unavailable {
                message: self.error.unwrap_or_else(|| "build did not finish".to_string()),
            }),
        }
    }
}
