//! Session state owned by the registry.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use gbs_core::{MappingConfig, TableSummary, Tables};

use crate::build::{BuildResult, BuildStatus};

/// A scoped, time-limited unit of ingested tables plus its build history.
///
/// Tables sit behind an `Arc` so a build can read a snapshot while the
/// registry lock is released.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub status: BuildStatus,
    pub tables: Arc<Tables>,
    pub last_mapping: Option<Arc<MappingConfig>>,
    pub last_result: Option<BuildResult>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            last_access: now,
            status: BuildStatus::Idle,
            tables: Arc::new(Tables::new()),
            last_mapping: None,
            last_result: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_access = Utc::now();
    }

    pub fn is_building(&self) -> bool {
        self.status == BuildStatus::Building
    }

    /// Instant after which the session may be swept.
    pub fn expires_at(&self, ttl: Duration) -> DateTime<Utc> {
        ChronoDuration::from_std(ttl)
            .ok()
            .and_then(|ttl| self.last_access.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Idle for at least `ttl` as of `now`. Sessions mid-build never expire.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        !self.is_building() && now >= self.expires_at(ttl)
    }

    pub fn total_rows(&self) -> usize {
        self.tables.values().map(|t| t.row_count()).sum()
    }

    /// Client-facing summary.
    pub fn info(&self, ttl: Duration) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            created_at: self.created_at,
            last_access: self.last_access,
            expires_at: self.expires_at(ttl),
            status: self.status,
            tables: self.tables.values().map(|t| t.summary()).collect(),
            total_rows: self.total_rows(),
            last_mapping: self.last_mapping.as_deref().cloned(),
            last_result: self.last_result.clone(),
        }
    }
}

/// Session metadata returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: BuildStatus,
    pub tables: Vec<TableSummary>,
    pub total_rows: usize,
    pub last_mapping: Option<MappingConfig>,
    pub last_result: Option<BuildResult>,
}
