//! Error types for gbs.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for gbs operations.
pub type Result<T> = std::result::Result<T, GbsError>;

/// Errors surfaced by the session, mapping and build layers.
#[derive(Error, Debug)]
pub enum GbsError {
    /// Unknown or expired session.
    #[error("Session not found or expired: {session_id}")]
    NotFound {
        /// Id that was looked up.
        session_id: String,
    },

    /// A configured capacity (sessions, connections) is exhausted.
    #[error("Resource exhausted: {resource} (limit {limit})")]
    ResourceExhausted {
        /// Which resource ran out.
        resource: String,
        /// The configured limit.
        limit: usize,
    },

    /// The mapping configuration does not fit the session's tables.
    #[error("Invalid mapping: {}", format_violations(.0))]
    InvalidMapping(Vec<MappingViolation>),

    /// A build is already running, or ingestion was attempted during one.
    #[error("Conflict on session {session_id}: {reason}")]
    Conflict {
        /// Session the conflicting operation targeted.
        session_id: String,
        /// What was already in progress.
        reason: String,
    },

    /// The graph database could not be reached.
    #[error("Graph database unavailable: {message}")]
    Unavailable {
        /// Last connection error.
        message: String,
    },

    /// A write batch kept failing after the retry budget was spent.
    #[error("Write failed for {step} batch {batch} after {attempts} attempts: {message}")]
    WriteFailed {
        /// Plan step (label or relationship type) the batch belonged to.
        step: String,
        /// Zero-based batch index within that step.
        batch: usize,
        /// Attempts made, including the first.
        attempts: u32,
        /// First unrecoverable error.
        message: String,
    },

    /// Ingested rows do not match the table they are written into.
    #[error("Invalid table {table}: {message}")]
    InvalidTable {
        /// Table being ingested.
        table: String,
        /// What was wrong.
        message: String,
    },

    /// Re-ingestion tried to change a table's columns or types.
    #[error("Schema of table {table} cannot change within a session: {message}")]
    SchemaChanged {
        /// Table being re-ingested.
        table: String,
        /// Description of the difference.
        message: String,
    },

    /// IO error from the session store.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding a persisted blob failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GbsError {
    /// Shorthand for [`GbsError::NotFound`].
    pub fn not_found(session_id: impl Into<String>) -> Self {
        GbsError::NotFound {
            session_id: session_id.into(),
        }
    }

    /// Shorthand for [`GbsError::Conflict`].
    pub fn conflict(session_id: impl Into<String>, reason: impl Into<String>) -> Self {
        GbsError::Conflict {
            session_id: session_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether the caller may reasonably retry the same call later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GbsError::Conflict { .. } | GbsError::Unavailable { .. } | GbsError::WriteFailed { .. }
        )
    }
}

/// The rule a mapping violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingRule {
    /// Referenced table is not in the session.
    UnknownTable,
    /// Referenced column is not in the table's schema.
    UnknownColumn,
    /// Relationship endpoint names no node specification.
    UnknownNodeSpec,
    /// Natural key has no columns.
    EmptyKey,
    /// Label or relationship type is blank.
    EmptyLabel,
    /// Two node specifications share a name.
    DuplicateNodeSpec,
    /// A column is listed twice in one specification.
    DuplicateColumn,
    /// Endpoint column count differs from the node key's arity.
    KeyArityMismatch,
}

impl MappingRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingRule::UnknownTable => "unknown_table",
            MappingRule::UnknownColumn => "unknown_column",
            MappingRule::UnknownNodeSpec => "unknown_node_spec",
            MappingRule::EmptyKey => "empty_key",
            MappingRule::EmptyLabel => "empty_label",
            MappingRule::DuplicateNodeSpec => "duplicate_node_spec",
            MappingRule::DuplicateColumn => "duplicate_column",
            MappingRule::KeyArityMismatch => "key_arity_mismatch",
        }
    }
}

impl fmt::Display for MappingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One violated rule together with the offending reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingViolation {
    pub rule: MappingRule,
    /// Where in the configuration, e.g. `nodes[0].properties`.
    pub location: String,
    /// The offending table, column (`table.column`) or specification name.
    pub reference: String,
}

impl MappingViolation {
    pub fn new(rule: MappingRule, location: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            rule,
            location: location.into(),
            reference: reference.into(),
        }
    }
}

impl fmt::Display for MappingViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} -> '{}'", self.rule, self.location, self.reference)
    }
}

fn format_violations(violations: &[MappingViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GbsError::not_found("abc");
        assert!(err.to_string().contains("abc"));

        let err = GbsError::WriteFailed {
            step: "Person".to_string(),
            batch: 3,
            attempts: 4,
            message: "constraint".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("Person"));
        assert!(text.contains("batch 3"));
        assert!(text.contains("4 attempts"));
    }

    #[test]
    fn test_invalid_mapping_lists_every_violation() {
        let err = GbsError::InvalidMapping(vec![
            MappingViolation::new(MappingRule::UnknownTable, "nodes[0].table", "x"),
            MappingViolation::new(MappingRule::EmptyKey, "nodes[1].key", "Person"),
        ]);
        let text = err.to_string();
        assert!(text.contains("unknown_table"));
        assert!(text.contains("empty_key"));
        assert!(text.contains("nodes[0].table -> 'x'"));
    }

    #[test]
    fn test_retryable() {
        assert!(GbsError::conflict("s", "building").is_retryable());
        assert!(!GbsError::not_found("s").is_retryable());
    }
}
