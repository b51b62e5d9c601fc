//! DuckDB schema for the property graph.

/// Current schema version.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Tables backing the graph.
///
/// Node identity is `(label, node_key)`; relationship identity is the type
/// plus both endpoints. Properties are stored as a JSON object.
pub const SCHEMA_SQL: &str = r#"
-- Nodes keyed by label and canonical natural key
CREATE TABLE IF NOT EXISTS graph_nodes (
    label VARCHAR NOT NULL,
    node_key VARCHAR NOT NULL,
    properties VARCHAR NOT NULL,
    PRIMARY KEY (label, node_key)
);

-- Relationships keyed by type and endpoint pair
CREATE TABLE IF NOT EXISTS graph_relationships (
    rel_type VARCHAR NOT NULL,
    source_label VARCHAR NOT NULL,
    source_key VARCHAR NOT NULL,
    target_label VARCHAR NOT NULL,
    target_key VARCHAR NOT NULL,
    properties VARCHAR NOT NULL,
    PRIMARY KEY (rel_type, source_label, source_key, target_label, target_key)
);

-- Metadata table
CREATE TABLE IF NOT EXISTS metadata (
    key VARCHAR PRIMARY KEY,
    value VARCHAR NOT NULL
);
"#;

pub const SELECT_NODE: &str =
    "SELECT properties FROM graph_nodes WHERE label = ? AND node_key = ?";

pub const INSERT_NODE: &str =
    "INSERT INTO graph_nodes (label, node_key, properties) VALUES (?, ?, ?)";

pub const UPDATE_NODE: &str =
    "UPDATE graph_nodes SET properties = ? WHERE label = ? AND node_key = ?";

pub const SELECT_RELATIONSHIP: &str = r#"SELECT properties FROM graph_relationships
    WHERE rel_type = ? AND source_label = ? AND source_key = ?
      AND target_label = ? AND target_key = ?"#;

pub const INSERT_RELATIONSHIP: &str = r#"INSERT INTO graph_relationships
    (rel_type, source_label, source_key, target_label, target_key, properties)
    VALUES (?, ?, ?, ?, ?, ?)"#;

pub const UPDATE_RELATIONSHIP: &str = r#"UPDATE graph_relationships SET properties = ?
    WHERE rel_type = ? AND source_label = ? AND source_key = ?
      AND target_label = ? AND target_key = ?"#;
