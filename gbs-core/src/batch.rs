//! Write batches handed to the graph store.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Property map written onto a node or relationship.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Canonical text form of a natural key: the JSON array of key values.
///
/// Returns `None` if any component is null, since such a row cannot
/// identify a node.
pub fn natural_key<'v>(values: impl IntoIterator<Item = &'v Value>) -> Option<String> {
    let parts: Option<Vec<serde_json::Value>> = values
        .into_iter()
        .map(|v| (!v.is_null()).then(|| v.key_json()))
        .collect();
    parts.map(|p| serde_json::Value::Array(p).to_string())
}

/// Upsert of one node, identified by label and natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeWrite {
    pub key: String,
    pub properties: Properties,
}

/// Upsert of one relationship, identified by type and endpoint pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipWrite {
    pub source_key: String,
    pub target_key: String,
    pub properties: Properties,
}

/// A bounded group of writes committed as one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WriteBatch {
    Nodes {
        label: String,
        items: Vec<NodeWrite>,
    },
    Relationships {
        rel_type: String,
        source_label: String,
        target_label: String,
        items: Vec<RelationshipWrite>,
    },
}

impl WriteBatch {
    pub fn len(&self) -> usize {
        match self {
            WriteBatch::Nodes { items, .. } => items.len(),
            WriteBatch::Relationships { items, .. } => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a committed batch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Items that did not exist before.
    pub created: usize,
    /// Items that existed and had their properties updated.
    pub merged: usize,
    /// Relationship items whose endpoint nodes are not in the graph.
    pub unresolved: usize,
}

impl BatchOutcome {
    pub fn absorb(&mut self, other: BatchOutcome) {
        self.created += other.created;
        self.merged += other.merged;
        self.unresolved += other.unresolved;
    }
}
