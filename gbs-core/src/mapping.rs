//! User-supplied mapping from session tables to a property graph.
//!
//! A mapping is a list of node specifications and a list of relationship
//! specifications. It is usually deserialised from a client document:
//!
//! ```json
//! {
//!   "nodes": [
//!     {"table": "people", "label": "Person", "key": ["id"], "properties": ["name"]}
//!   ],
//!   "relationships": [
//!     {"table": "edges", "type": "KNOWS",
//!      "source": {"node": "Person", "columns": ["src"]},
//!      "target": {"node": "Person", "columns": ["dst"]}}
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};

/// Complete mapping configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub relationships: Vec<RelationshipSpec>,
}

impl MappingConfig {
    pub fn new(nodes: Vec<NodeSpec>, relationships: Vec<RelationshipSpec>) -> Self {
        Self {
            nodes,
            relationships,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }

    /// Node specification a relationship endpoint refers to.
    pub fn node_spec(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.spec_name() == name)
    }
}

/// How rows of one table become nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Name relationship endpoints use for this spec. Defaults to the label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub table: String,
    pub label: String,
    /// Columns forming the natural key, in order.
    pub key: Vec<String>,
    /// Columns copied onto the node as properties.
    #[serde(default)]
    pub properties: Vec<String>,
}

impl NodeSpec {
    pub fn new(table: &str, label: &str, key: &[&str]) -> Self {
        Self {
            name: None,
            table: table.to_string(),
            label: label.to_string(),
            key: key.iter().map(|k| k.to_string()).collect(),
            properties: Vec::new(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_properties(mut self, properties: &[&str]) -> Self {
        self.properties = properties.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn spec_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.label)
    }
}

/// How rows of one table become relationships between mapped nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipSpec {
    pub table: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub source: EndpointSpec,
    pub target: EndpointSpec,
    #[serde(default)]
    pub properties: Vec<String>,
}

impl RelationshipSpec {
    pub fn new(table: &str, rel_type: &str, source: EndpointSpec, target: EndpointSpec) -> Self {
        Self {
            table: table.to_string(),
            rel_type: rel_type.to_string(),
            source,
            target,
            properties: Vec::new(),
        }
    }

    pub fn with_properties(mut self, properties: &[&str]) -> Self {
        self.properties = properties.iter().map(|p| p.to_string()).collect();
        self
    }
}

/// One side of a relationship: the node spec it lands on and the columns of
/// the relationship's table holding that node's natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub node: String,
    pub columns: Vec<String>,
}

impl EndpointSpec {
    pub fn new(node: &str, columns: &[&str]) -> Self {
        Self {
            node: node.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}
