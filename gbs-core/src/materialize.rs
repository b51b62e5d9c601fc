//! Turning table rows into write batches.
//!
//! A [`BatchIter`] resolves one plan step's source table in row order and
//! yields batches of at most `batch_size` writes. Rows whose natural key
//! (or either endpoint key) contains a null are skipped and counted.
//!
//! Each identity is written once per step: rows repeating an earlier
//! identity are folded into the first write, later non-null properties
//! winning. A build's created and merged counts are therefore counts of
//! distinct nodes and relationships.

use std::collections::HashMap;

use crate::batch::{natural_key, NodeWrite, Properties, RelationshipWrite, WriteBatch};
use crate::error::{GbsError, MappingRule, MappingViolation, Result};
use crate::plan::{ColumnRef, CompiledEndpoint, CompiledNode, CompiledRelationship, PlanStep};
use crate::table::{Table, Tables};
use crate::value::Value;

enum Pending {
    Nodes(std::vec::IntoIter<NodeWrite>),
    Relationships(std::vec::IntoIter<RelationshipWrite>),
}

/// Batch producer for a single plan step.
pub struct BatchIter<'a> {
    step: &'a PlanStep,
    batch_size: usize,
    pending: Pending,
    rows_read: usize,
    skipped: usize,
    folded: usize,
}

impl<'a> BatchIter<'a> {
    /// Start iterating `step` over its table in `tables`.
    ///
    /// A `batch_size` of zero is treated as one.
    pub fn new(step: &'a PlanStep, tables: &'a Tables, batch_size: usize) -> Result<Self> {
        let table = tables.get(step.table()).ok_or_else(|| {
            GbsError::InvalidMapping(vec![MappingViolation::new(
                MappingRule::UnknownTable,
                step.describe(),
                step.table(),
            )])
        })?;

        let mut tally = Tally::default();
        let pending = match step {
            PlanStep::Node(node) => {
                Pending::Nodes(resolve_nodes(node, table, &mut tally).into_iter())
            }
            PlanStep::Relationship(rel) => {
                Pending::Relationships(resolve_relationships(rel, table, &mut tally).into_iter())
            }
        };
        Ok(Self {
            step,
            batch_size: batch_size.max(1),
            pending,
            rows_read: table.row_count(),
            skipped: tally.skipped,
            folded: tally.folded,
        })
    }

    /// Rows skipped because a key could not be resolved.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Rows of the source table.
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    /// Rows merged into an earlier row with the same identity.
    pub fn folded(&self) -> usize {
        self.folded
    }
}

impl Iterator for BatchIter<'_> {
    type Item = WriteBatch;

    fn next(&mut self) -> Option<WriteBatch> {
        let size = self.batch_size;
        match (&mut self.pending, self.step) {
            (Pending::Nodes(items), PlanStep::Node(node)) => {
                let items: Vec<NodeWrite> = items.take(size).collect();
                (!items.is_empty()).then(|| WriteBatch::Nodes {
                    label: node.label.clone(),
                    items,
                })
            }
            (Pending::Relationships(items), PlanStep::Relationship(rel)) => {
                let items: Vec<RelationshipWrite> = items.take(size).collect();
                (!items.is_empty()).then(|| WriteBatch::Relationships {
                    rel_type: rel.rel_type.clone(),
                    source_label: rel.source.label.clone(),
                    target_label: rel.target.label.clone(),
                    items,
                })
            }
            _ => None,
        }
    }
}

#[derive(Default)]
struct Tally {
    skipped: usize,
    folded: usize,
}

fn resolve_nodes(node: &CompiledNode, table: &Table, tally: &mut Tally) -> Vec<NodeWrite> {
    let mut writes: Vec<NodeWrite> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for row in table.rows() {
        let Some(key) = natural_key(node.key.iter().map(|c| &row[c.index])) else {
            tally.skipped += 1;
            continue;
        };
        // Key columns are carried as properties too, so nodes
        // expose their identity.
        let mut properties = property_map(row, &node.key);
        properties.extend(property_map(row, &node.properties));

        match seen.get(&key) {
            Some(&at) => {
                writes[at].properties.extend(properties);
                tally.folded += 1;
            }
            None => {
                seen.insert(key.clone(), writes.len());
                writes.push(NodeWrite { key, properties });
            }
        }
    }
    writes
}

fn resolve_relationships(
    rel: &CompiledRelationship,
    table: &Table,
    tally: &mut Tally,
) -> Vec<RelationshipWrite> {
    let mut writes: Vec<RelationshipWrite> = Vec::new();
    let mut seen: HashMap<(String, String), usize> = HashMap::new();

    for row in table.rows() {
        let (Some(source_key), Some(target_key)) =
            (endpoint_key(row, &rel.source), endpoint_key(row, &rel.target))
        else {
            tally.skipped += 1;
            continue;
        };
        let properties = property_map(row, &rel.properties);

        let identity = (source_key, target_key);
        match seen.get(&identity) {
            Some(&at) => {
                writes[at].properties.extend(properties);
                tally.folded += 1;
            }
            None => {
                seen.insert(identity.clone(), writes.len());
                let (source_key, target_key) = identity;
                writes.push(RelationshipWrite {
                    source_key,
                    target_key,
                    properties,
                });
            }
        }
    }
    writes
}

fn endpoint_key(row: &[Value], endpoint: &CompiledEndpoint) -> Option<String> {
    natural_key(endpoint.columns.iter().map(|c| &row[c.index]))
}

/// Non-null cells of `columns` as a property map.
fn property_map(row: &[Value], columns: &[ColumnRef]) -> Properties {
    columns
        .iter()
        .filter(|c| !row[c.index].is_null())
        .map(|c| (c.name.clone(), row[c.index].to_json()))
        .collect()
}
