//! Compiled, validated mapping plans.

use serde::Serialize;

/// A column resolved against a table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnRef {
    pub name: String,
    /// Position of the column in the table's rows.
    pub index: usize,
}

/// Node specification resolved against its source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledNode {
    pub spec_name: String,
    pub table: String,
    pub label: String,
    pub key: Vec<ColumnRef>,
    pub properties: Vec<ColumnRef>,
}

/// One side of a compiled relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledEndpoint {
    pub node_spec: String,
    /// Label of the node spec the endpoint lands on.
    pub label: String,
    /// Columns of the relationship table holding the endpoint's key.
    pub columns: Vec<ColumnRef>,
}

/// Relationship specification resolved against its source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledRelationship {
    pub table: String,
    pub rel_type: String,
    pub source: CompiledEndpoint,
    pub target: CompiledEndpoint,
    pub properties: Vec<ColumnRef>,
}

/// One unit of work in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PlanStep {
    Node(CompiledNode),
    Relationship(CompiledRelationship),
}

impl PlanStep {
    /// Source table of the step.
    pub fn table(&self) -> &str {
        match self {
            PlanStep::Node(n) => &n.table,
            PlanStep::Relationship(r) => &r.table,
        }
    }

    /// Short label for logs and errors.
    pub fn describe(&self) -> String {
        match self {
            PlanStep::Node(n) => format!("(:{})", n.label),
            PlanStep::Relationship(r) => format!(
                "(:{})-[:{}]->(:{})",
                r.source.label, r.rel_type, r.target.label
            ),
        }
    }
}

/// Ordered, validated plan: every node step precedes every relationship step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompiledPlan {
    steps: Vec<PlanStep>,
}

impl CompiledPlan {
    /// Assemble a plan from node and relationship steps, nodes first.
    pub(crate) fn new(nodes: Vec<CompiledNode>, relationships: Vec<CompiledRelationship>) -> Self {
        let steps = nodes
            .into_iter()
            .map(PlanStep::Node)
            .chain(relationships.into_iter().map(PlanStep::Relationship))
            .collect();
        Self { steps }
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn node_steps(&self) -> impl Iterator<Item = &CompiledNode> {
        self.steps.iter().filter_map(|s| match s {
            PlanStep::Node(n) => Some(n),
            PlanStep::Relationship(_) => None,
        })
    }

    pub fn relationship_steps(&self) -> impl Iterator<Item = &CompiledRelationship> {
        self.steps.iter().filter_map(|s| match s {
            PlanStep::Relationship(r) => Some(r),
            PlanStep::Node(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
