//! Mapping resolver: validates a mapping against session tables and
//! compiles it into an ordered plan.
//!
//! Validation is exhaustive. Every rule is checked for every specification
//! and all violations are returned together.

use std::collections::HashSet;

use crate::error::{GbsError, MappingRule, MappingViolation, Result};
use crate::mapping::{EndpointSpec, MappingConfig};
use crate::plan::{ColumnRef, CompiledEndpoint, CompiledNode, CompiledPlan, CompiledRelationship};
use crate::table::{Table, Tables};

/// Compile `config` against `tables`.
///
/// On success the plan lists node steps in configuration order followed by
/// relationship steps in configuration order.
pub fn compile(tables: &Tables, config: &MappingConfig) -> Result<CompiledPlan> {
    let mut resolver = Resolver::new(tables, config);
    let plan = resolver.run();
    if resolver.violations.is_empty() {
        Ok(plan)
    } else {
        Err(GbsError::InvalidMapping(resolver.violations))
    }
}

/// Check `config` against `tables` without producing a plan.
pub fn validate(tables: &Tables, config: &MappingConfig) -> Vec<MappingViolation> {
    let mut resolver = Resolver::new(tables, config);
    resolver.run();
    resolver.violations
}

struct Resolver<'a> {
    tables: &'a Tables,
    config: &'a MappingConfig,
    violations: Vec<MappingViolation>,
}

impl<'a> Resolver<'a> {
    fn new(tables: &'a Tables, config: &'a MappingConfig) -> Self {
        Self {
            tables,
            config,
            violations: Vec::new(),
        }
    }

    fn violation(&mut self, rule: MappingRule, location: String, reference: impl Into<String>) {
        self.violations
            .push(MappingViolation::new(rule, location, reference));
    }

    fn run(&mut self) -> CompiledPlan {
        let nodes = self.compile_nodes();
        let relationships = self.compile_relationships();
        CompiledPlan::new(nodes, relationships)
    }

    fn compile_nodes(&mut self) -> Vec<CompiledNode> {
        let mut compiled = Vec::new();
        let mut names: HashSet<&str> = HashSet::new();
        let config = self.config;

        for (i, spec) in config.nodes.iter().enumerate() {
            let at = format!("nodes[{}]", i);

            if spec.label.trim().is_empty() {
                self.violation(MappingRule::EmptyLabel, format!("{}.label", at), spec.spec_name());
            }
            if !names.insert(spec.spec_name()) {
                self.violation(
                    MappingRule::DuplicateNodeSpec,
                    format!("{}.name", at),
                    spec.spec_name(),
                );
            }
            if spec.key.is_empty() {
                self.violation(MappingRule::EmptyKey, format!("{}.key", at), spec.spec_name());
            }

            let Some(table) = self.table(&spec.table, format!("{}.table", at)) else {
                continue;
            };
            let key = self.columns(table, &spec.key, format!("{}.key", at));
            let properties = self.columns(table, &spec.properties, format!("{}.properties", at));

            if let (Some(key), Some(properties)) = (key, properties) {
                compiled.push(CompiledNode {
                    spec_name: spec.spec_name().to_string(),
                    table: spec.table.clone(),
                    label: spec.label.clone(),
                    key,
                    properties,
                });
            }
        }

        compiled
    }

    fn compile_relationships(&mut self) -> Vec<CompiledRelationship> {
        let mut compiled = Vec::new();
        let config = self.config;

        for (i, spec) in config.relationships.iter().enumerate() {
            let at = format!("relationships[{}]", i);

            if spec.rel_type.trim().is_empty() {
                self.violation(MappingRule::EmptyLabel, format!("{}.type", at), &spec.table);
            }

            let table = self.table(&spec.table, format!("{}.table", at));
            let source = self.endpoint(table, &spec.source, format!("{}.source", at));
            let target = self.endpoint(table, &spec.target, format!("{}.target", at));
            let properties =
                table.and_then(|t| self.columns(t, &spec.properties, format!("{}.properties", at)));

            if let (Some(source), Some(target), Some(properties)) = (source, target, properties) {
                compiled.push(CompiledRelationship {
                    table: spec.table.clone(),
                    rel_type: spec.rel_type.clone(),
                    source,
                    target,
                    properties,
                });
            }
        }

        compiled
    }

    fn endpoint(
        &mut self,
        table: Option<&'a Table>,
        endpoint: &EndpointSpec,
        at: String,
    ) -> Option<CompiledEndpoint> {
        let config = self.config;
        let node = config.node_spec(&endpoint.node);
        if node.is_none() {
            self.violation(MappingRule::UnknownNodeSpec, format!("{}.node", at), &endpoint.node);
        }
        if endpoint.columns.is_empty() {
            self.violation(MappingRule::EmptyKey, format!("{}.columns", at), &endpoint.node);
        }
        if let Some(node) = node {
            if !node.key.is_empty() && node.key.len() != endpoint.columns.len() {
                self.violation(
                    MappingRule::KeyArityMismatch,
                    format!("{}.columns", at),
                    format!(
                        "{} (key has {} columns, endpoint has {})",
                        node.spec_name(),
                        node.key.len(),
                        endpoint.columns.len()
                    ),
                );
            }
        }

        let columns = self.columns(table?, &endpoint.columns, format!("{}.columns", at))?;
        let node = node?;
        if endpoint.columns.is_empty() || node.key.len() != columns.len() {
            return None;
        }
        Some(CompiledEndpoint {
            node_spec: node.spec_name().to_string(),
            label: node.label.clone(),
            columns,
        })
    }

    fn table(&mut self, name: &str, at: String) -> Option<&'a Table> {
        let tables = self.tables;
        let table = tables.get(name);
        if table.is_none() {
            self.violation(MappingRule::UnknownTable, at, name);
        }
        table
    }

    /// Resolve column names; records every unknown or repeated column.
    fn columns(&mut self, table: &Table, names: &[String], at: String) -> Option<Vec<ColumnRef>> {
        let mut resolved = Vec::with_capacity(names.len());
        let mut seen = HashSet::new();
        let mut ok = true;

        for name in names {
            let reference = format!("{}.{}", table.name(), name);
            if !seen.insert(name.as_str()) {
                self.violation(MappingRule::DuplicateColumn, at.clone(), reference);
                ok = false;
                continue;
            }
            match table.column_index(name) {
                Some(index) => resolved.push(ColumnRef {
                    name: name.clone(),
                    index,
                }),
                None => {
                    self.violation(MappingRule::UnknownColumn, at.clone(), reference);
                    ok = false;
                }
            }
        }

        ok.then_some(resolved)
    }
}
