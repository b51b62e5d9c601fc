//! GBS core - tabular model and graph mapping engine.
//!
//! This crate holds the pure, synchronous half of the graph builder service:
//!
//! - **Values and tables**: typed cells, per-table schemas, JSON ingestion
//!   with type inference
//! - **Mapping configuration**: node and relationship specifications
//! - **Resolver**: exhaustive validation and compilation into an ordered plan
//! - **Materialization**: lazy conversion of table rows into write batches
//!
//! Session lifecycle, the graph store and the HTTP surface live in
//! `gbs-daemon`.
//!
//! # Usage
//!
//! ```
//! use gbs_core::{compile, BatchIter, MappingConfig, NodeSpec, Table, Tables};
//! use serde_json::json;
//!
//! let people = Table::from_json_records(
//!     "people",
//!     &[json!({"id": 1, "name": "Ann"}), json!({"id": 2, "name": "Bo"})],
//! )
//! .unwrap();
//! let mut tables = Tables::new();
//! tables.insert("people".to_string(), people);
//!
//! let config = MappingConfig::new(
//!     vec![NodeSpec::new("people", "Person", &["id"]).with_properties(&["name"])],
//!     vec![],
//! );
//! let plan = compile(&tables, &config).unwrap();
//! let batches: Vec<_> = BatchIter::new(&plan.steps()[0], &tables, 1000)
//!     .unwrap()
//!     .collect();
//! assert_eq!(batches[0].len(), 2);
//! ```

pub mod batch;
pub mod error;
pub mod mapping;
pub mod materialize;
pub mod plan;
pub mod resolver;
pub mod table;
pub mod value;

pub use batch::{natural_key, BatchOutcome, NodeWrite, Properties, RelationshipWrite, WriteBatch};
pub use error::{GbsError, MappingRule, MappingViolation, Result};
pub use mapping::{EndpointSpec, MappingConfig, NodeSpec, RelationshipSpec};
pub use materialize::BatchIter;
pub use plan::{ColumnRef, CompiledEndpoint, CompiledNode, CompiledPlan, CompiledRelationship, PlanStep};
pub use resolver::{compile, validate};
pub use table::{Column, Table, TableSummary, Tables};
pub use value::{ColumnType, Value};
