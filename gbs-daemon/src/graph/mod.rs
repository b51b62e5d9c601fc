//! Graph database layer.
//!
//! Provides:
//! - The driver boundary (`GraphDriver`, `DriverFactory`)
//! - A DuckDB-backed property graph with merge-by-key upserts
//! - The shared connection manager used by every build

mod driver;
mod duck;
mod manager;
mod schema;

pub use driver::{DriverError, DriverFactory, DriverResult, GraphDriver, GraphStats};
pub use duck::{DuckGraph, DuckGraphFactory, IN_MEMORY};
pub use manager::{ConnectionManager, GraphHandle};
