//! GBS daemon: session-scoped tabular ingestion and property-graph builds.
//!
//! Sessions hold uploaded tables until they expire. A build compiles a
//! mapping against a session's tables and writes the resulting nodes and
//! relationships, in batches, to a shared graph database.

pub mod build;
pub mod config;
pub mod graph;
pub mod server;
pub mod session;

pub use build::{BuildFailure, BuildResult, BuildStatus, GraphBuilder, RetryPolicy};
pub use config::ServiceConfig;
pub use graph::{ConnectionManager, DuckGraphFactory};
pub use session::{SessionRegistry, SessionStore};
