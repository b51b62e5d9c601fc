//! HTTP server for the graph build daemon.
//!
//! Provides REST API for:
//! - Health checks and graph statistics
//! - Session create, inspect, delete and cleanup
//! - Table ingestion from JSON records
//! - Mapping validation and graph builds

mod http;
pub mod state;

pub use http::create_router;
pub use state::AppState;
