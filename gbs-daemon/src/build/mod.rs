//! Graph build pipeline.
//!
//! Orchestrates:
//! 1. Flipping the session to `building` and snapshotting its tables
//! 2. Compiling the mapping (uses gbs-core resolver)
//! 3. Turning rows into batches (uses gbs-core materialize)
//! 4. Writing batches with retry through the connection manager
//! 5. Recording the result on the session

mod materializer;
mod orchestrator;
mod result;

pub use materializer::{Materializer, RetryPolicy};
pub use orchestrator::GraphBuilder;
pub use result::{BuildFailure, BuildResult, BuildStatus};
