//! Session lifecycle.
//!
//! Provides:
//! - The session model and client-facing summaries
//! - The registry owning every session (create, lookup, ingest, expiry)
//! - An on-disk store with atomic replace
//! - The periodic expiry sweeper

mod model;
mod registry;
mod store;
mod sweeper;

pub use model::{Session, SessionInfo};
pub use registry::{SessionRegistry, INTERRUPTED};
pub use store::SessionStore;
pub use sweeper::spawn_sweeper;
