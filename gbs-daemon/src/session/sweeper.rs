//! Periodic expiry sweep background task.

use std::sync::Arc;
use std::time::Duration;

use super::registry::SessionRegistry;

/// Spawn a background task that sweeps expired sessions every `interval`.
pub fn spawn_sweeper(
    registry: Arc<SessionRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let swept = registry.sweep_expired().await;
            if swept > 0 {
                tracing::info!("Swept {} expired sessions", swept);
            } else {
                tracing::debug!("Sweep found no expired sessions");
            }
        }
    })
}
