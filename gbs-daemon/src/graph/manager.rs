//! Shared, lazily opened connection to the graph database.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use gbs_core::{BatchOutcome, GbsError, Result, WriteBatch};

use super::driver::{DriverError, DriverFactory, DriverResult, GraphDriver, GraphStats};

/// A verified connection handed out by [`ConnectionManager::acquire`].
#[derive(Clone)]
pub struct GraphHandle {
    driver: Arc<dyn GraphDriver>,
}

/// Owns the process-wide graph connection.
///
/// The connection is opened on first use and re-verified before every
/// handout; a stale connection is dropped and reopened. The manager knows
/// nothing about sessions.
pub struct ConnectionManager {
    factory: Arc<dyn DriverFactory>,
    driver: Mutex<Option<Arc<dyn GraphDriver>>>,
    connect_attempts: u32,
    connect_backoff: Duration,
}

impl ConnectionManager {
    pub fn new(
        factory: Arc<dyn DriverFactory>,
        connect_attempts: u32,
        connect_backoff: Duration,
    ) -> Self {
        Self {
            factory,
            driver: Mutex::new(None),
            connect_attempts: connect_attempts.max(1),
            connect_backoff,
        }
    }

    /// Return a live handle, connecting or reconnecting as needed.
    ///
    /// Fails with [`GbsError::Unavailable`] once every connection attempt
    /// has failed.
    pub async fn acquire(&self) -> Result<GraphHandle> {
        // Held across the probe and any reconnect so concurrent callers
        // never open two connections.
        let mut slot = self.driver.lock().await;

        if let Some(driver) = slot.clone() {
            let probe = driver.clone();
            match blocking(move || probe.verify()).await {
                Ok(()) => return Ok(GraphHandle { driver }),
                Err(e) => {
                    warn!("Graph connection is stale, reconnecting: {}", e);
                    *slot = None;
                }
            }
        }

        let driver = self.connect().await?;
        *slot = Some(driver.clone());
        Ok(GraphHandle { driver })
    }

    async fn connect(&self) -> Result<Arc<dyn GraphDriver>> {
        let mut last_error = String::new();

        for attempt in 1..=self.connect_attempts {
            let factory = self.factory.clone();
            let opened = blocking(move || {
                let driver = factory.connect()?;
                driver.verify()?;
                Ok(driver)
            })
            .await;

            match opened {
                Ok(driver) => {
                    info!("Connected to graph database {}", self.factory.target());
                    return Ok(driver);
                }
                Err(e) => {
                    warn!(
                        "Graph connection attempt {}/{} failed: {}",
                        attempt, self.connect_attempts, e
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < self.connect_attempts {
                tokio::time::sleep(self.connect_backoff * attempt).await;
            }
        }

        Err(GbsError::Unavailable {
            message: format!(
                "{} after {} attempts: {}",
                self.factory.target(),
                self.connect_attempts,
                last_error
            ),
        })
    }

    /// Apply one batch through `handle` as a single transaction.
    pub async fn execute(
        &self,
        handle: &GraphHandle,
        batch: Arc<WriteBatch>,
    ) -> DriverResult<BatchOutcome> {
        let driver = handle.driver.clone();
        let result = blocking(move || driver.execute(&batch)).await;
        if let Err(e) = &result {
            debug!("Batch failed: {}", e);
        }
        result
    }

    /// Current counts, labels and relationship types of the graph.
    pub async fn stats(&self) -> Result<GraphStats> {
        let handle = self.acquire().await?;
        let driver = handle.driver;
        blocking(move || driver.stats())
            .await
            .map_err(|e| GbsError::Unavailable {
                message: e.to_string(),
            })
    }
}

/// Run a blocking driver call on tokio's blocking pool.
async fn blocking<T, F>(f: F) -> DriverResult<T>
where
    F: FnOnce() -> DriverResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DriverError::Connection(format!("driver task failed: {}", e)))?
}
