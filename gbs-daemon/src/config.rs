//! Daemon configuration loading from `gbs.toml`.
//!
//! Configuration is optional: a missing file yields the defaults below, a
//! malformed one is an error. Command-line flags override file values.
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//!
//! [sessions]
//! store_dir = ".gbs/sessions"
//! ttl_secs = 3600
//! max_sessions = 64
//! sweep_interval_secs = 60
//!
//! [graph]
//! database = ".gbs/graph.duckdb"
//! connect_attempts = 3
//! connect_backoff_ms = 200
//!
//! [build]
//! batch_size = 1000
//! write_attempts = 3
//! retry_backoff_ms = 100
//! max_backoff_ms = 5000
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::build::RetryPolicy;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "gbs.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub sessions: SessionConfig,

    #[serde(default)]
    pub graph: GraphConfig,

    #[serde(default)]
    pub build: BuildConfig,
}

/// HTTP listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory holding one JSON blob per session.
    pub store_dir: PathBuf,
    /// Idle time after which a session is swept.
    pub ttl_secs: u64,
    /// Maximum number of live sessions.
    pub max_sessions: usize,
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(".gbs/sessions"),
            ttl_secs: 3600,
            max_sessions: 64,
            sweep_interval_secs: 60,
        }
    }
}

/// Graph database connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// DuckDB database file, or `:memory:`.
    pub database: String,
    pub connect_attempts: u32,
    pub connect_backoff_ms: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            database: ".gbs/graph.duckdb".to_string(),
            connect_attempts: 3,
            connect_backoff_ms: 200,
        }
    }
}

/// Build defaults and write retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Rows per write batch when a request does not say.
    pub batch_size: usize,
    /// Attempts per batch, including the first.
    pub write_attempts: u32,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            write_attempts: 3,
            retry_backoff_ms: 100,
            max_backoff_ms: 5000,
        }
    }
}

impl ServiceConfig {
    /// Load from `path`, or from [`CONFIG_FILE`] if none is given.
    ///
    /// An explicitly named file must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(CONFIG_FILE), false),
        };

        if !path.exists() {
            if required {
                anyhow::bail!("Config file not found: {:?}", path);
            }
            tracing::debug!("No {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.sessions.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.sweep_interval_secs.max(1))
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.graph.connect_backoff_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.build.write_attempts,
            Duration::from_millis(self.build.retry_backoff_ms),
            Duration::from_millis(self.build.max_backoff_ms),
        )
    }
}
