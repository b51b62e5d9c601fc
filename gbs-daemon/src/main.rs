//! GBS Daemon - graph build service.
//!
//! A single Rust binary that provides:
//! - HTTP API for session management and table ingestion
//! - Mapping validation and batched graph builds
//! - Session persistence across restarts with periodic expiry

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gbs_daemon::server::{create_router, AppState};
use gbs_daemon::session::spawn_sweeper;
use gbs_daemon::{
    ConnectionManager, DuckGraphFactory, GraphBuilder, ServiceConfig, SessionRegistry,
    SessionStore,
};

/// Graph build daemon
#[derive(Parser, Debug)]
#[command(name = "gbs-daemon")]
#[command(about = "Session-scoped tabular ingestion and property-graph build daemon")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file (defaults to ./gbs.toml if present)
    #[arg(short, long, env = "GBS_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "GBS_HOST")]
    host: Option<String>,

    /// HTTP port to listen on
    #[arg(short, long, env = "GBS_PORT")]
    port: Option<u16>,

    /// Directory for persisted sessions
    #[arg(long, env = "GBS_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// Graph database file, or :memory:
    #[arg(long, env = "GBS_GRAPH_DB")]
    graph_db: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(self, config: &mut ServiceConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(dir) = self.store_dir {
            config.sessions.store_dir = dir;
        }
        if let Some(db) = self.graph_db {
            config.graph.database = db;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let mut config = ServiceConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    info!("Starting GBS daemon");
    info!("Session store: {:?}", config.sessions.store_dir);
    info!("Graph database: {}", config.graph.database);

    let store = SessionStore::open(&config.sessions.store_dir).with_context(|| {
        format!(
            "Failed to open session store {:?}",
            config.sessions.store_dir
        )
    })?;
    let registry = Arc::new(SessionRegistry::new(
        config.session_ttl(),
        config.sessions.max_sessions,
        Some(store),
    ));
    let restored = registry
        .load_all()
        .await
        .context("Failed to restore persisted sessions")?;
    info!("Restored {} sessions", restored);

    // Connects lazily on the first build or stats call.
    let connections = Arc::new(ConnectionManager::new(
        Arc::new(DuckGraphFactory::new(config.graph.database.clone())),
        config.graph.connect_attempts,
        config.connect_backoff(),
    ));
    let builder = Arc::new(GraphBuilder::new(
        registry.clone(),
        connections.clone(),
        config.retry_policy(),
    ));

    let _sweeper = spawn_sweeper(registry.clone(), config.sweep_interval());

    let state = AppState::new(registry, builder, connections, config.build.batch_size);
    let router = create_router(state);
    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("GBS daemon listening on http://{}", addr);

    axum::serve(listener, router).await?;
    Ok(())
}
