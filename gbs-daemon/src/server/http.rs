//! HTTP routes and handlers for the graph build API.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use gbs_core::{GbsError, MappingConfig, MappingViolation, Table};

use super::state::AppState;
use crate::build::BuildResult;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health and graph status
        .route("/health", get(health))
        .route("/graph/stats", get(graph_stats))
        // Session lifecycle
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/cleanup", post(cleanup_sessions))
        .route("/sessions/:id", get(get_session).delete(delete_session))
        // Ingestion
        .route("/sessions/:id/tables/:table", put(put_table))
        // Mapping and build
        .route("/sessions/:id/validate", post(validate_mapping))
        .route("/sessions/:id/build", post(build_graph))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

// =============================================================================
// Response Types
// =============================================================================

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    duration_ms: u64,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T, duration_ms: u64) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            duration_ms,
        })
    }

    fn err(error: impl ToString, data: Option<T>, duration_ms: u64) -> Json<Self> {
        Json(Self {
            success: false,
            data,
            error: Some(error.to_string()),
            duration_ms,
        })
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// HTTP status for an error kind.
fn status_for(error: &GbsError) -> StatusCode {
    match error {
        GbsError::NotFound { .. } => StatusCode::NOT_FOUND,
        GbsError::ResourceExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
        GbsError::InvalidMapping(_)
        | GbsError::InvalidTable { .. }
        | GbsError::SchemaChanged { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        GbsError::Conflict { .. } => StatusCode::CONFLICT,
        GbsError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        GbsError::WriteFailed { .. } => StatusCode::BAD_GATEWAY,
        GbsError::Io(_) | GbsError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn success<T: Serialize>(status: StatusCode, data: T, start: Instant) -> Response {
    (status, ApiResponse::ok(data, elapsed_ms(start))).into_response()
}

/// Error envelope. Mapping violations are also returned as structured data.
fn failure(error: GbsError, start: Instant) -> Response {
    let data = match &error {
        GbsError::InvalidMapping(violations) => Some(ViolationsResponse::from(violations.clone())),
        _ => None,
    };
    (
        status_for(&error),
        ApiResponse::err(&error, data, elapsed_ms(start)),
    )
        .into_response()
}

fn respond<T: Serialize>(result: gbs_core::Result<T>, start: Instant) -> Response {
    match result {
        Ok(data) => success(StatusCode::OK, data, start),
        Err(e) => failure(e, start),
    }
}

// =============================================================================
// Health & Status
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "gbs-daemon",
        "sessions": state.registry.session_count().await,
        "uptime_seconds": state.uptime_seconds(),
    }))
}

async fn graph_stats(State(state): State<Arc<AppState>>) -> Response {
    let start = Instant::now();
    respond(state.connections.stats().await, start)
}

// =============================================================================
// Sessions
// =============================================================================

async fn create_session(State(state): State<Arc<AppState>>) -> Response {
    let start = Instant::now();
    let created = match state.registry.create_session().await {
        Ok(id) => state.registry.info(&id).await,
        Err(e) => Err(e),
    };
    match created {
        Ok(info) => success(StatusCode::CREATED, info, start),
        Err(e) => failure(e, start),
    }
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> Response {
    let start = Instant::now();
    success(StatusCode::OK, state.registry.list_sessions().await, start)
}

async fn get_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let start = Instant::now();
    respond(state.registry.info(&id).await, start)
}

#[derive(Serialize)]
struct DeleteResponse {
    session_id: String,
    deleted: bool,
}

async fn delete_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let start = Instant::now();
    if state.registry.delete_session(&id).await {
        success(
            StatusCode::OK,
            DeleteResponse {
                session_id: id,
                deleted: true,
            },
            start,
        )
    } else {
        failure(GbsError::not_found(id), start)
    }
}

#[derive(Serialize)]
struct CleanupResponse {
    removed: usize,
    remaining: usize,
}

async fn cleanup_sessions(State(state): State<Arc<AppState>>) -> Response {
    let start = Instant::now();
    let removed = state.registry.sweep_expired().await;
    let remaining = state.registry.session_count().await;
    success(StatusCode::OK, CleanupResponse { removed, remaining }, start)
}

// =============================================================================
// Ingestion
// =============================================================================

async fn put_table(
    State(state): State<Arc<AppState>>,
    Path((id, table)): Path<(String, String)>,
    Json(records): Json<Vec<serde_json::Value>>,
) -> Response {
    let start = Instant::now();
    let ingested = match Table::from_json_records(table, &records) {
        Ok(table) => state.registry.ingest_table(&id, table).await,
        Err(e) => Err(e),
    };
    respond(ingested, start)
}

// =============================================================================
// Mapping & Build
// =============================================================================

#[derive(Serialize)]
struct ViolationsResponse {
    valid: bool,
    violations: Vec<MappingViolation>,
}

impl From<Vec<MappingViolation>> for ViolationsResponse {
    fn from(violations: Vec<MappingViolation>) -> Self {
        Self {
            valid: violations.is_empty(),
            violations,
        }
    }
}

async fn validate_mapping(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mapping): Json<MappingConfig>,
) -> Response {
    let start = Instant::now();
    let checked = state.builder.validate(&id, &mapping).await;
    respond(checked.map(ViolationsResponse::from), start)
}

#[derive(Deserialize)]
struct BuildParams {
    batch_size: Option<usize>,
}

async fn build_graph(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<BuildParams>,
    Json(mapping): Json<MappingConfig>,
) -> Response {
    let start = Instant::now();
    let batch_size = params.batch_size.unwrap_or(state.default_batch_size);

    match state.builder.build(&id, mapping, batch_size).await {
        Ok(result) if result.is_success() => success(StatusCode::OK, result, start),
        Ok(result) => failed_build(result, start),
        Err(e) => failure(e, start),
    }
}

/// A build that ran but did not finish: the partial counts go back too.
fn failed_build(result: BuildResult, start: Instant) -> Response {
    let status = result
        .failure
        .as_ref()
        .map(|f| status_for(&f.to_error()))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let error = result
        .error
        .clone()
        .unwrap_or_else(|| "build failed".to_string());
    (status, ApiResponse::err(error, Some(result), elapsed_ms(start))).into_response()
}
