//! HTTP server.
//!
//! Thin JSON layer over the [`Orchestrator`], meant for game engines and
//! other tools that want quest ideas on demand.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Answer a prompt within a session |
//! | `POST` | `/reset` | Forget a session's history (always succeeds) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! `session_id` defaults to `"default"` in both POST bodies.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "prompt must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `index_empty` (500),
//! `generation_failed` (502), `timeout` (504), `internal` (500).
//! A failing request never takes the process down and never exposes
//! another session's state.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser-based tools
//! can call the API directly.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{kind_of, RagError};
use crate::models::ChunkProvenance;
use crate::orchestrator::Orchestrator;

const DEFAULT_SESSION: &str = "default";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

/// Build the router. Exposed so tests can mount it on their own listener.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", post(handle_query))
        .route("/reset", post(handle_reset))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { orchestrator })
}

/// Bind `bind_addr` and serve until the process is terminated.
pub async fn run_server(orchestrator: Arc<Orchestrator>, bind_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    serve_on(listener, orchestrator).await
}

/// Serve on an already-bound listener.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    orchestrator: Arc<Orchestrator>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "RAG server listening");
    axum::serve(listener, router(orchestrator)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"timeout"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

/// Maps pipeline failures to status codes by their [`RagError`] kind.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        let (status, code) = match kind_of(&err) {
            Some(RagError::EmptyIndex) => (StatusCode::INTERNAL_SERVER_ERROR, "index_empty"),
            Some(RagError::GenerationTimeout { .. }) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            Some(RagError::Generation(_)) => (StatusCode::BAD_GATEWAY, "generation_failed"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        tracing::error!(%status, code, error = %message, "request failed");
        AppError {
            status,
            code,
            message,
        }
    }
}

fn session_or_default(session_id: Option<String>) -> String {
    match session_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => DEFAULT_SESSION.to_string(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    /// The crate version from `Cargo.toml`.
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    prompt: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct QueryResponse {
    answer: String,
    execution_time_sec: f64,
    session_id: String,
    history_depth: usize,
    time_retrieval_sec: f64,
    time_llm_sec: f64,
    sources: Vec<ChunkProvenance>,
}

fn round2(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}

async fn handle_query(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let Json(req) = body?;
    if req.prompt.trim().is_empty() {
        return Err(bad_request("prompt must not be empty"));
    }
    let session_id = session_or_default(req.session_id);

    let response = state.orchestrator.answer(&req.prompt, &session_id).await?;

    Ok(Json(QueryResponse {
        answer: response.answer,
        execution_time_sec: round2(response.timings.total.as_secs_f64()),
        session_id: response.session_id,
        history_depth: response.history_depth,
        time_retrieval_sec: round2(response.timings.retrieval.as_secs_f64()),
        time_llm_sec: round2(response.timings.generation.as_secs_f64()),
        sources: response.sources,
    }))
}

// ============ POST /reset ============

#[derive(Deserialize, Default)]
struct ResetRequest {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct ResetResponse {
    status: &'static str,
    message: String,
    session_id: String,
}

/// Always succeeds; an empty or unparseable body resets the default session.
async fn handle_reset(
    State(state): State<AppState>,
    body: Result<Json<ResetRequest>, JsonRejection>,
) -> Json<ResetResponse> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let session_id = session_or_default(req.session_id);
    state.orchestrator.reset(&session_id);

    Json(ResetResponse {
        status: "success",
        message: format!("History for session '{}' cleared.", session_id),
        session_id,
    })
}
