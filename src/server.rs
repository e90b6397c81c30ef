//! JSON HTTP API for the downstream agent layer.
//!
//! # Endpoints
//!
//! | Method | Path | Body | Description |
//! |--------|------|------|-------------|
//! | `GET`  | `/health` | | Status, version and index statistics |
//! | `POST` | `/search` | `{query, top_k?, rerank?, topic?}` | Ranked passages |
//! | `POST` | `/context` | `{query}` | Gated context block |
//! | `POST` | `/inject` | `{system_prompt, query}` | Prompt with context appended |
//! | `POST` | `/index` | `{path, force?, patterns?}` | Index a file or directory |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//! Degraded searches are not errors: they return `200` with an empty result
//! list and a `failure` code.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::engine::{Engine, EngineStats};
use crate::models::{IndexFileReport, IndexStats, InjectionResult, SearchResponse};
use crate::search::SearchOptions;

/// Build the router around a shared engine.
pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", post(handle_search))
        .route("/context", post(handle_context))
        .route("/inject", post(handle_inject))
        .route("/index", post(handle_index))
        .layer(cors)
        .with_state(engine)
}

/// Serve the API on `[server].bind` until the process is terminated.
pub async fn run_server(engine: Arc<Engine>) -> anyhow::Result<()> {
    let bind_addr = engine.config.server.bind.clone();
    let app = router(engine);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "retrieval API listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

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

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    stats: EngineStats,
}

async fn handle_health(State(engine): State<Arc<Engine>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        stats: engine.stats().await,
    })
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    top_k: Option<usize>,
    #[serde(default = "default_rerank")]
    rerank: bool,
    topic: Option<String>,
}

fn default_rerank() -> bool {
    true
}

async fn handle_search(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if req.top_k == Some(0) {
        return Err(bad_request("top_k must be at least 1"));
    }

    let options = SearchOptions {
        top_k: req.top_k,
        rerank: req.rerank,
        topic: req.topic.filter(|t| !t.trim().is_empty()),
    };
    Ok(Json(engine.search.search(&req.query, &options).await))
}

// ============ POST /context ============

#[derive(Deserialize)]
struct ContextRequest {
    query: String,
}

async fn handle_context(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<ContextRequest>,
) -> Json<InjectionResult> {
    Json(engine.injector.get_context_for_query(&req.query).await)
}

// ============ POST /inject ============

#[derive(Deserialize)]
struct InjectRequest {
    #[serde(default)]
    system_prompt: String,
    query: String,
}

#[derive(Serialize)]
struct InjectResponse {
    prompt: String,
    #[serde(flatten)]
    injection: InjectionResult,
}

async fn handle_inject(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<InjectRequest>,
) -> Json<InjectResponse> {
    let (prompt, injection) = engine
        .injector
        .inject_into_prompt(&req.system_prompt, &req.query)
        .await;
    Json(InjectResponse { prompt, injection })
}

// ============ POST /index ============

#[derive(Deserialize)]
struct IndexRequest {
    path: PathBuf,
    #[serde(default)]
    force: bool,
    patterns: Option<Vec<String>>,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum IndexResponse {
    File(IndexFileReport),
    Directory(IndexStats),
}

async fn handle_index(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, AppError> {
    if req.path.is_dir() {
        let stats = engine
            .indexer
            .index_directory(&req.path, req.patterns.as_deref(), req.force)
            .await
            .map_err(|e| internal(format!("{:#}", e)))?;
        Ok(Json(IndexResponse::Directory(stats)))
    } else if req.path.is_file() {
        let report = engine.indexer.index_file(&req.path, req.force).await;
        Ok(Json(IndexResponse::File(report)))
    } else {
        Err(not_found(format!("no such file or directory: {}", req.path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_shape() {
        let body = ErrorBody {
            error: ErrorDetail {
                code: "bad_request".into(),
                message: "query must not be empty".into(),
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"]["code"], "bad_request");
        assert_eq!(json["error"]["message"], "query must not be empty");
    }

    #[test]
    fn test_search_request_defaults() {
        let req: SearchRequest = serde_json::from_str(r#"{"query": "docker"}"#).unwrap();
        assert!(req.rerank);
        assert!(req.top_k.is_none());
        assert!(req.topic.is_none());
    }

    #[test]
    fn test_index_response_is_tagged() {
        let json = serde_json::to_value(IndexResponse::Directory(IndexStats::default())).unwrap();
        assert_eq!(json["kind"], "directory");
        assert_eq!(json["total_files"], 0);
    }
}
