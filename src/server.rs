//! HTTP API.
//!
//! Exposes ingestion, question answering, and index inspection as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest` | Ingest a base64-encoded document |
//! | `POST` | `/ask` | Answer a question with validated citations |
//! | `GET`  | `/chunks/{id}` | Chunk text and page span |
//! | `GET`  | `/documents` | List indexed documents |
//! | `GET`  | `/documents/{id}` | One document summary |
//! | `DELETE` | `/documents/{id}` | Remove a document |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question is empty" } }
//! ```
//!
//! | Code | Status | Cause |
//! |------|--------|-------|
//! | `bad_request` | 400 | invalid query, bad payload, extraction or normalization failure |
//! | `unsupported_format` | 415 | no extractor for the format hint |
//! | `not_found` | 404 | unknown chunk or document |
//! | `cancelled` | 499 | query cancelled |
//! | `upstream_error` | 502 | embedding or generation provider failed |
//! | `index_unavailable` | 503 | the index could not serve the request |
//! | `timeout` | 504 | provider deadline exceeded after retries |
//! | `no_relevant_evidence` | 422 | nothing passed the similarity cutoff (outside `/ask`) |
//! | `citation_validation` | 422 | an answer failed validation and could not be degraded |
//!
//! A query with no relevant evidence is not an error: `/ask` answers `200`
//! with `"status": "no_relevant_evidence"` and no answer text.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use paper_copilot_core::models::{Answer, Chunk, DocumentSummary, QueryMode};
use paper_copilot_core::CopilotError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::copilot::Copilot;
use crate::ingest::IngestReport;

#[derive(Clone)]
struct AppState {
    copilot: Arc<Copilot>,
}

/// Build the API router around an existing [`Copilot`].
pub fn router(copilot: Arc<Copilot>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ingest", post(handle_ingest))
        .route("/ask", post(handle_ask))
        .route("/chunks/{id}", get(handle_get_chunk))
        .route("/documents", get(handle_list_documents))
        .route(
            "/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { copilot })
}

/// Open the configured index and providers and serve until terminated.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let copilot = Arc::new(Copilot::from_config(config).await?);
    let app = router(copilot);

    info!(bind = %bind_addr, "HTTP server listening");
    println!("Paper Copilot listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
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

fn app_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

impl From<CopilotError> for AppError {
    fn from(err: CopilotError) -> Self {
        let message = err.to_string();
        match err {
            CopilotError::InvalidQuery(_)
            | CopilotError::Extraction(_)
            | CopilotError::Normalization(_)
            | CopilotError::EmptyDocument { .. } => bad_request(message),
            CopilotError::UnsupportedFormat(_) => app_error(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported_format",
                message,
            ),
            CopilotError::NotFound(_) => app_error(StatusCode::NOT_FOUND, "not_found", message),
            CopilotError::Cancelled { .. } => app_error(
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
                "cancelled",
                message,
            ),
            CopilotError::Embedding { .. } | CopilotError::Generation { .. } => {
                app_error(StatusCode::BAD_GATEWAY, "upstream_error", message)
            }
            CopilotError::IndexUnavailable(_) => {
                app_error(StatusCode::SERVICE_UNAVAILABLE, "index_unavailable", message)
            }
            CopilotError::Timeout { .. } => {
                app_error(StatusCode::GATEWAY_TIMEOUT, "timeout", message)
            }
            // `/ask` turns no-evidence into a 200 body and the dispatcher
            // degrades rejected answers, so these only arrive from other callers.
            CopilotError::NoRelevantEvidence { .. } => app_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "no_relevant_evidence",
                message,
            ),
            CopilotError::CitationValidation { .. } => app_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "citation_validation",
                message,
            ),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    /// Raw document bytes, standard base64.
    content_base64: String,
    /// Format name, extension, filename, or MIME type.
    format: String,
    #[serde(default)]
    title: Option<String>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestReport>, AppError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(req.content_base64.as_bytes())
        .map_err(|e| bad_request(format!("content_base64 is not valid base64: {}", e)))?;
    let report = state
        .copilot
        .ingest(&bytes, &req.format, req.title)
        .await
        .map_err(|e| {
            warn!(error = %e, "ingest request failed");
            AppError::from(e)
        })?;
    Ok(Json(report))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    scope: Option<Vec<String>>,
}

#[derive(Serialize)]
struct NoEvidenceResponse {
    status: &'static str,
    query_id: String,
    message: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Response, AppError> {
    let mode = match req.mode.as_deref() {
        Some(m) => m.parse::<QueryMode>()?,
        None => QueryMode::Standard,
    };

    match state.copilot.ask(&req.question, mode, req.scope).await {
        Ok(answer) => Ok(Json::<Answer>(answer).into_response()),
        Err(CopilotError::NoRelevantEvidence { query_id }) => Ok(Json(NoEvidenceResponse {
            status: "no_relevant_evidence",
            query_id,
            message: "No passage in the indexed papers is relevant enough to answer this question."
                .to_string(),
        })
        .into_response()),
        Err(e) => {
            warn!(error = %e, "ask request failed");
            Err(e.into())
        }
    }
}

// ============ GET /chunks/{id} ============

async fn handle_get_chunk(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Chunk>, AppError> {
    Ok(Json(state.copilot.get_chunk(&id).await?))
}

// ============ /documents ============

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<DocumentSummary>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
) -> Result<Json<DocumentListResponse>, AppError> {
    let documents = state.copilot.list_documents().await?;
    Ok(Json(DocumentListResponse { documents }))
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentSummary>, AppError> {
    Ok(Json(state.copilot.get_document(&id).await?))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.copilot.delete_document(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
