//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer `{ "query": "..." }` from the indexed PDFs |
//! | `POST` | `/upload` | Multipart PDF upload (field `files`, repeatable); appends to the index |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `index_unavailable` (503),
//! `internal` (500). Messages are plain text and never carry upstream API
//! bodies or internal error chains; those go to the log.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end
//! served from another origin can call the API.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use pagewise_core::models::Page;

use crate::answer::{AnswerOutcome, Citation};
use crate::config::Config;
use crate::extract::extract_pages;
use crate::pipeline::Pipeline;
use crate::retrieve::RetrieveError;

/// Largest accepted upload request body.
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Shared state for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub uploads_dir: Arc<PathBuf>,
}

/// Builds the pipeline from `config` and serves until the listener fails.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(config).await?);
    let state = AppState {
        pipeline,
        uploads_dir: Arc::new(config.storage.uploads_dir.clone()),
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;

    Ok(())
}

/// The application router, without binding a listener.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/upload", post(handle_upload))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
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

fn index_unavailable() -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "index_unavailable",
        message: "The document index is damaged and must be rebuilt before questions can be answered."
            .to_string(),
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
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    query: String,
}

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
    outcome: AnswerOutcome,
    citations: Vec<Citation>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let query = req.query.trim();
    if query.is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    match state.pipeline.answer(query).await {
        Ok(answer) => Ok(Json(ChatResponse {
            answer: answer.formatted(),
            outcome: answer.outcome,
            citations: answer.citations,
        })),
        Err(RetrieveError::IndexUnusable(reason)) => {
            tracing::error!(%reason, "refusing query against unusable index");
            Err(index_unavailable())
        }
        Err(e) => {
            tracing::error!(error = %e, "chat failed");
            Err(internal("failed to answer the query"))
        }
    }
}

// ============ POST /upload ============

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    message: String,
    files: Vec<String>,
    chunks_added: usize,
    documents_processed: usize,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut uploads: Vec<(String, Vec<u8>)> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        let Some(raw_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let name = sanitize_file_name(&raw_name)
            .ok_or_else(|| bad_request(format!("invalid file name: {:?}", raw_name)))?;
        if !name.to_lowercase().ends_with(".pdf") {
            return Err(bad_request(format!("only PDF files are accepted: {}", name)));
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read {}: {}", name, e)))?;
        uploads.push((name, data.to_vec()));
    }

    if uploads.is_empty() {
        return Err(bad_request("no files uploaded"));
    }

    tokio::fs::create_dir_all(state.uploads_dir.as_path())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "cannot create uploads directory");
            internal("failed to store uploaded files")
        })?;

    let mut files = Vec::with_capacity(uploads.len());
    let mut pages: Vec<Page> = Vec::new();
    for (name, data) in uploads {
        let path = state.uploads_dir.join(&name);
        tokio::fs::write(&path, &data).await.map_err(|e| {
            tracing::error!(file = %path.display(), error = %e, "cannot write upload");
            internal("failed to store uploaded files")
        })?;

        let source = name.clone();
        let extracted = tokio::task::spawn_blocking(move || extract_pages(&data, &source))
            .await
            .map_err(|e| internal(format!("extraction task failed: {}", e)))?
            .map_err(|e| {
                tracing::warn!(file = %name, error = %e, "PDF extraction failed");
                bad_request(format!("could not read text from {}", name))
            })?;
        pages.extend(extracted);
        files.push(name);
    }

    let report = state.pipeline.ingest(pages).await.map_err(|e| {
        tracing::error!(error = %format!("{:#}", e), "ingest failed");
        internal("failed to update the index")
    })?;

    Ok(Json(UploadResponse {
        success: true,
        message: format!("Uploaded {} files and updated index.", files.len()),
        files,
        chunks_added: report.chunks_added,
        documents_processed: report.documents_processed,
    }))
}

/// Reduce a client-supplied name to a bare file name safe to join onto the
/// uploads directory.
fn sanitize_file_name(raw: &str) -> Option<String> {
    let base = Path::new(raw.rsplit(['/', '\\']).next().unwrap_or(raw))
        .file_name()?
        .to_string_lossy()
        .to_string();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        None
    } else {
        Some(cleaned)
    }
}
