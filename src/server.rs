//! HTTP API server.
//!
//! Exposes contract ingestion, question answering, clause analysis, and the
//! knowledge base over JSON (and multipart for PDF uploads).
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Liveness message |
//! | `GET`  | `/health` | Status, version, LLM configuration, endpoint list |
//! | `POST` | `/analyze` | Multipart PDF upload → clause analysis |
//! | `POST` | `/rag/add-contract` | Contract text → chunk and store |
//! | `POST` | `/rag/upload-contract` | Multipart PDF + name → extract, chunk, store |
//! | `POST` | `/rag/query` | Question (+ optional contract) → answer |
//! | `GET`  | `/rag/stats` | Contract collection stats and summaries |
//! | `POST` | `/rag/reset` | Reset the contract collection |
//! | `POST` | `/rag/analyze/{name}` | Clause analysis of a stored contract |
//! | `POST` | `/rag/knowledge/add` | Add a knowledge item |
//! | `POST` | `/rag/knowledge/search` | Filtered knowledge search |
//! | `GET`  | `/rag/knowledge/stats` | Knowledge stats with category counts |
//! | `POST` | `/rag/knowledge/reset` | Reset the knowledge collection |
//!
//! # Error Contract
//!
//! Successful responses carry `"success": true`. Errors look like:
//!
//! ```json
//! { "success": false, "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! | Code | Status | Cause |
//! |------|--------|-------|
//! | `bad_request` | 400 | Invalid input |
//! | `payload_too_large` | 413 | Upload exceeds the body limit |
//! | `not_found` | 404 | Unknown stored contract |
//! | `invalid_clause` | 422 | LLM clause missing or with an invalid field |
//! | `no_json_array` | 502 | LLM response had no JSON array |
//! | `malformed_json` | 502 | LLM response array did not parse |
//! | `upstream_error` | 502 | Store, embedding provider, LLM, or PDF extraction failed |
//! | `internal` | 500 | Unexpected server fault |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser frontend on
//! another port can call the API.

use std::sync::Arc;

use axum::{
    extract::{
        multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, Path,
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::analyzer::Analyzer;
use crate::clauses::ClauseError;
use crate::config::Config;
use crate::error::Error;
use crate::extract::{extract_pdf_text, is_pdf_filename, ExtractError};
use crate::knowledge::KnowledgeQuery;
use crate::models::NewKnowledgeItem;

/// Multipart framing allowance on top of `server.max_upload_bytes`.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

const ENDPOINTS: &[&str] = &[
    "/",
    "/health",
    "/analyze",
    "/rag/add-contract",
    "/rag/upload-contract",
    "/rag/query",
    "/rag/stats",
    "/rag/reset",
    "/rag/analyze/{name}",
    "/rag/knowledge/add",
    "/rag/knowledge/search",
    "/rag/knowledge/stats",
    "/rag/knowledge/reset",
];

#[derive(Clone)]
struct AppState {
    analyzer: Arc<Analyzer>,
}

/// Build the router for `analyzer`.
pub fn app(analyzer: Arc<Analyzer>) -> Router {
    let body_limit = analyzer.config().server.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;
    let state = AppState { analyzer };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/analyze", post(handle_analyze_upload))
        .route("/rag/add-contract", post(handle_add_contract))
        .route("/rag/upload-contract", post(handle_upload_contract))
        .route("/rag/query", post(handle_query))
        .route("/rag/stats", get(handle_stats))
        .route("/rag/reset", post(handle_reset))
        .route("/rag/analyze/{name}", post(handle_analyze_stored))
        .route("/rag/knowledge/add", post(handle_knowledge_add))
        .route("/rag/knowledge/search", post(handle_knowledge_search))
        .route("/rag/knowledge/stats", get(handle_knowledge_stats))
        .route("/rag/knowledge/reset", post(handle_knowledge_reset))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Build the analyzer from `config` and serve on `[server].bind` until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let analyzer = Arc::new(Analyzer::from_config(config).await?);

    if !analyzer.llm().is_configured() {
        tracing::warn!("ANTHROPIC_API_KEY is not set; LLM endpoints will fail");
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");
    println!("Contract analyzer listening on http://{}", config.server.bind);

    axum::serve(listener, app(analyzer)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn internal(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(message) => bad_request(message),
            Error::NotFound(message) => AppError::new(StatusCode::NOT_FOUND, "not_found", message),
            Error::Clause(clause) => {
                let message = clause.to_string();
                match clause {
                    ClauseError::NoArrayFound => {
                        AppError::new(StatusCode::BAD_GATEWAY, "no_json_array", message)
                    }
                    ClauseError::MalformedJson(_) => {
                        AppError::new(StatusCode::BAD_GATEWAY, "malformed_json", message)
                    }
                    ClauseError::MissingField { .. } | ClauseError::InvalidField { .. } => {
                        AppError::new(StatusCode::UNPROCESSABLE_ENTITY, "invalid_clause", message)
                    }
                }
            }
            Error::Upstream(source) => {
                AppError::new(StatusCode::BAD_GATEWAY, "upstream_error", format!("{:#}", source))
            }
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        let status = err.status();
        let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
            "payload_too_large"
        } else {
            "bad_request"
        };
        AppError::new(status, code, err.body_text())
    }
}

/// Unparseable or wrongly typed JSON bodies.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

/// Log a failed request and convert it.
fn fail(operation: &str, err: Error) -> AppError {
    match &err {
        Error::Upstream(_) => error!(operation, "request failed: {}", err),
        _ => tracing::debug!(operation, "request rejected: {}", err),
    }
    err.into()
}

type ApiResult = Result<Json<Value>, AppError>;

// ============ GET / and /health ============

async fn handle_root() -> Json<Value> {
    Json(json!({
        "message": "Smart Contract Analyzer API is running!",
        "status": "healthy",
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    anthropic_api: &'static str,
    endpoints: &'static [&'static str],
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        anthropic_api: if state.analyzer.llm().is_configured() {
            "connected"
        } else {
            "not configured"
        },
        endpoints: ENDPOINTS,
    })
}

// ============ Uploads ============

/// A file field plus any text fields from a multipart form.
struct UploadForm {
    filename: Option<String>,
    bytes: Vec<u8>,
    fields: Vec<(String, String)>,
}

impl UploadForm {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.trim().is_empty())
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm {
        filename: None,
        bytes: Vec::new(),
        fields: Vec::new(),
    };
    let mut saw_file = false;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            form.filename = field.file_name().map(str::to_string);
            form.bytes = field.bytes().await?.to_vec();
            saw_file = true;
        } else {
            let value = field.text().await?;
            form.fields.push((name, value));
        }
    }

    if !saw_file {
        return Err(bad_request("multipart field 'file' is required"));
    }
    Ok(form)
}

/// Validate an uploaded PDF and extract its text.
async fn pdf_text(state: &AppState, form: &UploadForm) -> Result<String, AppError> {
    let config = state.analyzer.config();

    match form.filename.as_deref() {
        Some(name) if is_pdf_filename(name) => {}
        _ => {
            return Err(bad_request(
                "Only PDF files are supported. Please upload a PDF document.",
            ))
        }
    }

    let max = config.server.max_upload_bytes;
    if form.bytes.len() > max {
        return Err(bad_request(format!(
            "File too large. Maximum size is {}MB",
            max / 1024 / 1024
        )));
    }
    info!(filename = ?form.filename, bytes = form.bytes.len(), "PDF received");

    let bytes = form.bytes.clone();
    let extracted = tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
        .await
        .map_err(|e| internal(format!("PDF extraction task failed: {}", e)))?;

    let text = match extracted {
        Ok(text) => text,
        Err(ExtractError::NotPdf(reason)) => {
            return Err(bad_request(format!("Uploaded file is not a valid PDF: {}", reason)))
        }
        Err(err @ ExtractError::Pdf(_)) => {
            return Err(fail("extract_pdf", Error::Upstream(anyhow::Error::new(err))))
        }
    };

    if text.trim().chars().count() < config.analysis.min_text_chars {
        return Err(bad_request(
            "Could not extract meaningful text from PDF. Please ensure it's a text-based PDF, not a scanned image.",
        ));
    }
    Ok(text)
}

// ============ POST /analyze ============

async fn handle_analyze_upload(State(state): State<AppState>, multipart: Multipart) -> ApiResult {
    let form = read_upload(multipart).await?;
    let text = pdf_text(&state, &form).await?;

    let analysis = state
        .analyzer
        .analyze_text(&text)
        .await
        .map_err(|e| fail("analyze", e))?;

    Ok(Json(json!({
        "success": true,
        "filename": form.filename,
        "extracted_text_length": text.chars().count(),
        "clauses_found": analysis.len(),
        "analysis": analysis,
    })))
}

// ============ /rag contracts ============

#[derive(Deserialize)]
struct AddContractRequest {
    contract_text: String,
    contract_name: String,
    #[serde(default)]
    contract_address: Option<String>,
    #[serde(default)]
    network: Option<String>,
}

async fn handle_add_contract(
    State(state): State<AppState>,
    body: Result<Json<AddContractRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = body?;
    let stats = state
        .analyzer
        .add_contract(
            &req.contract_text,
            &req.contract_name,
            req.contract_address.as_deref(),
            req.network.as_deref(),
        )
        .await
        .map_err(|e| fail("add_contract", e))?;

    Ok(Json(json!({
        "success": true,
        "message": "Contract added successfully",
        "stats": stats,
    })))
}

async fn handle_upload_contract(State(state): State<AppState>, multipart: Multipart) -> ApiResult {
    let form = read_upload(multipart).await?;
    let contract_name = form
        .field("contract_name")
        .ok_or_else(|| bad_request("multipart field 'contract_name' is required"))?
        .to_string();
    let text = pdf_text(&state, &form).await?;

    let stats = state
        .analyzer
        .add_contract(
            &text,
            &contract_name,
            form.field("contract_address"),
            form.field("network"),
        )
        .await
        .map_err(|e| fail("upload_contract", e))?;

    Ok(Json(json!({
        "success": true,
        "message": "Contract added successfully",
        "filename": form.filename,
        "extracted_text_length": text.chars().count(),
        "stats": stats,
    })))
}

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    #[serde(default)]
    contract_name: Option<String>,
}

async fn handle_query(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = body?;
    let answer = state
        .analyzer
        .query(&req.question, req.contract_name.as_deref())
        .await
        .map_err(|e| fail("query", e))?;

    Ok(Json(json!({ "success": true, "answer": answer })))
}

async fn handle_stats(State(state): State<AppState>) -> ApiResult {
    let stats = state
        .analyzer
        .contract_stats()
        .await
        .map_err(|e| fail("stats", e))?;

    Ok(Json(json!({ "success": true, "stats": stats })))
}

async fn handle_reset(State(state): State<AppState>) -> ApiResult {
    state
        .analyzer
        .reset_contracts()
        .await
        .map_err(|e| fail("reset", e))?;

    Ok(Json(json!({
        "success": true,
        "message": "Collection reset successfully",
    })))
}

async fn handle_analyze_stored(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult {
    let analysis = state
        .analyzer
        .analyze_stored(&name)
        .await
        .map_err(|e| fail("analyze_stored", e))?;

    Ok(Json(json!({
        "success": true,
        "contract_name": name,
        "clauses_found": analysis.len(),
        "analysis": analysis,
    })))
}

// ============ /rag/knowledge ============

async fn handle_knowledge_add(
    State(state): State<AppState>,
    body: Result<Json<NewKnowledgeItem>, JsonRejection>,
) -> ApiResult {
    let Json(item) = body?;
    let added = state
        .analyzer
        .knowledge()
        .add_item(item)
        .await
        .map_err(|e| fail("knowledge_add", e))?;

    Ok(Json(json!({
        "success": true,
        "message": "Knowledge item added successfully",
        "item": added,
    })))
}

async fn handle_knowledge_search(
    State(state): State<AppState>,
    body: Result<Json<KnowledgeQuery>, JsonRejection>,
) -> ApiResult {
    let Json(query) = body?;
    let results = state
        .analyzer
        .knowledge()
        .search(&query)
        .await
        .map_err(|e| fail("knowledge_search", e))?;

    Ok(Json(json!({ "success": true, "results": results })))
}

async fn handle_knowledge_stats(State(state): State<AppState>) -> ApiResult {
    let stats = state
        .analyzer
        .knowledge()
        .stats()
        .await
        .map_err(|e| fail("knowledge_stats", e))?;

    Ok(Json(json!({ "success": true, "stats": stats })))
}

async fn handle_knowledge_reset(State(state): State<AppState>) -> ApiResult {
    state
        .analyzer
        .knowledge()
        .reset()
        .await
        .map_err(|e| fail("knowledge_reset", e))?;

    Ok(Json(json!({
        "success": true,
        "message": "Knowledge base reset successfully",
    })))
}
