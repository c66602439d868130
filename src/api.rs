use std::{
    fs,
    path::{Path, PathBuf},
    sync::PoisonError,
};

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::spawn;
use tracing::{error, info};

use crate::{
    app_state::{AppState, Status},
    error::RagError,
    ingest::IngestMode,
    models::{AgentAnswer, FileEntry, QueryResult, SourcePreview, PREVIEW_CHARS},
    tools,
    vector_store::load_docs_meta,
};

type ApiError = (StatusCode, Json<Value>);

// --- Payloads de la API ---

#[derive(Deserialize, Default)]
pub struct IngestPayload {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    mode: IngestMode,
}

#[derive(Deserialize)]
pub struct RagQueryPayload {
    question: String,
    #[serde(default)]
    k: Option<usize>,
}

#[derive(Deserialize)]
pub struct AgentPayload {
    question: String,
}

/// Resultado RAG completo más una vista recortada de cada fuente.
#[derive(Serialize)]
pub struct RagQueryResponse {
    #[serde(flatten)]
    result: QueryResult,
    sources: Vec<SourcePreview>,
}

impl From<QueryResult> for RagQueryResponse {
    fn from(result: QueryResult) -> Self {
        let sources = result.source_previews(PREVIEW_CHARS);
        Self { result, sources }
    }
}

#[derive(Deserialize)]
pub struct AnalyzePayload {
    values: Value,
    #[serde(default)]
    threshold: Option<f64>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/ingest", post(ingest_handler))
        .route("/api/rag-query", post(rag_query_handler))
        .route("/api/agent", post(agent_handler))
        .route("/api/status", get(status_handler))
        .route("/api/docs-meta", get(docs_meta_handler))
        .route("/api/files", get(files_handler))
        .route("/api/stats", post(stats_handler))
        .route("/api/analyze", post(analyze_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

/// Traduce la taxonomía de errores del núcleo a respuestas HTTP.
fn rag_error_response(err: RagError) -> ApiError {
    let status = match &err {
        RagError::NotFound(_) | RagError::IndexNotFound(_) => StatusCode::NOT_FOUND,
        RagError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        RagError::ConfigMismatch { .. } | RagError::IndexCorrupt { .. } => StatusCode::CONFLICT,
        RagError::Provider { .. } => StatusCode::BAD_GATEWAY,
        RagError::Io(_) | RagError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() })))
}

// --- Handlers ---

#[axum::debug_handler]
async fn ingest_handler(
    State(state): State<AppState>,
    payload: Option<Json<IngestPayload>>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload.unwrap_or_default();
    let root_dir = payload
        .path
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| state.config.data_dir.clone());

    if !root_dir.is_dir() {
        return Err(rag_error_response(RagError::NotFound(root_dir)));
    }

    {
        let mut status = state.status.lock().unwrap_or_else(PoisonError::into_inner);
        if status.is_busy {
            return Err((
                StatusCode::CONFLICT,
                Json(json!({"error": "Ya hay una indexación en curso."})),
            ));
        }
        status.is_busy = true;
        status.message = "Iniciando indexación...".to_string();
        status.progress = 0.0;
    }

    spawn(async move {
        let result = state
            .rag
            .ingest(&root_dir, payload.mode, state.status.clone())
            .await;

        let mut status = state.status.lock().unwrap_or_else(PoisonError::into_inner);
        status.is_busy = false;
        status.progress = 0.0;
        match result {
            Ok(report) => {
                status.message = format!("¡Indexación completada! {}", report);
            }
            Err(err) => {
                status.message = format!("Error en la indexación: {}", err);
                error!("Error de ingesta: {}", err);
            }
        }
    });

    Ok(StatusCode::ACCEPTED)
}

#[axum::debug_handler]
async fn rag_query_handler(
    State(state): State<AppState>,
    Json(payload): Json<RagQueryPayload>,
) -> Result<Json<RagQueryResponse>, ApiError> {
    let k = payload.k.unwrap_or_else(|| state.rag.default_top_k());
    state
        .rag
        .retrieve_and_answer(&payload.question, k)
        .await
        .map(|result| Json(result.into()))
        .map_err(|e| {
            error!("Error al procesar la consulta RAG: {}", e);
            rag_error_response(e)
        })
}

#[axum::debug_handler]
async fn agent_handler(
    State(state): State<AppState>,
    Json(payload): Json<AgentPayload>,
) -> Result<Json<AgentAnswer>, ApiError> {
    state
        .rag
        .agent_answer(&payload.question)
        .await
        .map(Json)
        .map_err(rag_error_response)
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status.lock().unwrap_or_else(PoisonError::into_inner).clone())
}

#[axum::debug_handler]
async fn docs_meta_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    docs_meta_body(state.rag.store().root()).map(Json)
}

/// Manifiesto de la generación confirmada en disco.
fn docs_meta_body(index_dir: &Path) -> Result<Value, ApiError> {
    let items = load_docs_meta(index_dir).map_err(rag_error_response)?;
    Ok(json!({ "count": items.len(), "items": items }))
}

#[axum::debug_handler]
async fn files_handler(State(state): State<AppState>) -> Result<Json<Vec<FileEntry>>, ApiError> {
    let dir = &state.config.data_dir;
    if !dir.is_dir() {
        return Ok(Json(Vec::new()));
    }
    let mut files: Vec<FileEntry> = fs::read_dir(dir)
        .map_err(|e| rag_error_response(RagError::Io(e)))?
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            meta.is_file().then(|| FileEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                size_bytes: meta.len(),
            })
        })
        .collect();
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(files))
}

/// Acepta `[1,2,3]`, `"[1,2,3]"` o `{"values": ...}`.
#[axum::debug_handler]
async fn stats_handler(Json(payload): Json<Value>) -> Result<Json<tools::Stats>, ApiError> {
    let raw = match payload {
        Value::Object(mut map) => map.remove("values").unwrap_or(Value::Null),
        other => other,
    };
    tools::parse_values(&raw)
        .and_then(|values| tools::compute_stats(&values))
        .map(Json)
        .map_err(rag_error_response)
}

#[axum::debug_handler]
async fn analyze_handler(
    Json(payload): Json<AnalyzePayload>,
) -> Result<Json<tools::VmAnalysis>, ApiError> {
    let threshold = payload.threshold.unwrap_or(tools::DEFAULT_RULE_THRESHOLD);
    tools::parse_values(&payload.values)
        .and_then(|values| tools::analyze_vm_data(&values, threshold))
        .map(Json)
        .map_err(rag_error_response)
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
    {
        let _ = sender.send(());
    }
    StatusCode::OK
}
