// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! HTTP API — served once every artifact has been reassembled.
//!
//! Endpoints:
//!   GET  /                                  → liveness text
//!   GET  /api/health                        → {"status":"ok"}
//!   GET  /api/classes?model_name=resnet-50  → label map (JSON)
//!   GET  /api/artifacts                     → reassembled artifact status
//!   POST /api/detect            image, model_name     → one prediction
//!   POST /api/detect/batch      images*, model_name   → list of predictions
//!   POST /api/detect/all        image                 → prediction per model
//!   POST /api/detect/batch/all  images*               → list per model

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::assembly::ArtifactStatus;
use crate::error::{DefectError, Result};
use crate::models::{ModelKind, ModelRegistry, Prediction};

/// Uploads larger than this are rejected before reaching a handler.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Shared state passed to all handlers.
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub artifacts: Vec<ArtifactStatus>,
}

// ──────────────── request / response types ────────────────────────────────

#[derive(Deserialize)]
pub struct ClassesParams {
    #[serde(default)]
    model_name: String,
}

#[derive(Serialize)]
struct ClassesResponse {
    classes: BTreeMap<usize, &'static str>,
}

#[derive(Serialize)]
struct ArtifactsResponse<'a> {
    artifacts: &'a [ArtifactStatus],
    total: usize,
}

struct Upload {
    filename: String,
    data: Bytes,
}

/// Fields collected from a multipart detection request.
#[derive(Default)]
struct DetectForm {
    image: Option<Upload>,
    images: Vec<Upload>,
    model_name: Option<String>,
}

// ──────────────── router ──────────────────────────────────────────────────

/// Build the axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/api/health", get(handle_health))
        .route("/api/classes", get(handle_classes))
        .route("/api/artifacts", get(handle_artifacts))
        .route("/api/detect", post(handle_detect))
        .route("/api/detect/batch", post(handle_detect_batch))
        .route("/api/detect/all", post(handle_detect_all))
        .route("/api/detect/batch/all", post(handle_detect_batch_all))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server. Returns only on bind or serve failure.
pub async fn start_server(state: Arc<AppState>, port: u16) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = format!("0.0.0.0:{}", port);

    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        error!(error = %e, port, "Failed to bind HTTP server");
        e
    })?;
    info!(port, "HTTP API listening on http://{}", addr);

    axum::serve(listener, app).await.map_err(|e| {
        error!(error = %e, "HTTP server error");
        e
    })
}

// ──────────────── helpers ─────────────────────────────────────────────────

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Map a library error onto a status code and JSON body.
fn failure(context: &str, e: DefectError) -> Response {
    let status = match e {
        DefectError::UnknownModel { .. } => StatusCode::BAD_REQUEST,
        DefectError::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error!(error = %e, "Error in {context}");
    error_response(status, e.to_string())
}

async fn read_form(mut multipart: Multipart) -> std::result::Result<DetectForm, Response> {
    let bad = |e: axum::extract::multipart::MultipartError| {
        error_response(StatusCode::BAD_REQUEST, format!("Malformed multipart body: {e}"))
    };

    let mut form = DetectForm::default();
    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" | "images" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(bad)?;
                let upload = Upload { filename, data };
                if name == "image" {
                    form.image.get_or_insert(upload);
                } else {
                    form.images.push(upload);
                }
            }
            "model_name" => form.model_name = Some(field.text().await.map_err(bad)?),
            _ => {}
        }
    }
    Ok(form)
}

/// Classify uploads with one model on the blocking pool.
async fn classify_uploads(
    registry: Arc<ModelRegistry>,
    kind: ModelKind,
    model: String,
    uploads: Arc<Vec<Upload>>,
) -> Result<Vec<Prediction>> {
    tokio::task::spawn_blocking(move || {
        uploads
            .iter()
            .map(|u| registry.classify(kind, &model, &u.filename, &u.data))
            .collect()
    })
    .await
    .map_err(|e| DefectError::Inference(format!("inference task failed: {e}")))?
}

/// Run every registered model over the same uploads, keyed by display name.
async fn classify_all(
    registry: Arc<ModelRegistry>,
    uploads: Arc<Vec<Upload>>,
) -> Result<BTreeMap<&'static str, Vec<Prediction>>> {
    let mut results = BTreeMap::new();
    for kind in registry.kinds() {
        let name = kind.display_name();
        let preds = classify_uploads(registry.clone(), kind, name.to_string(), uploads.clone()).await?;
        results.insert(name, preds);
    }
    Ok(results)
}

// ──────────────── handlers ────────────────────────────────────────────────

async fn handle_index() -> &'static str {
    "Backend is running!"
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn handle_classes(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ClassesParams>,
) -> Response {
    match state.registry.resolve(&params.model_name) {
        Ok(kind) => Json(ClassesResponse { classes: kind.label_map() }).into_response(),
        Err(_) => error_response(StatusCode::BAD_REQUEST, "Invalid model name"),
    }
}

async fn handle_artifacts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ArtifactsResponse {
        artifacts: &state.artifacts,
        total: state.artifacts.len(),
    })
    .into_response()
}

async fn handle_detect(State(state): State<Arc<AppState>>, multipart: Multipart) -> Response {
    let form = match read_form(multipart).await {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let (Some(image), Some(model_name)) = (form.image, form.model_name) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing image or model_name");
    };
    let kind = match state.registry.resolve(&model_name) {
        Ok(k) => k,
        Err(e) => return failure("detect_single", e),
    };

    match classify_uploads(state.registry.clone(), kind, model_name, Arc::new(vec![image])).await {
        Ok(mut preds) => match preds.pop() {
            Some(pred) => Json(pred).into_response(),
            None => error_response(StatusCode::INTERNAL_SERVER_ERROR, "No prediction produced"),
        },
        Err(e) => failure("detect_single", e),
    }
}

async fn handle_detect_batch(State(state): State<Arc<AppState>>, multipart: Multipart) -> Response {
    let form = match read_form(multipart).await {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let Some(model_name) = form.model_name.filter(|_| !form.images.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing images or model_name");
    };
    let kind = match state.registry.resolve(&model_name) {
        Ok(k) => k,
        Err(e) => return failure("detect_batch", e),
    };

    let count = form.images.len();
    match classify_uploads(state.registry.clone(), kind, model_name, Arc::new(form.images)).await {
        Ok(preds) => {
            info!(model = %kind, images = count, "Batch classified");
            Json(preds).into_response()
        }
        Err(e) => failure("detect_batch", e),
    }
}

async fn handle_detect_all(State(state): State<Arc<AppState>>, multipart: Multipart) -> Response {
    let form = match read_form(multipart).await {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let Some(image) = form.image else {
        return error_response(StatusCode::BAD_REQUEST, "Missing image");
    };

    match classify_all(state.registry.clone(), Arc::new(vec![image])).await {
        Ok(results) => {
            let single: BTreeMap<&str, Prediction> = results
                .into_iter()
                .filter_map(|(name, mut preds)| preds.pop().map(|p| (name, p)))
                .collect();
            Json(single).into_response()
        }
        Err(e) => failure("detect_all_models_single", e),
    }
}

async fn handle_detect_batch_all(State(state): State<Arc<AppState>>, multipart: Multipart) -> Response {
    let form = match read_form(multipart).await {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    if form.images.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Missing images");
    }

    match classify_all(state.registry.clone(), Arc::new(form.images)).await {
        Ok(results) => Json(results).into_response(),
        Err(e) => failure("detect_all_models_batch", e),
    }
}
