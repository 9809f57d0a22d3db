use std::{any::Any, sync::Arc, time::Instant};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{BatchGenerator, GeneratedImage, ModelDescriptor, ModelRegistry, RegistryService},
    packager::{ImagePackager, archive_file_name, image_file_name},
    session::{LatencySummary, StudioSession},
    zoo::{ModelCatalog, SampleSource},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<RegistryService>,
    pub generator: Arc<BatchGenerator>,
    pub packager: Arc<ImagePackager>,
    pub session: Arc<RwLock<StudioSession>>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        catalog: Arc<dyn ModelCatalog>,
        source: Arc<dyn SampleSource>,
    ) -> Self {
        Self {
            registry: Arc::new(RegistryService::new(catalog, config.registry_ttl)),
            generator: Arc::new(BatchGenerator::new(source, config.max_images)),
            packager: Arc::new(ImagePackager::new(config.image_cache_ttl)),
            session: Arc::new(RwLock::new(StudioSession::new())),
            config,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub model_id: String,
    pub num_images: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SelectModelRequest {
    pub model_id: String,
}

#[derive(Serialize)]
struct RegistryResponse {
    models: Vec<ModelDescriptor>,
    warnings: Vec<String>,
}

impl From<&ModelRegistry> for RegistryResponse {
    fn from(registry: &ModelRegistry) -> Self {
        Self {
            models: registry.descriptors().to_vec(),
            warnings: registry.warnings().to_vec(),
        }
    }
}

#[derive(Serialize)]
struct ImageEntry {
    index: usize,
    file_name: String,
    width: u32,
    height: u32,
}

#[derive(Serialize)]
struct GenerateResponse {
    model_id: String,
    requested: usize,
    images: Vec<ImageEntry>,
    archive_file_name: Option<String>,
    error: Option<String>,
    latency_per_image: Option<f64>,
}

#[derive(Serialize)]
struct SessionResponse {
    selected_model: Option<String>,
    images: Vec<ImageEntry>,
}

#[derive(Serialize)]
struct LatencyResponse {
    history: Vec<f64>,
    summary: Option<LatencySummary>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/models", get(list_models))
        .route("/models/refresh", post(refresh_models))
        .route("/models/:model_id", get(get_model))
        .route("/generate", post(generate))
        .route("/session", get(session_view).delete(reset_session))
        .route("/session/model", put(select_model))
        .route("/images/:index", get(download_image))
        .route("/archive", get(download_archive))
        .route("/metrics/latency", get(latency))
        .with_state(state)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn list_models(State(state): State<AppState>) -> Result<Json<RegistryResponse>, ServiceError> {
    let registry = state.registry.registry()?;
    Ok(Json(RegistryResponse::from(registry.as_ref())))
}

async fn refresh_models(
    State(state): State<AppState>,
) -> Result<Json<RegistryResponse>, ServiceError> {
    let registry = state.registry.refresh()?;
    info!(models = registry.len(), "model registry refreshed");
    Ok(Json(RegistryResponse::from(registry.as_ref())))
}

async fn get_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Result<Json<ModelDescriptor>, ServiceError> {
    let registry = state.registry.registry()?;
    registry
        .get(&model_id)
        .cloned()
        .map(Json)
        .ok_or(ServiceError::UnknownModel(model_id))
}

async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ServiceError> {
    let registry = state.registry.registry()?;
    if !registry.contains(&request.model_id) {
        return Err(ServiceError::UnknownModel(request.model_id));
    }

    let max = state.generator.max_images();
    let num_images = request.num_images.unwrap_or(state.config.default_num_images);
    if num_images == 0 || num_images > max {
        return Err(ServiceError::BadRequest(format!(
            "num_images must be between 1 and {max}"
        )));
    }

    let generator = state.generator.clone();
    let model_id = request.model_id;
    let start = Instant::now();
    let outcome = task::spawn_blocking(move || generator.generate_image_batch(&model_id, num_images))
        .await
        .map_err(|err| ServiceError::Task(err.to_string()))?;
    let elapsed = start.elapsed();

    let latency_per_image = state.session.write().record_batch(
        &outcome.model_id,
        outcome.images.clone(),
        elapsed,
        outcome.requested,
    );

    let images = image_entries(&outcome.model_id, &outcome.images);
    let archive = (!images.is_empty()).then(|| archive_file_name(&outcome.model_id));

    Ok(Json(GenerateResponse {
        model_id: outcome.model_id,
        requested: outcome.requested,
        images,
        archive_file_name: archive,
        error: outcome.error,
        latency_per_image,
    }))
}

/// Shows the current selection, defaulting to the first registry model.
async fn session_view(
    State(state): State<AppState>,
) -> Result<Json<SessionResponse>, ServiceError> {
    let registry = state.registry.registry()?;
    let mut session = state.session.write();
    if let Some(first) = registry.ids().next() {
        session.select_if_unset(first);
    }
    Ok(Json(session_response(&session)))
}

async fn select_model(
    State(state): State<AppState>,
    Json(request): Json<SelectModelRequest>,
) -> Result<Json<SessionResponse>, ServiceError> {
    let registry = state.registry.registry()?;
    if !registry.contains(&request.model_id) {
        return Err(ServiceError::UnknownModel(request.model_id));
    }

    let mut session = state.session.write();
    if session.select_model(&request.model_id) {
        info!(model_id = %request.model_id, "model selected");
    }
    Ok(Json(session_response(&session)))
}

async fn reset_session(State(state): State<AppState>) -> StatusCode {
    state.session.write().reset();
    info!("studio session reset");
    StatusCode::NO_CONTENT
}

async fn download_image(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Response, ServiceError> {
    let (model_id, image) = {
        let session = state.session.read();
        (
            session.selected_model().map(str::to_string),
            session.image(index).cloned(),
        )
    };
    let (Some(model_id), Some(image)) = (model_id, image) else {
        return Err(ServiceError::NotFound(format!("no generated image #{index}")));
    };

    let packager = state.packager.clone();
    let bytes = task::spawn_blocking(move || packager.img_to_bytes(&image))
        .await
        .map_err(|err| ServiceError::Task(err.to_string()))??;
    Ok(attachment(
        "image/png",
        &image_file_name(&model_id, index),
        bytes.as_ref().clone(),
    ))
}

async fn download_archive(State(state): State<AppState>) -> Result<Response, ServiceError> {
    let (model_id, images) = {
        let session = state.session.read();
        (
            session.selected_model().map(str::to_string),
            session.batch().to_vec(),
        )
    };
    let Some(model_id) = model_id.filter(|_| !images.is_empty()) else {
        return Err(ServiceError::NotFound("no generated images to archive".into()));
    };

    let packager = state.packager.clone();
    let prefix = model_id.clone();
    let archive = task::spawn_blocking(move || packager.create_zip(&images, &prefix))
        .await
        .map_err(|err| ServiceError::Task(err.to_string()))??;
    Ok(attachment(
        "application/zip",
        &archive_file_name(&model_id),
        archive,
    ))
}

async fn latency(State(state): State<AppState>) -> Json<LatencyResponse> {
    let session = state.session.read();
    Json(LatencyResponse {
        history: session.latency_history().to_vec(),
        summary: session.latency_summary(),
    })
}

fn session_response(session: &StudioSession) -> SessionResponse {
    let selected_model = session.selected_model().map(str::to_string);
    let images = selected_model
        .as_deref()
        .map(|model_id| image_entries(model_id, session.batch()))
        .unwrap_or_default();
    SessionResponse {
        selected_model,
        images,
    }
}

fn image_entries(model_id: &str, images: &[GeneratedImage]) -> Vec<ImageEntry> {
    images
        .iter()
        .enumerate()
        .map(|(idx, image)| ImageEntry {
            index: idx + 1,
            file_name: image_file_name(model_id, idx + 1),
            width: image.width(),
            height: image.height(),
        })
        .collect()
}

fn attachment(content_type: &'static str, file_name: &str, body: Vec<u8>) -> Response {
    let disposition = format!("attachment; filename=\"{file_name}\"");
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = err.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = err.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "handler panicked".to_string()
    };
    ServiceError::Unexpected(detail).into_response()
}
