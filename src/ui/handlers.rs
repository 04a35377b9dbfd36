//! HTTP API handlers

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::app::{AppStatus, LoadReport};
use crate::audio::device::{list_output_devices, OutputDeviceInfo};
use crate::config::LoadSelection;
use crate::effects::{EffectConfig, EffectId};
use crate::error::EffectError;
use crate::schema::CatalogEntry;
use crate::state::EffectRuntime;
use crate::ui::server::AppState;

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

fn effect_error<T>(e: EffectError) -> Reply<T> {
    let status = match e {
        EffectError::NotFound(_) => StatusCode::NOT_FOUND,
        EffectError::AlreadyExists(_) => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, Json(ApiResponse::error(e.to_string())))
}

/// System status
#[derive(Serialize)]
pub struct SystemStatus {
    pub source: Option<String>,
    pub uptime_seconds: u64,
    #[serde(flatten)]
    pub app: AppStatus,
}

/// Get system status. The app lock may be held by a device or source swap,
/// so it is taken off the async threads.
pub async fn get_status(State(state): State<Arc<AppState>>) -> Reply<SystemStatus> {
    let result = tokio::task::spawn_blocking(move || {
        let app = state.app.lock().status();
        SystemStatus {
            source: state.shared.source_name(),
            uptime_seconds: state.started.elapsed().as_secs(),
            app,
        }
    })
    .await;

    match result {
        Ok(status) => (StatusCode::OK, Json(ApiResponse::ok(status))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Get available output devices
pub async fn get_devices() -> Json<ApiResponse<Vec<OutputDeviceInfo>>> {
    Json(ApiResponse::ok(list_output_devices()))
}

/// Fields of the active source, for selection inputs
pub async fn get_catalog(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<CatalogEntry>>> {
    Json(ApiResponse::ok(state.shared.catalog()))
}

/// Output channel names of the open device
pub async fn get_channels(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<String>>> {
    Json(ApiResponse::ok(state.shared.channels()))
}

/// Effect configuration with its live state
#[derive(Serialize)]
pub struct EffectStatus {
    #[serde(flatten)]
    pub config: EffectConfig,
    pub runtime: Option<EffectRuntime>,
    pub fault: Option<String>,
}

/// Get all effects in order
pub async fn get_effects(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<EffectStatus>>> {
    let effects = state
        .shared
        .effects()
        .into_iter()
        .map(|config| EffectStatus {
            runtime: state.shared.runtime(config.id),
            fault: state.shared.fault(config.id),
            config,
        })
        .collect();
    Json(ApiResponse::ok(effects))
}

/// Create a new effect
pub async fn create_effect(
    State(state): State<Arc<AppState>>,
    Json(config): Json<EffectConfig>,
) -> Reply<EffectId> {
    let id = config.id;
    match state.shared.add_effect(config) {
        Ok(()) => (StatusCode::CREATED, Json(ApiResponse::ok(id))),
        Err(e) => effect_error(e),
    }
}

/// Replace an effect's configuration
pub async fn update_effect(
    State(state): State<Arc<AppState>>,
    Path(id): Path<EffectId>,
    Json(mut config): Json<EffectConfig>,
) -> Reply<()> {
    config.id = id;
    match state.shared.update_effect(config) {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok(()))),
        Err(e) => effect_error(e),
    }
}

/// Delete an effect
pub async fn delete_effect(
    State(state): State<Arc<AppState>>,
    Path(id): Path<EffectId>,
) -> Reply<()> {
    match state.shared.remove_effect(id) {
        Ok(_) => (StatusCode::OK, Json(ApiResponse::ok(()))),
        Err(e) => effect_error(e),
    }
}

/// Recent aggregated inputs of an effect, oldest first
pub async fn get_plot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<EffectId>,
) -> Reply<Vec<f64>> {
    if state.shared.effect(id).is_none() {
        return effect_error(EffectError::NotFound(id));
    }
    (StatusCode::OK, Json(ApiResponse::ok(state.shared.plot_samples(id))))
}

#[derive(Deserialize)]
pub struct RecordingRequest {
    pub enabled: bool,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Start or stop recording; stopping answers with the written file
pub async fn set_recording(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RecordingRequest>,
) -> Reply<Option<String>> {
    let result = tokio::task::spawn_blocking(move || {
        state.app.lock().set_recording(req.enabled, req.path)
    })
    .await;

    match result {
        Ok(Ok(path)) => (
            StatusCode::OK,
            Json(ApiResponse::ok(path.map(|p| p.display().to_string()))),
        ),
        Ok(Err(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

#[derive(Deserialize)]
pub struct SourceRequest {
    pub name: String,
}

/// Switch the telemetry source
pub async fn set_source(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SourceRequest>,
) -> Reply<()> {
    let result =
        tokio::task::spawn_blocking(move || state.app.lock().select_source(&req.name)).await;
    blocking_reply(result)
}

#[derive(Deserialize)]
pub struct AudioRequest {
    /// Device name; the host default when absent
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub block_size: Option<u32>,
}

/// Reopen the output stream on another device and/or block size
pub async fn set_audio(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AudioRequest>,
) -> Reply<()> {
    let result = tokio::task::spawn_blocking(move || {
        state
            .app
            .lock()
            .configure_audio(req.device.as_deref(), req.block_size)
    })
    .await;
    blocking_reply(result)
}

fn blocking_reply(
    result: Result<crate::Result<()>, tokio::task::JoinError>,
) -> Reply<()> {
    match result {
        Ok(Ok(())) => (StatusCode::OK, Json(ApiResponse::ok(()))),
        Ok(Err(e)) => (StatusCode::BAD_REQUEST, Json(ApiResponse::error(e.to_string()))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

#[derive(Deserialize)]
pub struct LoadSettingsRequest {
    pub path: PathBuf,
    #[serde(default)]
    pub selection: LoadSelection,
}

/// Apply a settings file; unresolved names come back as warnings
pub async fn load_settings(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoadSettingsRequest>,
) -> Reply<LoadReport> {
    let result = tokio::task::spawn_blocking(move || {
        state.app.lock().load_settings(&req.path, req.selection)
    })
    .await;

    match result {
        Ok(Ok(report)) => (StatusCode::OK, Json(ApiResponse::ok(report))),
        Ok(Err(e)) => (StatusCode::BAD_REQUEST, Json(ApiResponse::error(e.to_string()))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

#[derive(Deserialize)]
pub struct SaveSettingsRequest {
    pub path: PathBuf,
}

/// Save source, device and effects to a settings file
pub async fn save_settings(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SaveSettingsRequest>,
) -> Reply<()> {
    let result =
        tokio::task::spawn_blocking(move || state.app.lock().save_settings(&req.path)).await;
    blocking_reply(result)
}
