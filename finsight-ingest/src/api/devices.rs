//! Device registration and sighting history endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::db::sightings;
use crate::error::{ApiError, ApiResult};
use crate::models::{Device, SightingWithEntry};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    pub device_id: String,
}

/// POST /devices
///
/// Register a device by its client-chosen identifier. Registration is
/// first-come: re-registering an existing identifier is a conflict.
pub async fn register_device(
    State(state): State<AppState>,
    Json(request): Json<RegisterDeviceRequest>,
) -> ApiResult<(StatusCode, Json<Device>)> {
    let (device, created) = sightings::register_device(&state.db, &request.device_id).await?;

    if !created {
        return Err(ApiError::Conflict(format!(
            "Device already registered: {}",
            device.device_id
        )));
    }

    tracing::info!(device_id = %device.device_id, "Device registered");
    Ok((StatusCode::CREATED, Json(device)))
}

/// GET /devices/:device_id
pub async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<Device>> {
    let device = sightings::get_device(&state.db, &device_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Device not registered: {}", device_id)))?;

    Ok(Json(device))
}

/// GET /devices/:device_id/sightings
///
/// The device's sighting history, newest first, each joined with its
/// catalog entry's name and family.
pub async fn list_sightings(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<Vec<SightingWithEntry>>> {
    if sightings::get_device(&state.db, &device_id).await?.is_none() {
        return Err(ApiError::NotFound(format!(
            "Device not registered: {}",
            device_id
        )));
    }

    let history = sightings::sightings_for_device(&state.db, &device_id).await?;
    Ok(Json(history))
}

/// Build device routes
pub fn device_routes() -> Router<AppState> {
    Router::new()
        .route("/devices", post(register_device))
        .route("/devices/:device_id", get(get_device))
        .route("/devices/:device_id/sightings", get(list_sightings))
}
