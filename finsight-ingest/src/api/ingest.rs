//! Image upload endpoint
//!
//! The synchronous half of the pipeline: a device posts a frame, the
//! vision provider is consulted inline, and the reply tells the device
//! whether fish were found. Everything after that (cutting, enrichment,
//! sighting) happens asynchronously behind the queue.

use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;

use crate::db::sightings;
use crate::error::{ApiError, ApiResult};
use crate::AppState;
use finsight_common::events::PipelineEvent;

/// Upload reply, in the device firmware's field convention.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub fish_detected: bool,
    /// Detections that passed the filter
    pub detections: usize,
    /// Storage key of the raw image, present only when dispatched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_key: Option<String>,
}

/// POST /ingest/:device_id
///
/// Analyze an uploaded frame. When confident fish detections come back
/// the image is stored and a cutting job queued; otherwise the image is
/// discarded and the device is told nothing was found.
pub async fn upload_image(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<UploadResponse>> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("Empty image body".to_string()));
    }

    if sightings::get_device(&state.db, &device_id).await?.is_none() {
        return Err(ApiError::NotFound(format!(
            "Device not registered: {}",
            device_id
        )));
    }

    let detections = state.detection_filter.detect(&body).await?;

    if detections.is_empty() {
        tracing::debug!(device_id = %device_id, "No fish detected in upload");
        state.event_bus.emit_lossy(PipelineEvent::NoFishDetected {
            device_id: device_id.clone(),
            timestamp: Utc::now(),
        });
        return Ok(Json(UploadResponse {
            fish_detected: false,
            detections: 0,
            raw_key: None,
        }));
    }

    let receipt = state
        .cut_dispatcher
        .dispatch(&device_id, detections, &body)
        .await?;

    Ok(Json(UploadResponse {
        fish_detected: true,
        detections: receipt.detections,
        raw_key: Some(receipt.raw_key),
    }))
}

/// Build ingest routes
pub fn ingest_routes() -> Router<AppState> {
    Router::new().route("/ingest/:device_id", post(upload_image))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_response_uses_firmware_field_names() {
        let with_key = serde_json::to_value(UploadResponse {
            fish_detected: true,
            detections: 2,
            raw_key: Some("pre-cut/a.jpg".to_string()),
        })
        .unwrap();
        assert_eq!(with_key["fishDetected"], true);
        assert_eq!(with_key["detections"], 2);
        assert_eq!(with_key["rawKey"], "pre-cut/a.jpg");

        let without = serde_json::to_value(UploadResponse {
            fish_detected: false,
            detections: 0,
            raw_key: None,
        })
        .unwrap();
        assert!(without.get("rawKey").is_none());
    }
}
