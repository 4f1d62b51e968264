//! Species catalog endpoints
//!
//! The catalog is written by the enrichment worker on the hot path, but
//! it is also exposed for direct use: operators can pre-seed species,
//! and integrations can record sightings against known entries without
//! going through an image upload.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use crate::db::{catalog, sightings};
use crate::error::{ApiError, ApiResult};
use crate::models::{CatalogEntry, CatalogEntryDetails, SightingOutcome, SpeciesProfile};
use crate::AppState;

/// GET /catalog
///
/// All entries, newest first.
pub async fn list_catalog(State(state): State<AppState>) -> ApiResult<Json<Vec<CatalogEntry>>> {
    let entries = catalog::list_entries(&state.db).await?;
    Ok(Json(entries))
}

/// GET /catalog/:name
///
/// One entry with its colors, predators, and fun facts. Lookup is by
/// exact name, the catalog's deduplication key.
pub async fn get_catalog_entry(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<CatalogEntryDetails>> {
    let details = catalog::fetch_details(&state.db, &name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No catalog entry named: {}", name)))?;

    Ok(Json(details))
}

/// POST /catalog
///
/// Find-or-create an entry from a species profile. Replies 201 when
/// this call created the entry and 200 when the name already existed;
/// either way the body is the surviving entry.
pub async fn create_catalog_entry(
    State(state): State<AppState>,
    Json(profile): Json<SpeciesProfile>,
) -> ApiResult<(StatusCode, Json<CatalogEntry>)> {
    if profile.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Species name is required".to_string()));
    }

    let (entry, created) = catalog::find_or_create(&state.db, &profile).await?;

    let status = if created {
        tracing::info!(entry_id = %entry.id, name = %entry.name, "Catalog entry created via API");
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(entry)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSightingRequest {
    pub device_id: String,
    /// Reference stored with the sighting; defaults to an empty marker
    /// for sightings reported without an image.
    pub image_ref: Option<String>,
}

/// POST /catalog/:name/sightings
///
/// Record a sighting of a known species directly, subject to the same
/// per-device rate limit as the pipeline. 201 when recorded, 200 with
/// the previous timestamp when suppressed.
pub async fn record_sighting(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<RecordSightingRequest>,
) -> ApiResult<(StatusCode, Json<SightingOutcome>)> {
    let entry = catalog::find_by_name(&state.db, &name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No catalog entry named: {}", name)))?;

    let image_ref = request.image_ref.unwrap_or_default();
    let outcome = sightings::record_sighting(
        &state.db,
        &request.device_id,
        entry.id,
        &image_ref,
        Utc::now(),
    )
    .await?;

    let status = if outcome.was_recorded() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

/// Build catalog routes
pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/catalog", get(list_catalog).post(create_catalog_entry))
        .route("/catalog/:name", get(get_catalog_entry))
        .route("/catalog/:name/sightings", post(record_sighting))
}
