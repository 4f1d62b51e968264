//! Sightings Q&A endpoint
//!
//! Answers free-form questions about a device's sighting history. The
//! history is rendered into a plain-text context block and sent to the
//! language model along with the question; the model is instructed to
//! stay on topic.

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::db::{catalog, sightings};
use crate::error::{ApiError, ApiResult};
use crate::models::{CatalogEntry, SightingWithEntry};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub device_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
}

/// POST /chat
///
/// Ask a question about a device's sightings. A device with no
/// sightings has nothing to talk about and gets a 404.
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message must not be empty".to_string()));
    }

    if sightings::get_device(&state.db, &request.device_id)
        .await?
        .is_none()
    {
        return Err(ApiError::NotFound(format!(
            "Device not registered: {}",
            request.device_id
        )));
    }

    let history = sightings::sightings_for_device(&state.db, &request.device_id).await?;
    if history.is_empty() {
        return Err(ApiError::NotFound(format!(
            "No sightings for device: {}",
            request.device_id
        )));
    }

    // One catalog fetch per distinct species in the history
    let mut entries: HashMap<Uuid, CatalogEntry> = HashMap::new();
    for sighting in &history {
        if !entries.contains_key(&sighting.entry_id) {
            if let Some(entry) = catalog::find_by_name(&state.db, &sighting.species_name).await? {
                entries.insert(sighting.entry_id, entry);
            }
        }
    }

    let context = format_context(&history, &entries);
    let answer = state
        .language_model
        .answer_question(&context, &request.message)
        .await?;

    Ok(Json(ChatResponse { response: answer }))
}

/// Render a sighting history into the model's context block: one
/// numbered section per sighting with the species attributes and the
/// detection timestamp.
fn format_context(history: &[SightingWithEntry], entries: &HashMap<Uuid, CatalogEntry>) -> String {
    let mut context = String::new();

    for (index, sighting) in history.iter().enumerate() {
        let Some(entry) = entries.get(&sighting.entry_id) else {
            continue;
        };

        context.push_str(&format!(
            "\nFish {}:\n\
             - Name: {}\n\
             - Family: {}\n\
             - Size Range: {}-{} cm\n\
             - Water Type: {}\n\
             - Description: {}\n\
             - Color Description: {}\n\
             - Depth Range: {}-{} meters\n\
             - Environment: {}\n\
             - Region: {}\n\
             - Conservation Status: {}\n\
             - Conservation Details: {}\n\
             - AI Detection Accuracy: {}%\n\
             - Detected at: {}\n",
            index + 1,
            entry.name,
            entry.family,
            entry.min_size,
            entry.max_size,
            entry.water_type.as_str(),
            entry.description,
            entry.color_description,
            entry.depth_range_min,
            entry.depth_range_max,
            entry.environment,
            entry.region,
            entry.conservation_status.as_str(),
            entry.cons_status_description,
            entry.ai_accuracy,
            sighting.seen_at.to_rfc3339(),
        ));
    }

    context
}

/// Build chat routes
pub fn chat_routes() -> Router<AppState> {
    Router::new().route("/chat", post(chat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConservationStatus, WaterType};
    use chrono::Utc;

    fn entry(id: Uuid, name: &str) -> CatalogEntry {
        CatalogEntry {
            id,
            name: name.to_string(),
            family: "Salmonidae".to_string(),
            min_size: 50.0,
            max_size: 150.0,
            water_type: WaterType::Saltwater,
            description: "Anadromous fish".to_string(),
            color_description: "Silver".to_string(),
            depth_range_min: 0.0,
            depth_range_max: 250.0,
            environment: "Open ocean and rivers".to_string(),
            region: "North Atlantic".to_string(),
            conservation_status: ConservationStatus::LeastConcern,
            cons_status_description: "Stable".to_string(),
            ai_accuracy: 88.0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_context_lists_each_sighting_with_attributes() {
        let entry_id = Uuid::new_v4();
        let history = vec![
            SightingWithEntry {
                id: Uuid::new_v4(),
                entry_id,
                species_name: "Atlantic Salmon".to_string(),
                family: "Salmonidae".to_string(),
                image_ref: "post-cut/d/1.jpg".to_string(),
                seen_at: Utc::now(),
            },
            SightingWithEntry {
                id: Uuid::new_v4(),
                entry_id,
                species_name: "Atlantic Salmon".to_string(),
                family: "Salmonidae".to_string(),
                image_ref: "post-cut/d/2.jpg".to_string(),
                seen_at: Utc::now(),
            },
        ];
        let mut entries = HashMap::new();
        entries.insert(entry_id, entry(entry_id, "Atlantic Salmon"));

        let context = format_context(&history, &entries);

        assert!(context.contains("Fish 1:"));
        assert!(context.contains("Fish 2:"));
        assert!(context.contains("- Name: Atlantic Salmon"));
        assert!(context.contains("- Conservation Status: Least Concern"));
        assert!(context.contains("- Size Range: 50-150 cm"));
    }

    #[test]
    fn test_context_skips_sightings_without_entries() {
        let history = vec![SightingWithEntry {
            id: Uuid::new_v4(),
            entry_id: Uuid::new_v4(),
            species_name: "Ghost Fish".to_string(),
            family: "Unknown".to_string(),
            image_ref: "x".to_string(),
            seen_at: Utc::now(),
        }];

        let context = format_context(&history, &HashMap::new());
        assert!(context.is_empty());
    }
}
