//! Device and sighting models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered device (opaque identifier chosen by the client)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub registered_at: DateTime<Utc>,
}

/// One recorded observation of a catalog entry by a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub id: Uuid,
    pub device_id: String,
    pub entry_id: Uuid,
    /// Storage key of the crop the sighting was identified from
    pub image_ref: String,
    pub seen_at: DateTime<Utc>,
}

/// Result of a rate-limited sighting attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SightingOutcome {
    /// A new record was written
    Recorded { sighting: Sighting },
    /// Suppressed: the device saw this species within the last 10 seconds
    Skipped { last_seen_at: DateTime<Utc> },
}

impl SightingOutcome {
    pub fn was_recorded(&self) -> bool {
        matches!(self, SightingOutcome::Recorded { .. })
    }
}

/// A sighting joined with its catalog entry, for device history listings
#[derive(Debug, Clone, Serialize)]
pub struct SightingWithEntry {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub species_name: String,
    pub family: String,
    pub image_ref: String,
    pub seen_at: DateTime<Utc>,
}
