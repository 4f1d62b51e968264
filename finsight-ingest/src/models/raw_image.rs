//! Raw-image lifecycle state machine
//!
//! Every uploaded raw image progresses through
//! UPLOADED → DISPATCHED → PROCESSED → DELETED. The state is persisted
//! alongside the image so a crash between pipeline steps leaves a
//! diagnosable record instead of a silent storage orphan: an image stuck
//! in UPLOADED was never enqueued, one stuck in PROCESSED survived a
//! failed cleanup delete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle state of one raw image in object storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RawImageState {
    /// Stored under `pre-cut/`, cutting job not yet enqueued
    Uploaded,
    /// Cutting job enqueued, awaiting the cropper
    Dispatched,
    /// All detections attempted, cleanup delete not yet confirmed
    Processed,
    /// Removed from object storage
    Deleted,
}

impl RawImageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RawImageState::Uploaded => "UPLOADED",
            RawImageState::Dispatched => "DISPATCHED",
            RawImageState::Processed => "PROCESSED",
            RawImageState::Deleted => "DELETED",
        }
    }

    /// Transitions only move forward through the lifecycle
    pub fn can_transition_to(&self, next: RawImageState) -> bool {
        matches!(
            (self, next),
            (RawImageState::Uploaded, RawImageState::Dispatched)
                | (RawImageState::Dispatched, RawImageState::Processed)
                | (RawImageState::Processed, RawImageState::Deleted)
        )
    }

    /// Terminal state: nothing further happens to this image
    pub fn is_terminal(&self) -> bool {
        matches!(self, RawImageState::Deleted)
    }
}

impl FromStr for RawImageState {
    type Err = finsight_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UPLOADED" => Ok(RawImageState::Uploaded),
            "DISPATCHED" => Ok(RawImageState::Dispatched),
            "PROCESSED" => Ok(RawImageState::Processed),
            "DELETED" => Ok(RawImageState::Deleted),
            other => Err(finsight_common::Error::Internal(format!(
                "Unknown raw image state: {}",
                other
            ))),
        }
    }
}

/// Persisted lifecycle record for one raw image
#[derive(Debug, Clone, Serialize)]
pub struct RawImageRecord {
    /// Object storage key under `pre-cut/`
    pub object_key: String,
    pub device_id: String,
    pub state: RawImageState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
