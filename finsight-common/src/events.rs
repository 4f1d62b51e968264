//! Event types for the finsight pipeline
//!
//! Every stage of the ingestion pipeline emits progress events onto a
//! process-wide broadcast bus; the SSE endpoint forwards them to clients
//! and tests subscribe to observe pipeline behavior without polling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// An uploaded image passed the detection filter
    ImageAccepted {
        device_id: String,
        raw_key: String,
        detections: usize,
        timestamp: DateTime<Utc>,
    },

    /// An uploaded image contained no accepted detections (not an error)
    NoFishDetected {
        device_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A cutting job was enqueued for a stored raw image
    CuttingJobQueued {
        job_id: Uuid,
        device_id: String,
        raw_key: String,
        detections: usize,
        timestamp: DateTime<Utc>,
    },

    /// One cropped detection was stored
    CropStored {
        device_id: String,
        crop_key: String,
        detection_index: usize,
        timestamp: DateTime<Utc>,
    },

    /// An enrichment job was enqueued for a stored crop
    EnrichmentJobQueued {
        job_id: Uuid,
        device_id: String,
        crop_key: String,
        timestamp: DateTime<Utc>,
    },

    /// The language model identified a species name for a crop
    SpeciesIdentified {
        device_id: String,
        name: String,
        /// Whether the name was already present in the catalog
        known: bool,
        timestamp: DateTime<Utc>,
    },

    /// A new catalog entry was created
    CatalogEntryCreated {
        entry_id: Uuid,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// A sighting was recorded for a device
    SightingRecorded {
        device_id: String,
        entry_id: Uuid,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// A sighting was suppressed by the 10-second rate limit
    SightingSkipped {
        device_id: String,
        entry_id: Uuid,
        last_seen_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// A queue job failed; `will_retry` distinguishes nack from drop
    JobFailed {
        queue: String,
        job_id: Uuid,
        error: String,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            PipelineEvent::ImageAccepted { .. } => "ImageAccepted",
            PipelineEvent::NoFishDetected { .. } => "NoFishDetected",
            PipelineEvent::CuttingJobQueued { .. } => "CuttingJobQueued",
            PipelineEvent::CropStored { .. } => "CropStored",
            PipelineEvent::EnrichmentJobQueued { .. } => "EnrichmentJobQueued",
            PipelineEvent::SpeciesIdentified { .. } => "SpeciesIdentified",
            PipelineEvent::CatalogEntryCreated { .. } => "CatalogEntryCreated",
            PipelineEvent::SightingRecorded { .. } => "SightingRecorded",
            PipelineEvent::SightingSkipped { .. } => "SightingSkipped",
            PipelineEvent::JobFailed { .. } => "JobFailed",
        }
    }
}

/// Broadcast bus for pipeline events
///
/// Wraps a `tokio::sync::broadcast` channel. Clone freely; all clones
/// share the same channel.
///
/// # Examples
///
/// ```
/// use finsight_common::events::EventBus;
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
/// assert_eq!(bus.subscriber_count(), 1);
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the specified channel capacity
    ///
    /// Older events are dropped for lagging subscribers once the buffer
    /// fills; 1000 is comfortable for a single service instance.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` otherwise.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Pipeline stages use this form: progress events are advisory and a
    /// stage must not fail because nobody is watching.
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
