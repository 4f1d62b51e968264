//! Accept-and-queue dispatch for uploaded images
//!
//! Once an upload has confirmed fish detections, this service moves it
//! into the asynchronous half of the pipeline: store the raw image,
//! open its lifecycle record, enqueue the cutting job, and mark the
//! record dispatched. Queue and storage readiness are checked before
//! any write so an unavailable backend rejects the upload with no
//! partial effects.

use crate::db::raw_images;
use crate::models::RawImageState;
use crate::queue::JobQueue;
use crate::storage::{raw_image_key, ObjectStore};
use chrono::Utc;
use finsight_common::events::{EventBus, PipelineEvent};
use finsight_common::types::{encode_payload, CuttingJob, Detection, QUEUE_CUTTING};
use finsight_common::{Error, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// What a successful dispatch produced.
#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    pub raw_key: String,
    pub job_id: Uuid,
    pub detections: usize,
}

/// Stores accepted uploads and enqueues their cutting jobs.
pub struct CutDispatcher {
    pool: SqlitePool,
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn JobQueue>,
    events: EventBus,
}

impl CutDispatcher {
    pub fn new(
        pool: SqlitePool,
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn JobQueue>,
        events: EventBus,
    ) -> Self {
        Self {
            pool,
            store,
            queue,
            events,
        }
    }

    /// Store `image` and enqueue a cutting job for its detections.
    ///
    /// The order of writes bounds the damage of a crash: the raw image
    /// is stored first, its lifecycle row opened second, and only then
    /// is the job enqueued. A failure in any later step leaves earlier
    /// ones visible (an UPLOADED row with no job is diagnosable), never
    /// the reverse.
    pub async fn dispatch(
        &self,
        device_id: &str,
        detections: Vec<Detection>,
        image: &[u8],
    ) -> Result<DispatchReceipt> {
        if detections.is_empty() {
            return Err(Error::InvalidInput(
                "No detections to dispatch".to_string(),
            ));
        }

        // Readiness first: no writes happen against a dead backend
        self.queue.ready().await?;
        self.store.ready().await?;

        let now = Utc::now();
        let raw_key = raw_image_key(now);
        let detection_count = detections.len();

        self.store.put(&raw_key, image).await?;
        raw_images::insert_uploaded(&self.pool, &raw_key, device_id, now).await?;

        let job = CuttingJob {
            fish_data: detections,
            image: raw_key.clone(),
            device_id: device_id.to_string(),
        };
        let payload = encode_payload(&job)?;
        let job_id = self.queue.enqueue(QUEUE_CUTTING, &payload).await?;

        if !raw_images::advance(&self.pool, &raw_key, RawImageState::Dispatched, now).await? {
            tracing::warn!(raw_key = %raw_key, "Raw image was not in UPLOADED when dispatching");
        }

        tracing::info!(
            device_id = %device_id,
            raw_key = %raw_key,
            job_id = %job_id,
            detections = detection_count,
            "Dispatched cutting job"
        );

        self.events.emit_lossy(PipelineEvent::ImageAccepted {
            device_id: device_id.to_string(),
            raw_key: raw_key.clone(),
            detections: detection_count,
            timestamp: now,
        });
        self.events.emit_lossy(PipelineEvent::CuttingJobQueued {
            job_id,
            device_id: device_id.to_string(),
            raw_key: raw_key.clone(),
            detections: detection_count,
            timestamp: now,
        });

        Ok(DispatchReceipt {
            raw_key,
            job_id,
            detections: detection_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database_pool;
    use crate::queue::SqliteJobQueue;
    use crate::storage::MemoryObjectStore;
    use finsight_common::types::decode_payload;
    use finsight_common::types::BoundingBox;
    use tempfile::TempDir;

    async fn fixture() -> (TempDir, SqlitePool, Arc<MemoryObjectStore>, CutDispatcher) {
        let dir = TempDir::new().unwrap();
        let pool = init_database_pool(&dir.path().join("test.db")).await.unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        let queue = Arc::new(SqliteJobQueue::new(pool.clone(), 60_000));
        let dispatcher = CutDispatcher::new(
            pool.clone(),
            store.clone(),
            queue,
            EventBus::new(16),
        );
        (dir, pool, store, dispatcher)
    }

    fn detection(tag: &str) -> Detection {
        Detection {
            tag_name: tag.to_string(),
            confidence: 0.9,
            bounding_box: BoundingBox {
                left: 1.0,
                top: 2.0,
                width: 30.0,
                height: 40.0,
            },
        }
    }

    #[tokio::test]
    async fn test_dispatch_stores_records_and_enqueues() {
        let (_dir, pool, store, dispatcher) = fixture().await;

        let receipt = dispatcher
            .dispatch("device-1", vec![detection("salmon"), detection("trout")], b"jpegdata")
            .await
            .unwrap();

        assert_eq!(receipt.detections, 2);
        assert!(receipt.raw_key.starts_with("pre-cut/"));

        // Raw image is in storage under the receipt key
        assert!(store.contains(&receipt.raw_key));

        // Lifecycle row advanced past UPLOADED
        let record = raw_images::get(&pool, &receipt.raw_key).await.unwrap().unwrap();
        assert_eq!(record.state, RawImageState::Dispatched);

        // The queued payload decodes back into the same job
        let queue = SqliteJobQueue::new(pool.clone(), 60_000);
        let leased = queue.dequeue(QUEUE_CUTTING).await.unwrap().unwrap();
        assert_eq!(leased.id, receipt.job_id);
        let job: CuttingJob = decode_payload(&leased.payload).unwrap();
        assert_eq!(job.image, receipt.raw_key);
        assert_eq!(job.device_id, "device-1");
        assert_eq!(job.fish_data.len(), 2);
        assert_eq!(job.fish_data[0].tag_name, "salmon");
    }

    #[tokio::test]
    async fn test_dispatch_emits_progress_events() {
        let (_dir, _pool, _store, dispatcher) = fixture().await;
        let mut rx = dispatcher.events.subscribe();

        dispatcher
            .dispatch("device-1", vec![detection("salmon")], b"jpegdata")
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().event_type(), "ImageAccepted");
        assert_eq!(rx.recv().await.unwrap().event_type(), "CuttingJobQueued");
    }

    #[tokio::test]
    async fn test_storage_failure_leaves_no_partial_state() {
        let (_dir, pool, store, dispatcher) = fixture().await;
        store.fail_puts(true);

        let result = dispatcher
            .dispatch("device-1", vec![detection("salmon")], b"jpegdata")
            .await;
        assert!(result.is_err());

        // Nothing stored, no lifecycle row, no job
        assert!(store.is_empty());
        let jobs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(jobs, 0);
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_images")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn test_unready_queue_rejects_before_any_write() {
        let (_dir, pool, store, dispatcher) = fixture().await;
        pool.close().await;

        let result = dispatcher
            .dispatch("device-1", vec![detection("salmon")], b"jpegdata")
            .await;

        assert!(result.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_empty_detections_rejected() {
        let (_dir, _pool, store, dispatcher) = fixture().await;

        let result = dispatcher.dispatch("device-1", Vec::new(), b"jpegdata").await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(store.is_empty());
    }
}
