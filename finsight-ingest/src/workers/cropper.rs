//! Cutting queue worker
//!
//! Consumes cutting jobs: fetches the stored raw image, cuts one JPEG
//! crop per detection, uploads each crop, and enqueues an enrichment
//! job for it. Detections are isolated from each other; one bad region
//! or failed upload skips that detection and the rest still go through.
//! After the loop the raw image is deleted best-effort and its
//! lifecycle row advanced.

use crate::db::raw_images;
use crate::models::RawImageState;
use crate::queue::{JobQueue, LeasedJob};
use crate::services::cropping::{clamp_region, crop_jpeg, decode_image};
use crate::storage::{crop_key, ObjectStore};
use crate::workers::{HandlerOutcome, JobHandler};
use async_trait::async_trait;
use chrono::Utc;
use finsight_common::events::{EventBus, PipelineEvent};
use finsight_common::types::{
    decode_payload, encode_payload, CuttingJob, EnrichmentJob, QUEUE_CUTTING, QUEUE_ENRICHMENT,
};
use finsight_common::Result;
use image::GenericImageView;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Handler for the cutting queue.
pub struct CropperWorker {
    pool: SqlitePool,
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn JobQueue>,
    events: EventBus,
}

impl CropperWorker {
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

    async fn process(&self, cutting: &CuttingJob) -> Result<()> {
        // Failures before the crop loop abort the whole job: a missing
        // raw image is terminal, transient storage trouble is retried.
        let raw_bytes = self.store.get(&cutting.image).await?;
        let image = decode_image(&raw_bytes)?;
        let (image_width, image_height) = image.dimensions();

        let total = cutting.fish_data.len();
        let mut stored = 0usize;

        for (index, detection) in cutting.fish_data.iter().enumerate() {
            let Some(region) = clamp_region(&detection.bounding_box, image_width, image_height)
            else {
                tracing::warn!(
                    raw_key = %cutting.image,
                    detection = index + 1,
                    "Skipping detection: region has no area inside the image"
                );
                continue;
            };

            let crop = match crop_jpeg(&image, &region) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(
                        raw_key = %cutting.image,
                        detection = index + 1,
                        error = %e,
                        "Skipping detection: crop failed"
                    );
                    continue;
                }
            };

            let now = Utc::now();
            let key = crop_key(
                &cutting.device_id,
                now,
                index,
                &detection.tag_name,
                detection.confidence,
            );

            if let Err(e) = self.store.put(&key, &crop).await {
                tracing::warn!(
                    crop_key = %key,
                    error = %e,
                    "Skipping detection: crop upload failed"
                );
                continue;
            }

            self.events.emit_lossy(PipelineEvent::CropStored {
                device_id: cutting.device_id.clone(),
                crop_key: key.clone(),
                detection_index: index,
                timestamp: now,
            });

            // Enqueue failure leaves an orphan crop in storage; that is
            // visible in listings and cheaper than deleting good work.
            let enrichment = EnrichmentJob {
                image_to_enrich: key.clone(),
                device_id: cutting.device_id.clone(),
            };
            let payload = match encode_payload(&enrichment) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(crop_key = %key, error = %e, "Cannot encode enrichment job");
                    continue;
                }
            };
            match self.queue.enqueue(QUEUE_ENRICHMENT, &payload).await {
                Ok(job_id) => {
                    self.events.emit_lossy(PipelineEvent::EnrichmentJobQueued {
                        job_id,
                        device_id: cutting.device_id.clone(),
                        crop_key: key,
                        timestamp: now,
                    });
                    stored += 1;
                }
                Err(e) => {
                    tracing::warn!(crop_key = %key, error = %e, "Enrichment enqueue failed");
                }
            }
        }

        tracing::info!(
            raw_key = %cutting.image,
            device_id = %cutting.device_id,
            crops = stored,
            detections = total,
            "Cutting complete"
        );

        self.finish_lifecycle(&cutting.image).await;
        Ok(())
    }

    /// Advance the raw image to PROCESSED, then delete it and advance to
    /// DELETED. All failures here are logged and swallowed: the crops
    /// are already safe and a leftover raw image only costs storage.
    async fn finish_lifecycle(&self, raw_key: &str) {
        let now = Utc::now();
        match raw_images::advance(&self.pool, raw_key, RawImageState::Processed, now).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(raw_key = %raw_key, "Raw image already past DISPATCHED")
            }
            Err(e) => tracing::error!(raw_key = %raw_key, error = %e, "Lifecycle update failed"),
        }

        if let Err(e) = self.store.delete(raw_key).await {
            tracing::warn!(raw_key = %raw_key, error = %e, "Raw image delete failed; leaving it");
            return;
        }

        match raw_images::advance(&self.pool, raw_key, RawImageState::Deleted, Utc::now()).await {
            Ok(_) => {}
            Err(e) => tracing::error!(raw_key = %raw_key, error = %e, "Lifecycle update failed"),
        }
    }
}

#[async_trait]
impl JobHandler for CropperWorker {
    fn queue(&self) -> &'static str {
        QUEUE_CUTTING
    }

    async fn handle(&self, job: &LeasedJob) -> HandlerOutcome {
        let cutting: CuttingJob = match decode_payload(&job.payload) {
            Ok(c) => c,
            Err(e) => return HandlerOutcome::Drop(e.to_string()),
        };

        match self.process(&cutting).await {
            Ok(()) => HandlerOutcome::Complete,
            Err(e) if e.is_terminal() => HandlerOutcome::Drop(e.to_string()),
            Err(e) => HandlerOutcome::Retry(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database_pool;
    use crate::queue::SqliteJobQueue;
    use crate::storage::MemoryObjectStore;
    use finsight_common::types::{BoundingBox, Detection};
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct Fixture {
        _dir: TempDir,
        pool: SqlitePool,
        store: Arc<MemoryObjectStore>,
        queue: Arc<SqliteJobQueue>,
        worker: CropperWorker,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let pool = init_database_pool(&dir.path().join("test.db")).await.unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        let queue = Arc::new(SqliteJobQueue::new(pool.clone(), 60_000));
        let worker = CropperWorker::new(
            pool.clone(),
            store.clone(),
            queue.clone(),
            EventBus::new(64),
        );
        Fixture {
            _dir: dir,
            pool,
            store,
            queue,
            worker,
        }
    }

    fn png_image(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 0])
        }));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn detection(tag: &str, left: f64, top: f64, width: f64, height: f64) -> Detection {
        Detection {
            tag_name: tag.to_string(),
            confidence: 0.87,
            bounding_box: BoundingBox {
                left,
                top,
                width,
                height,
            },
        }
    }

    async fn seed_raw(fix: &Fixture, raw_key: &str, image: &[u8]) {
        fix.store.put(raw_key, image).await.unwrap();
        let now = Utc::now();
        raw_images::insert_uploaded(&fix.pool, raw_key, "device-1", now)
            .await
            .unwrap();
        raw_images::advance(&fix.pool, raw_key, RawImageState::Dispatched, now)
            .await
            .unwrap();
    }

    fn leased(payload: String) -> LeasedJob {
        LeasedJob {
            id: Uuid::new_v4(),
            queue: QUEUE_CUTTING.to_string(),
            payload,
            attempts: 1,
        }
    }

    fn cutting_payload(raw_key: &str, detections: Vec<Detection>) -> String {
        encode_payload(&CuttingJob {
            fish_data: detections,
            image: raw_key.to_string(),
            device_id: "device-1".to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_crops_all_detections_and_deletes_raw() {
        let fix = fixture().await;
        let raw_key = "pre-cut/test_raw.jpg";
        seed_raw(&fix, raw_key, &png_image(200, 100)).await;

        let payload = cutting_payload(
            raw_key,
            vec![
                detection("salmon", 10.0, 10.0, 50.0, 40.0),
                detection("trout", 100.0, 20.0, 60.0, 30.0),
            ],
        );

        let outcome = fix.worker.handle(&leased(payload)).await;
        assert!(matches!(outcome, HandlerOutcome::Complete));

        // Two crops, raw image gone
        let keys = fix.store.keys();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| k.starts_with("post-cut/device-1/")));
        assert!(!fix.store.contains(raw_key));

        // Crops decode to the clamped dimensions
        let salmon_key = keys.iter().find(|k| k.contains("salmon")).unwrap();
        let crop = fix.store.get(salmon_key).await.unwrap();
        let decoded = decode_image(&crop).unwrap();
        assert_eq!(decoded.dimensions(), (50, 40));

        // One enrichment job per crop, each pointing at its crop
        assert_eq!(fix.queue.depth(QUEUE_ENRICHMENT).await.unwrap(), 2);
        let job = fix.queue.dequeue(QUEUE_ENRICHMENT).await.unwrap().unwrap();
        let enrichment: EnrichmentJob = decode_payload(&job.payload).unwrap();
        assert!(enrichment.image_to_enrich.starts_with("post-cut/device-1/"));
        assert_eq!(enrichment.device_id, "device-1");

        // Lifecycle ran to DELETED
        let record = raw_images::get(&fix.pool, raw_key).await.unwrap().unwrap();
        assert_eq!(record.state, RawImageState::Deleted);
    }

    #[tokio::test]
    async fn test_crop_names_carry_tag_and_confidence() {
        let fix = fixture().await;
        let raw_key = "pre-cut/test_raw.jpg";
        seed_raw(&fix, raw_key, &png_image(200, 100)).await;

        let payload = cutting_payload(
            raw_key,
            vec![detection("rainbow trout", 0.0, 0.0, 40.0, 40.0)],
        );
        fix.worker.handle(&leased(payload)).await;

        let keys = fix.store.keys();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].contains("_fish_1_rainbow_trout_87pct.jpg"));
    }

    #[tokio::test]
    async fn test_out_of_bounds_detection_is_skipped() {
        let fix = fixture().await;
        let raw_key = "pre-cut/test_raw.jpg";
        seed_raw(&fix, raw_key, &png_image(200, 100)).await;

        // One region lies entirely outside the image
        let payload = cutting_payload(
            raw_key,
            vec![
                detection("salmon", 10.0, 10.0, 50.0, 40.0),
                detection("eel", 500.0, 500.0, 50.0, 40.0),
            ],
        );

        let outcome = fix.worker.handle(&leased(payload)).await;
        assert!(matches!(outcome, HandlerOutcome::Complete));

        assert_eq!(fix.store.keys().len(), 1);
        assert_eq!(fix.queue.depth(QUEUE_ENRICHMENT).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() {
        let fix = fixture().await;

        let outcome = fix.worker.handle(&leased("not base64 json".to_string())).await;

        assert!(matches!(outcome, HandlerOutcome::Drop(_)));
        assert!(fix.store.is_empty());
        assert_eq!(fix.queue.depth(QUEUE_ENRICHMENT).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_raw_image_is_dropped() {
        let fix = fixture().await;

        // No raw image seeded: a redelivery after the delete step
        let payload = cutting_payload(
            "pre-cut/already_gone.jpg",
            vec![detection("salmon", 0.0, 0.0, 40.0, 40.0)],
        );
        let outcome = fix.worker.handle(&leased(payload)).await;

        assert!(matches!(outcome, HandlerOutcome::Drop(_)));
    }

    #[tokio::test]
    async fn test_storage_outage_is_retried() {
        let fix = fixture().await;
        let raw_key = "pre-cut/test_raw.jpg";
        seed_raw(&fix, raw_key, &png_image(200, 100)).await;
        fix.store.fail_gets(true);

        let payload = cutting_payload(raw_key, vec![detection("salmon", 0.0, 0.0, 40.0, 40.0)]);
        let outcome = fix.worker.handle(&leased(payload)).await;

        assert!(matches!(outcome, HandlerOutcome::Retry(_)));
    }

    #[tokio::test]
    async fn test_undecodable_raw_image_is_dropped() {
        let fix = fixture().await;
        let raw_key = "pre-cut/test_raw.jpg";
        seed_raw(&fix, raw_key, b"these bytes are no image").await;

        let payload = cutting_payload(raw_key, vec![detection("salmon", 0.0, 0.0, 40.0, 40.0)]);
        let outcome = fix.worker.handle(&leased(payload)).await;

        assert!(matches!(outcome, HandlerOutcome::Drop(_)));
    }

    #[tokio::test]
    async fn test_failed_delete_is_swallowed() {
        let fix = fixture().await;
        let raw_key = "pre-cut/test_raw.jpg";
        seed_raw(&fix, raw_key, &png_image(200, 100)).await;
        fix.store.fail_deletes(true);

        let payload = cutting_payload(raw_key, vec![detection("salmon", 0.0, 0.0, 40.0, 40.0)]);
        let outcome = fix.worker.handle(&leased(payload)).await;

        // The job still completes; the lifecycle stops at PROCESSED
        assert!(matches!(outcome, HandlerOutcome::Complete));
        let record = raw_images::get(&fix.pool, raw_key).await.unwrap().unwrap();
        assert_eq!(record.state, RawImageState::Processed);
        assert!(fix.store.contains(raw_key));
    }
}
