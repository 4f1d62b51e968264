//! Enrichment queue worker
//!
//! Consumes enrichment jobs: fetches a crop, asks the language model to
//! name the species, and records a sighting. Extraction of a full
//! species profile runs only when the name is not already in the
//! catalog; a known name skips straight to the sighting, which keeps
//! one model call off the common path.
//!
//! Malformed model replies are dropped without touching the catalog or
//! the sightings table. Provider outages and storage trouble are nacked
//! so the crop gets another chance once the backend recovers.

use crate::db::{catalog, sightings};
use crate::models::SightingOutcome;
use crate::queue::LeasedJob;
use crate::services::cropping::{bounded_jpeg, MODEL_IMAGE_MAX_EDGE};
use crate::services::language_model::LanguageModel;
use crate::storage::ObjectStore;
use crate::workers::{HandlerOutcome, JobHandler};
use async_trait::async_trait;
use chrono::Utc;
use finsight_common::events::{EventBus, PipelineEvent};
use finsight_common::types::{decode_payload, EnrichmentJob, QUEUE_ENRICHMENT};
use finsight_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Handler for the enrichment queue.
pub struct EnrichmentWorker {
    pool: SqlitePool,
    store: Arc<dyn ObjectStore>,
    model: Arc<dyn LanguageModel>,
    events: EventBus,
}

impl EnrichmentWorker {
    pub fn new(
        pool: SqlitePool,
        store: Arc<dyn ObjectStore>,
        model: Arc<dyn LanguageModel>,
        events: EventBus,
    ) -> Self {
        Self {
            pool,
            store,
            model,
            events,
        }
    }

    async fn process(&self, enrichment: &EnrichmentJob) -> Result<()> {
        let crop = self.store.get(&enrichment.image_to_enrich).await?;
        let prepared = bounded_jpeg(&crop, MODEL_IMAGE_MAX_EDGE)?;

        let name = self.model.identify_species(&prepared).await?;

        let entry = match catalog::find_by_name(&self.pool, &name).await? {
            Some(entry) => {
                tracing::info!(
                    device_id = %enrichment.device_id,
                    name = %name,
                    "Species already cataloged"
                );
                self.events.emit_lossy(PipelineEvent::SpeciesIdentified {
                    device_id: enrichment.device_id.clone(),
                    name: name.clone(),
                    known: true,
                    timestamp: Utc::now(),
                });
                entry
            }
            None => {
                self.events.emit_lossy(PipelineEvent::SpeciesIdentified {
                    device_id: enrichment.device_id.clone(),
                    name: name.clone(),
                    known: false,
                    timestamp: Utc::now(),
                });

                let profile = self.model.extract_profile(&prepared).await?;
                let (entry, created) = catalog::find_or_create(&self.pool, &profile).await?;
                if created {
                    tracing::info!(
                        entry_id = %entry.id,
                        name = %entry.name,
                        "Cataloged new species"
                    );
                    self.events.emit_lossy(PipelineEvent::CatalogEntryCreated {
                        entry_id: entry.id,
                        name: entry.name.clone(),
                        timestamp: Utc::now(),
                    });
                }
                entry
            }
        };

        let outcome = sightings::record_sighting(
            &self.pool,
            &enrichment.device_id,
            entry.id,
            &enrichment.image_to_enrich,
            Utc::now(),
        )
        .await?;

        match outcome {
            SightingOutcome::Recorded { ref sighting } => {
                tracing::info!(
                    device_id = %enrichment.device_id,
                    entry_id = %entry.id,
                    sighting_id = %sighting.id,
                    "Sighting recorded"
                );
                self.events.emit_lossy(PipelineEvent::SightingRecorded {
                    device_id: enrichment.device_id.clone(),
                    entry_id: entry.id,
                    name: entry.name.clone(),
                    timestamp: Utc::now(),
                });
            }
            SightingOutcome::Skipped { last_seen_at } => {
                tracing::debug!(
                    device_id = %enrichment.device_id,
                    entry_id = %entry.id,
                    last_seen_at = %last_seen_at,
                    "Sighting suppressed by rate limit"
                );
                self.events.emit_lossy(PipelineEvent::SightingSkipped {
                    device_id: enrichment.device_id.clone(),
                    entry_id: entry.id,
                    last_seen_at,
                    timestamp: Utc::now(),
                });
            }
        }

        Ok(())
    }
}

#[async_trait]
impl JobHandler for EnrichmentWorker {
    fn queue(&self) -> &'static str {
        QUEUE_ENRICHMENT
    }

    async fn handle(&self, job: &LeasedJob) -> HandlerOutcome {
        let enrichment: EnrichmentJob = match decode_payload(&job.payload) {
            Ok(e) => e,
            Err(e) => return HandlerOutcome::Drop(e.to_string()),
        };

        match self.process(&enrichment).await {
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
    use crate::models::{ConservationStatus, SpeciesProfile, WaterType};
    use crate::storage::MemoryObjectStore;
    use finsight_common::types::encode_payload;
    use finsight_common::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use uuid::Uuid;

    /// Scripted model: fixed replies plus call counters, so tests can
    /// assert which calls a path makes.
    #[derive(Default)]
    struct ScriptedModel {
        identify_name: Option<String>,
        identify_unavailable: bool,
        profile: Option<SpeciesProfile>,
        identify_calls: AtomicUsize,
        extract_calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn identify_species(&self, _image_jpeg: &[u8]) -> Result<String> {
            self.identify_calls.fetch_add(1, Ordering::SeqCst);
            if self.identify_unavailable {
                return Err(Error::upstream("language model", "timed out"));
            }
            match &self.identify_name {
                Some(name) => Ok(name.clone()),
                None => Err(Error::parse("species name reply", "not json")),
            }
        }

        async fn extract_profile(&self, _image_jpeg: &[u8]) -> Result<SpeciesProfile> {
            self.extract_calls.fetch_add(1, Ordering::SeqCst);
            match &self.profile {
                Some(profile) => Ok(profile.clone()),
                None => Err(Error::parse("species profile reply", "not json")),
            }
        }

        async fn answer_question(&self, _context: &str, _question: &str) -> Result<String> {
            Ok("scripted answer".to_string())
        }
    }

    struct Fixture {
        _dir: TempDir,
        pool: SqlitePool,
        store: Arc<MemoryObjectStore>,
        model: Arc<ScriptedModel>,
        worker: EnrichmentWorker,
        events: EventBus,
    }

    async fn fixture(model: ScriptedModel) -> Fixture {
        let dir = TempDir::new().unwrap();
        let pool = init_database_pool(&dir.path().join("test.db")).await.unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        let model = Arc::new(model);
        let events = EventBus::new(64);
        let worker = EnrichmentWorker::new(
            pool.clone(),
            store.clone(),
            model.clone(),
            events.clone(),
        );
        Fixture {
            _dir: dir,
            pool,
            store,
            model,
            worker,
            events,
        }
    }

    fn profile(name: &str) -> SpeciesProfile {
        SpeciesProfile {
            name: name.to_string(),
            family: "Pomacentridae".to_string(),
            min_size: 7.0,
            max_size: 11.0,
            water_type: WaterType::Saltwater,
            description: "Small reef fish living among anemones.".to_string(),
            color_description: "Orange with white bars".to_string(),
            depth_range_min: 1.0,
            depth_range_max: 15.0,
            environment: "Coral reefs".to_string(),
            region: "Indo-Pacific".to_string(),
            conservation_status: ConservationStatus::LeastConcern,
            cons_status_description: "Widespread and abundant.".to_string(),
            ai_accuracy: 92.5,
            colors: vec!["orange".to_string(), "white".to_string()],
            predators: vec!["grouper".to_string()],
            fun_facts: vec!["All clownfish are born male.".to_string()],
        }
    }

    const CROP_KEY: &str = "post-cut/device-1/1000_fish_1_salmon_90pct.jpg";

    fn crop_bytes() -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            64,
            64,
            image::Rgb([200, 120, 40]),
        ));
        let mut buffer = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    async fn seed(fix: &Fixture) {
        fix.store.put(CROP_KEY, &crop_bytes()).await.unwrap();
        sightings::register_device(&fix.pool, "device-1").await.unwrap();
    }

    fn leased() -> LeasedJob {
        LeasedJob {
            id: Uuid::new_v4(),
            queue: QUEUE_ENRICHMENT.to_string(),
            payload: encode_payload(&EnrichmentJob {
                image_to_enrich: CROP_KEY.to_string(),
                device_id: "device-1".to_string(),
            })
            .unwrap(),
            attempts: 1,
        }
    }

    async fn sighting_count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM sightings")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn catalog_count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM catalog_entries")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_known_species_records_without_extraction() {
        // Given a catalog that already knows the Clownfish
        let fix = fixture(ScriptedModel {
            identify_name: Some("Clownfish".to_string()),
            profile: Some(profile("Clownfish")),
            ..Default::default()
        })
        .await;
        seed(&fix).await;
        catalog::find_or_create(&fix.pool, &profile("Clownfish"))
            .await
            .unwrap();

        // When a crop identifies as Clownfish
        let outcome = fix.worker.handle(&leased()).await;

        // Then the sighting is recorded with no extraction call
        assert!(matches!(outcome, HandlerOutcome::Complete));
        assert_eq!(fix.model.identify_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fix.model.extract_calls.load(Ordering::SeqCst), 0);
        assert_eq!(catalog_count(&fix.pool).await, 1);
        assert_eq!(sighting_count(&fix.pool).await, 1);
    }

    #[tokio::test]
    async fn test_unknown_species_is_cataloged_then_recorded() {
        let fix = fixture(ScriptedModel {
            identify_name: Some("Neon Tetra".to_string()),
            profile: Some(profile("Neon Tetra")),
            ..Default::default()
        })
        .await;
        seed(&fix).await;
        let mut rx = fix.events.subscribe();

        let outcome = fix.worker.handle(&leased()).await;

        assert!(matches!(outcome, HandlerOutcome::Complete));
        assert_eq!(fix.model.extract_calls.load(Ordering::SeqCst), 1);

        let entry = catalog::find_by_name(&fix.pool, "Neon Tetra")
            .await
            .unwrap()
            .expect("entry should exist");
        assert_eq!(entry.family, "Pomacentridae");
        assert_eq!(sighting_count(&fix.pool).await, 1);

        // Event order tells the story: identified (unknown), created, recorded
        assert_eq!(rx.recv().await.unwrap().event_type(), "SpeciesIdentified");
        assert_eq!(rx.recv().await.unwrap().event_type(), "CatalogEntryCreated");
        assert_eq!(rx.recv().await.unwrap().event_type(), "SightingRecorded");
    }

    #[tokio::test]
    async fn test_malformed_name_reply_drops_without_mutation() {
        let fix = fixture(ScriptedModel {
            identify_name: None, // model replies "not json"
            ..Default::default()
        })
        .await;
        seed(&fix).await;

        let outcome = fix.worker.handle(&leased()).await;

        assert!(matches!(outcome, HandlerOutcome::Drop(_)));
        assert_eq!(catalog_count(&fix.pool).await, 0);
        assert_eq!(sighting_count(&fix.pool).await, 0);
    }

    #[tokio::test]
    async fn test_malformed_profile_reply_drops_without_mutation() {
        let fix = fixture(ScriptedModel {
            identify_name: Some("Neon Tetra".to_string()),
            profile: None, // extraction reply unusable
            ..Default::default()
        })
        .await;
        seed(&fix).await;

        let outcome = fix.worker.handle(&leased()).await;

        assert!(matches!(outcome, HandlerOutcome::Drop(_)));
        assert_eq!(catalog_count(&fix.pool).await, 0);
        assert_eq!(sighting_count(&fix.pool).await, 0);
    }

    #[tokio::test]
    async fn test_model_outage_is_retried() {
        let fix = fixture(ScriptedModel {
            identify_unavailable: true,
            ..Default::default()
        })
        .await;
        seed(&fix).await;

        let outcome = fix.worker.handle(&leased()).await;
        assert!(matches!(outcome, HandlerOutcome::Retry(_)));
        assert_eq!(sighting_count(&fix.pool).await, 0);
    }

    #[tokio::test]
    async fn test_rate_limited_repeat_sighting_completes_with_skip() {
        let fix = fixture(ScriptedModel {
            identify_name: Some("Clownfish".to_string()),
            profile: Some(profile("Clownfish")),
            ..Default::default()
        })
        .await;
        seed(&fix).await;
        let mut rx = fix.events.subscribe();

        // Two crops of the same species in quick succession
        let first = fix.worker.handle(&leased()).await;
        let second = fix.worker.handle(&leased()).await;

        assert!(matches!(first, HandlerOutcome::Complete));
        assert!(matches!(second, HandlerOutcome::Complete));
        assert_eq!(sighting_count(&fix.pool).await, 1);

        // Drain events; the last of the second run is a skip
        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            types.push(event.event_type().to_string());
        }
        assert!(types.contains(&"SightingRecorded".to_string()));
        assert!(types.contains(&"SightingSkipped".to_string()));
    }

    #[tokio::test]
    async fn test_missing_crop_is_dropped() {
        let fix = fixture(ScriptedModel {
            identify_name: Some("Clownfish".to_string()),
            ..Default::default()
        })
        .await;
        sightings::register_device(&fix.pool, "device-1").await.unwrap();
        // No crop seeded

        let outcome = fix.worker.handle(&leased()).await;
        assert!(matches!(outcome, HandlerOutcome::Drop(_)));
        assert_eq!(fix.model.identify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_storage_outage_is_retried() {
        let fix = fixture(ScriptedModel {
            identify_name: Some("Clownfish".to_string()),
            ..Default::default()
        })
        .await;
        seed(&fix).await;
        fix.store.fail_gets(true);

        let outcome = fix.worker.handle(&leased()).await;
        assert!(matches!(outcome, HandlerOutcome::Retry(_)));
    }

    #[tokio::test]
    async fn test_unregistered_device_is_dropped() {
        let fix = fixture(ScriptedModel {
            identify_name: Some("Clownfish".to_string()),
            profile: Some(profile("Clownfish")),
            ..Default::default()
        })
        .await;
        fix.store.put(CROP_KEY, &crop_bytes()).await.unwrap();
        // Device never registered

        let outcome = fix.worker.handle(&leased()).await;

        assert!(matches!(outcome, HandlerOutcome::Drop(_)));
        assert_eq!(sighting_count(&fix.pool).await, 0);
    }

    #[tokio::test]
    async fn test_malformed_queue_payload_is_dropped() {
        let fix = fixture(ScriptedModel::default()).await;

        let job = LeasedJob {
            id: Uuid::new_v4(),
            queue: QUEUE_ENRICHMENT.to_string(),
            payload: "@@@ not base64 @@@".to_string(),
            attempts: 1,
        };

        let outcome = fix.worker.handle(&job).await;
        assert!(matches!(outcome, HandlerOutcome::Drop(_)));
        assert_eq!(fix.model.identify_calls.load(Ordering::SeqCst), 0);
    }
}
