//! finsight-ingest - Fish photo ingest service
//!
//! Accepts camera frames from registered devices, screens them for fish
//! with a vision provider, crops and stores each detection, identifies
//! species with a language model, and records rate-limited sightings
//! into a shared species catalog.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use finsight_common::config::Config;
use finsight_common::events::EventBus;
use finsight_ingest::queue::{JobQueue, SqliteJobQueue};
use finsight_ingest::services::detection_filter::DetectionFilter;
use finsight_ingest::services::language_model::{ChatCompletionsClient, LanguageModel};
use finsight_ingest::services::vision_client::VisionClient;
use finsight_ingest::storage::{FsObjectStore, ObjectStore};
use finsight_ingest::workers::{spawn_workers, CropperWorker, EnrichmentWorker};
use finsight_ingest::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with env-filter overrides (RUST_LOG)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Build identification logged before anything that can stall
    info!(
        "Starting finsight-ingest v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    // Resolve configuration once; every component receives it by
    // constructor from here on
    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Configuration invalid")?;
    let config = Arc::new(config);

    info!("Data directory: {}", config.data_dir.display());
    let object_store: Arc<dyn ObjectStore> = Arc::new(
        FsObjectStore::create(config.data_dir.join("objects"))
            .context("Failed to initialize object store")?,
    );

    let db_pool = finsight_ingest::db::init_database_pool(&config.database_path)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    let event_bus = EventBus::new(config.event_capacity);

    let job_queue: Arc<dyn JobQueue> =
        Arc::new(SqliteJobQueue::new(db_pool.clone(), config.queue.lease_ms));

    let vision = VisionClient::new(&config.vision).context("Failed to build vision client")?;
    let detection_filter = Arc::new(DetectionFilter::new(vision));

    let language_model: Arc<dyn LanguageModel> = Arc::new(
        ChatCompletionsClient::new(&config.language_model)
            .context("Failed to build language model client")?,
    );

    let state = AppState::new(
        db_pool.clone(),
        event_bus.clone(),
        config.clone(),
        object_store.clone(),
        job_queue.clone(),
        detection_filter,
        language_model.clone(),
    );

    // Worker pool for both queues, stopped via one cancellation token
    let cancel = CancellationToken::new();
    let mut worker_handles = Vec::new();
    worker_handles.extend(spawn_workers(
        Arc::new(CropperWorker::new(
            db_pool.clone(),
            object_store.clone(),
            job_queue.clone(),
            event_bus.clone(),
        )),
        job_queue.clone(),
        event_bus.clone(),
        &config.queue,
        cancel.clone(),
    ));
    worker_handles.extend(spawn_workers(
        Arc::new(EnrichmentWorker::new(
            db_pool.clone(),
            object_store.clone(),
            language_model.clone(),
            event_bus.clone(),
        )),
        job_queue.clone(),
        event_bus.clone(),
        &config.queue,
        cancel.clone(),
    ));
    info!(
        "Worker pool started ({} per queue)",
        config.queue.workers_per_queue
    );

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!("Listening on http://{}", config.bind_address);
    info!("Health check: http://{}/health", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let in-flight jobs finish before closing the pool
    info!("Stopping workers");
    cancel.cancel();
    for handle in worker_handles {
        if let Err(e) = handle.await {
            error!("Worker task failed: {}", e);
        }
    }
    db_pool.close().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}
