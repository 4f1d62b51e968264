//! finsight-ingest library interface
//!
//! Exposes the service's components for integration testing: the HTTP
//! router, the queue workers, and the seams (object store, job queue,
//! language model) tests substitute doubles at.

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;
pub mod services;
pub mod storage;
pub mod utils;
pub mod workers;

pub use crate::error::{ApiError, ApiResult};

use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use finsight_common::config::Config;
use finsight_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::queue::JobQueue;
use crate::services::cut_dispatcher::CutDispatcher;
use crate::services::detection_filter::DetectionFilter;
use crate::services::language_model::LanguageModel;
use crate::storage::ObjectStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Resolved service configuration
    pub config: Arc<Config>,
    /// Blob storage for raw images and crops
    pub object_store: Arc<dyn ObjectStore>,
    /// Job queue backing the cutting and enrichment workers
    pub job_queue: Arc<dyn JobQueue>,
    /// Vision analysis plus fish filtering
    pub detection_filter: Arc<DetectionFilter>,
    /// Language model used by enrichment and chat
    pub language_model: Arc<dyn LanguageModel>,
    /// Accept-and-queue dispatch for uploads
    pub cut_dispatcher: Arc<CutDispatcher>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        config: Arc<Config>,
        object_store: Arc<dyn ObjectStore>,
        job_queue: Arc<dyn JobQueue>,
        detection_filter: Arc<DetectionFilter>,
        language_model: Arc<dyn LanguageModel>,
    ) -> Self {
        let cut_dispatcher = Arc::new(CutDispatcher::new(
            db.clone(),
            object_store.clone(),
            job_queue.clone(),
            event_bus.clone(),
        ));

        Self {
            db,
            event_bus,
            config,
            object_store,
            job_queue,
            detection_filter,
            language_model,
            cut_dispatcher,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::ingest_routes())
        .merge(api::device_routes())
        .merge(api::catalog_routes())
        .merge(api::chat_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
