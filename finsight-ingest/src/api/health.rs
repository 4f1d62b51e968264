//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use finsight_common::types::{QUEUE_CUTTING, QUEUE_ENRICHMENT};
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok" or "degraded")
    pub status: String,
    /// Module name ("finsight-ingest")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Build identification
    pub git_hash: String,
    pub build_timestamp: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Pending jobs per queue; absent when the queue cannot be reached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_depths: Option<QueueDepths>,
}

#[derive(Debug, Serialize)]
pub struct QueueDepths {
    pub cutting: u64,
    pub enrichment: u64,
}

/// GET /health
///
/// Reports uptime, build identity, and queue depths. A queue that
/// cannot be counted marks the service degraded rather than failing
/// the endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let depths = match (
        state.job_queue.depth(QUEUE_CUTTING).await,
        state.job_queue.depth(QUEUE_ENRICHMENT).await,
    ) {
        (Ok(cutting), Ok(enrichment)) => Some(QueueDepths {
            cutting,
            enrichment,
        }),
        _ => None,
    };

    let status = if depths.is_some() { "ok" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        module: "finsight-ingest".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        uptime_seconds,
        queue_depths: depths,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
