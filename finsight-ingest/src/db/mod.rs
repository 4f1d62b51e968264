//! Database access for finsight-ingest
//!
//! One SQLite database holds the catalog, devices, sightings, raw-image
//! lifecycle rows, and the job queue tables.

pub mod catalog;
pub mod raw_images;
pub mod sightings;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Connects to the service database, creating the file (and parent
/// directories) when absent, then ensures the schema exists.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Initialize service tables
///
/// Creates every table if it doesn't exist. Uuids are TEXT; timestamps
/// are RFC 3339 TEXT except where SQL does arithmetic on them
/// (sighting rate limit, queue leases, lifecycle ages), which use
/// INTEGER unix milliseconds.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            device_id TEXT PRIMARY KEY,
            registered_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_entries (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            family TEXT NOT NULL,
            min_size REAL NOT NULL,
            max_size REAL NOT NULL,
            water_type TEXT NOT NULL,
            description TEXT NOT NULL,
            color_description TEXT NOT NULL,
            depth_range_min REAL NOT NULL,
            depth_range_max REAL NOT NULL,
            environment TEXT NOT NULL,
            region TEXT NOT NULL,
            conservation_status TEXT NOT NULL,
            cons_status_description TEXT NOT NULL,
            ai_accuracy REAL NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_colors (
            id TEXT PRIMARY KEY,
            entry_id TEXT NOT NULL REFERENCES catalog_entries(id),
            color TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_predators (
            id TEXT PRIMARY KEY,
            entry_id TEXT NOT NULL REFERENCES catalog_entries(id),
            predator TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_fun_facts (
            id TEXT PRIMARY KEY,
            entry_id TEXT NOT NULL REFERENCES catalog_entries(id),
            fact TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sightings (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL REFERENCES devices(device_id),
            entry_id TEXT NOT NULL REFERENCES catalog_entries(id),
            image_ref TEXT NOT NULL,
            seen_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sightings_device_entry_seen
        ON sightings(device_id, entry_id, seen_at DESC)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_images (
            object_key TEXT PRIMARY KEY,
            device_id TEXT NOT NULL,
            state TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            queue TEXT NOT NULL,
            payload TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            available_at INTEGER NOT NULL,
            leased_until INTEGER,
            enqueued_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_jobs_queue_available
        ON jobs(queue, available_at)
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (devices, catalog, sightings, raw_images, jobs)"
    );

    Ok(())
}

/// Timestamp → INTEGER column value
pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// INTEGER column value → timestamp
pub(crate) fn from_millis(ms: i64) -> finsight_common::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| finsight_common::Error::Internal(format!("Invalid timestamp: {}", ms)))
}
