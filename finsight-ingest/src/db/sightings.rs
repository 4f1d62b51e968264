//! Device registry and sighting store
//!
//! Sighting recording enforces the 10-second rate limit inside one
//! conditional INSERT: the row is written only when no sighting of the
//! same (device, entry) pair is newer than `now - 10s`, evaluated by the
//! database. Two workers racing inside the window cannot both insert.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use finsight_common::{Error, Result};

use crate::db::{from_millis, to_millis};
use crate::models::{Device, Sighting, SightingOutcome, SightingWithEntry};
use crate::utils::retry_on_lock;

/// Minimum spacing between sightings of one species on one device
pub const RATE_LIMIT_MS: i64 = 10_000;

/// Register a device identifier.
///
/// Returns the registration record and whether this call created it;
/// an already-registered id is returned unchanged with `false`.
pub async fn register_device(pool: &SqlitePool, device_id: &str) -> Result<(Device, bool)> {
    if device_id.trim().is_empty() {
        return Err(Error::InvalidInput("Device id must not be empty".to_string()));
    }

    let registered_at = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO devices (device_id, registered_at)
        VALUES (?, ?)
        ON CONFLICT(device_id) DO NOTHING
        "#,
    )
    .bind(device_id)
    .bind(registered_at.to_rfc3339())
    .execute(pool)
    .await?;

    let created = result.rows_affected() == 1;
    let device = get_device(pool, device_id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Device vanished after insert: {}", device_id)))?;

    Ok((device, created))
}

/// Look up a registered device
pub async fn get_device(pool: &SqlitePool, device_id: &str) -> Result<Option<Device>> {
    let row = sqlx::query("SELECT device_id, registered_at FROM devices WHERE device_id = ?")
        .bind(device_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let registered_at: String = row.get("registered_at");
            let registered_at = DateTime::parse_from_rfc3339(&registered_at)
                .map_err(|e| Error::Internal(format!("Failed to parse registered_at: {}", e)))?
                .with_timezone(&Utc);
            Ok(Some(Device {
                device_id: row.get("device_id"),
                registered_at,
            }))
        }
        None => Ok(None),
    }
}

/// Record a sighting, subject to the rate limit.
///
/// `now` is passed in rather than read from the clock so the window is
/// testable and so callers in one pipeline step share one notion of now.
pub async fn record_sighting(
    pool: &SqlitePool,
    device_id: &str,
    entry_id: Uuid,
    image_ref: &str,
    now: DateTime<Utc>,
) -> Result<SightingOutcome> {
    if get_device(pool, device_id).await?.is_none() {
        return Err(Error::NotFound(format!("Device not registered: {}", device_id)));
    }

    let id = Uuid::new_v4();
    let id_str = id.to_string();
    let entry_id_str = entry_id.to_string();
    let seen_at_ms = to_millis(now);
    let cutoff_ms = seen_at_ms - RATE_LIMIT_MS;

    let result = retry_on_lock("record_sighting", 5000, || async {
        sqlx::query(
            r#"
            INSERT INTO sightings (id, device_id, entry_id, image_ref, seen_at)
            SELECT ?, ?, ?, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM sightings
                WHERE device_id = ? AND entry_id = ? AND seen_at > ?
            )
            "#,
        )
        .bind(&id_str)
        .bind(device_id)
        .bind(&entry_id_str)
        .bind(image_ref)
        .bind(seen_at_ms)
        .bind(device_id)
        .bind(&entry_id_str)
        .bind(cutoff_ms)
        .execute(pool)
        .await
        .map_err(Error::Database)
    })
    .await?;

    if result.rows_affected() == 1 {
        tracing::info!(device_id, entry_id = %entry_id, "Sighting recorded");
        return Ok(SightingOutcome::Recorded {
            sighting: Sighting {
                id,
                device_id: device_id.to_string(),
                entry_id,
                image_ref: image_ref.to_string(),
                seen_at: now,
            },
        });
    }

    // Suppressed: report when the pair was last seen (tie-break: max timestamp).
    let last_seen_ms: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(seen_at) FROM sightings WHERE device_id = ? AND entry_id = ?",
    )
    .bind(device_id)
    .bind(&entry_id_str)
    .fetch_one(pool)
    .await?;

    let last_seen_ms = last_seen_ms.ok_or_else(|| {
        Error::Internal("Sighting insert suppressed but no prior sighting found".to_string())
    })?;
    let last_seen_at = from_millis(last_seen_ms)?;

    tracing::info!(
        device_id,
        entry_id = %entry_id,
        last_seen_at = %last_seen_at,
        "Sighting skipped by rate limit"
    );
    Ok(SightingOutcome::Skipped { last_seen_at })
}

/// List a device's sightings joined with catalog entries, newest first
pub async fn sightings_for_device(
    pool: &SqlitePool,
    device_id: &str,
) -> Result<Vec<SightingWithEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT s.id, s.entry_id, s.image_ref, s.seen_at, c.name, c.family
        FROM sightings s
        JOIN catalog_entries c ON c.id = s.entry_id
        WHERE s.device_id = ?
        ORDER BY s.seen_at DESC
        "#,
    )
    .bind(device_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let id: String = row.get("id");
            let entry_id: String = row.get("entry_id");
            Ok(SightingWithEntry {
                id: Uuid::parse_str(&id)
                    .map_err(|e| Error::Internal(format!("Invalid sighting id: {}", e)))?,
                entry_id: Uuid::parse_str(&entry_id)
                    .map_err(|e| Error::Internal(format!("Invalid entry id: {}", e)))?,
                species_name: row.get("name"),
                family: row.get("family"),
                image_ref: row.get("image_ref"),
                seen_at: from_millis(row.get("seen_at"))?,
            })
        })
        .collect()
}
