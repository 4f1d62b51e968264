//! Raw-image lifecycle persistence
//!
//! One row per uploaded raw image, advanced through the
//! UPLOADED → DISPATCHED → PROCESSED → DELETED chain with guarded
//! updates: an advance only succeeds from the state's unique
//! predecessor, so replays and out-of-order redeliveries surface as a
//! `false` return instead of corrupting the record.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use finsight_common::Result;

use crate::db::{from_millis, to_millis};
use crate::models::raw_image::{RawImageRecord, RawImageState};

/// Insert a new lifecycle row in UPLOADED
pub async fn insert_uploaded(
    pool: &SqlitePool,
    object_key: &str,
    device_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let now_ms = to_millis(now);
    sqlx::query(
        r#"
        INSERT INTO raw_images (object_key, device_id, state, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(object_key)
    .bind(device_id)
    .bind(RawImageState::Uploaded.as_str())
    .bind(now_ms)
    .bind(now_ms)
    .execute(pool)
    .await?;
    Ok(())
}

/// Advance a lifecycle row to `to`, guarded by its unique predecessor.
///
/// Returns whether the row advanced. `false` means the row was absent or
/// not in the predecessor state (e.g. a redelivered job re-running a
/// completed step); callers log and continue.
pub async fn advance(
    pool: &SqlitePool,
    object_key: &str,
    to: RawImageState,
    now: DateTime<Utc>,
) -> Result<bool> {
    let Some(from) = predecessor(to) else {
        return Ok(false); // UPLOADED is only ever inserted
    };

    let result = sqlx::query(
        r#"
        UPDATE raw_images SET state = ?, updated_at = ?
        WHERE object_key = ? AND state = ?
        "#,
    )
    .bind(to.as_str())
    .bind(to_millis(now))
    .bind(object_key)
    .bind(from.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Fetch one lifecycle row
pub async fn get(pool: &SqlitePool, object_key: &str) -> Result<Option<RawImageRecord>> {
    let row = sqlx::query(
        "SELECT object_key, device_id, state, created_at, updated_at FROM raw_images WHERE object_key = ?",
    )
    .bind(object_key)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let state: String = row.get("state");
            Ok(Some(RawImageRecord {
                object_key: row.get("object_key"),
                device_id: row.get("device_id"),
                state: RawImageState::from_str(&state)?,
                created_at: from_millis(row.get("created_at"))?,
                updated_at: from_millis(row.get("updated_at"))?,
            }))
        }
        None => Ok(None),
    }
}

/// The unique legal predecessor of each advanced state
fn predecessor(state: RawImageState) -> Option<RawImageState> {
    match state {
        RawImageState::Uploaded => None,
        RawImageState::Dispatched => Some(RawImageState::Uploaded),
        RawImageState::Processed => Some(RawImageState::Dispatched),
        RawImageState::Deleted => Some(RawImageState::Processed),
    }
}
