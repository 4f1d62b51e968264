//! Catalog store: species entries and their related collections
//!
//! The species common name is the deduplication key. Creation goes
//! through a unique-key insert (`ON CONFLICT(name) DO NOTHING` followed
//! by a re-read), so two workers registering the same newly-seen species
//! converge on one row instead of racing a lookup against an insert.

use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use finsight_common::{Error, Result};

use crate::models::{
    CatalogEntry, CatalogEntryDetails, ConservationStatus, SpeciesProfile, WaterType,
};
use crate::utils::retry_on_lock;

/// Look up an entry by exact species name
pub async fn find_by_name(pool: &SqlitePool, name: &str) -> Result<Option<CatalogEntry>> {
    let row = sqlx::query(
        r#"
        SELECT id, name, family, min_size, max_size, water_type, description,
               color_description, depth_range_min, depth_range_max, environment,
               region, conservation_status, cons_status_description, ai_accuracy,
               created_at
        FROM catalog_entries
        WHERE name = ?
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    row.map(entry_from_row).transpose()
}

/// Find an existing entry by the candidate's name, or persist the
/// candidate as a new entry.
///
/// Returns the surviving entry and whether this call created it. When an
/// entry with the same name already exists it is returned unchanged, with
/// no update path. Related collections (colors, predators, fun facts) are
/// written best-effort after a successful entry insert; a failed
/// collection write logs a warning and does not roll back the entry.
pub async fn find_or_create(
    pool: &SqlitePool,
    profile: &SpeciesProfile,
) -> Result<(CatalogEntry, bool)> {
    let id = Uuid::new_v4();
    let id_str = id.to_string();
    let created_at = chrono::Utc::now().to_rfc3339();

    let result = retry_on_lock("catalog find_or_create", 5000, || async {
        sqlx::query(
            r#"
            INSERT INTO catalog_entries (
                id, name, family, min_size, max_size, water_type, description,
                color_description, depth_range_min, depth_range_max, environment,
                region, conservation_status, cons_status_description, ai_accuracy,
                created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(&id_str)
        .bind(&profile.name)
        .bind(&profile.family)
        .bind(profile.min_size)
        .bind(profile.max_size)
        .bind(profile.water_type.as_str())
        .bind(&profile.description)
        .bind(&profile.color_description)
        .bind(profile.depth_range_min)
        .bind(profile.depth_range_max)
        .bind(&profile.environment)
        .bind(&profile.region)
        .bind(profile.conservation_status.as_str())
        .bind(&profile.cons_status_description)
        .bind(profile.ai_accuracy)
        .bind(&created_at)
        .execute(pool)
        .await
        .map_err(Error::Database)
    })
    .await?;

    let created = result.rows_affected() == 1;

    if created {
        tracing::info!(name = %profile.name, entry_id = %id, "Created catalog entry");
        write_related_collections(pool, id, profile).await;
    } else {
        tracing::debug!(name = %profile.name, "Catalog entry already exists");
    }

    // Re-read by name: either our insert or the concurrent winner.
    let entry = find_by_name(pool, &profile.name).await?.ok_or_else(|| {
        Error::Internal(format!(
            "Catalog entry vanished after insert: {}",
            profile.name
        ))
    })?;

    Ok((entry, created))
}

/// Fetch an entry with its related collections
pub async fn fetch_details(
    pool: &SqlitePool,
    name: &str,
) -> Result<Option<CatalogEntryDetails>> {
    let Some(entry) = find_by_name(pool, name).await? else {
        return Ok(None);
    };

    let colors = related_values(pool, "catalog_colors", "color", entry.id).await?;
    let predators = related_values(pool, "catalog_predators", "predator", entry.id).await?;
    let fun_facts = related_values(pool, "catalog_fun_facts", "fact", entry.id).await?;

    Ok(Some(CatalogEntryDetails {
        entry,
        colors,
        predators,
        fun_facts,
    }))
}

/// List all entries, newest first
pub async fn list_entries(pool: &SqlitePool) -> Result<Vec<CatalogEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT id, name, family, min_size, max_size, water_type, description,
               color_description, depth_range_min, depth_range_max, environment,
               region, conservation_status, cons_status_description, ai_accuracy,
               created_at
        FROM catalog_entries
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(entry_from_row).collect()
}

/// Best-effort batch insert of the candidate's related collections.
/// Individual failures are logged and skipped.
async fn write_related_collections(pool: &SqlitePool, entry_id: Uuid, profile: &SpeciesProfile) {
    let entry_id_str = entry_id.to_string();

    for color in &profile.colors {
        let result = sqlx::query("INSERT INTO catalog_colors (id, entry_id, color) VALUES (?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(&entry_id_str)
            .bind(color)
            .execute(pool)
            .await;
        if let Err(e) = result {
            tracing::warn!(entry_id = %entry_id, color = %color, error = %e, "Failed to write color");
        }
    }

    for predator in &profile.predators {
        let result =
            sqlx::query("INSERT INTO catalog_predators (id, entry_id, predator) VALUES (?, ?, ?)")
                .bind(Uuid::new_v4().to_string())
                .bind(&entry_id_str)
                .bind(predator)
                .execute(pool)
                .await;
        if let Err(e) = result {
            tracing::warn!(entry_id = %entry_id, predator = %predator, error = %e, "Failed to write predator");
        }
    }

    for fact in &profile.fun_facts {
        let result =
            sqlx::query("INSERT INTO catalog_fun_facts (id, entry_id, fact) VALUES (?, ?, ?)")
                .bind(Uuid::new_v4().to_string())
                .bind(&entry_id_str)
                .bind(fact)
                .execute(pool)
                .await;
        if let Err(e) = result {
            tracing::warn!(entry_id = %entry_id, error = %e, "Failed to write fun fact");
        }
    }
}

async fn related_values(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    entry_id: Uuid,
) -> Result<Vec<String>> {
    // table/column names come from the three call sites above, never input
    let sql = format!("SELECT {column} FROM {table} WHERE entry_id = ? ORDER BY rowid");
    let rows = sqlx::query(&sql)
        .bind(entry_id.to_string())
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|r| r.get::<String, _>(0)).collect())
}

fn entry_from_row(row: sqlx::sqlite::SqliteRow) -> Result<CatalogEntry> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Internal(format!("Invalid entry id in database: {}", e)))?;

    let water_type: String = row.get("water_type");
    let water_type = WaterType::from_str(&water_type)?;

    let conservation_status: String = row.get("conservation_status");
    let conservation_status = ConservationStatus::from_str(&conservation_status)?;

    let created_at: String = row.get("created_at");
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))?
        .with_timezone(&chrono::Utc);

    Ok(CatalogEntry {
        id,
        name: row.get("name"),
        family: row.get("family"),
        min_size: row.get("min_size"),
        max_size: row.get("max_size"),
        water_type,
        description: row.get("description"),
        color_description: row.get("color_description"),
        depth_range_min: row.get("depth_range_min"),
        depth_range_max: row.get("depth_range_max"),
        environment: row.get("environment"),
        region: row.get("region"),
        conservation_status,
        cons_status_description: row.get("cons_status_description"),
        ai_accuracy: row.get("ai_accuracy"),
        created_at,
    })
}
