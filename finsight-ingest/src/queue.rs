//! Job queue with explicit at-least-once semantics
//!
//! [`JobQueue`] is the contract the dispatcher and workers share:
//! `enqueue` / `dequeue` (which grants a lease) / `ack` (done, remove) /
//! `nack` (failed, redeliver). Delivery is at-least-once: a lease that
//! expires without an ack puts the job back, so every handler must be
//! idempotent against redelivery.
//!
//! [`SqliteJobQueue`] keeps jobs in the service database. Claiming is a
//! single `UPDATE ... WHERE id = (SELECT ...) RETURNING` statement, so
//! concurrent workers never lease the same job twice.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use finsight_common::{Error, Result};

use crate::db::to_millis;
use crate::utils::retry_on_lock;

/// Redelivery delay applied by `nack`, keeping a failing upstream from
/// being hammered in a tight dequeue loop
const NACK_DELAY_MS: i64 = 1_000;

/// One job held under lease by a worker
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub id: Uuid,
    pub queue: String,
    /// Base64 payload envelope (see `finsight_common::types`)
    pub payload: String,
    /// Delivery count, this delivery included
    pub attempts: i64,
}

/// Queue abstraction used by the dispatcher and the worker pool
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Verify the queue backend exists and is usable
    async fn ready(&self) -> Result<()>;

    /// Append a payload; returns the job id
    async fn enqueue(&self, queue: &str, payload: &str) -> Result<Uuid>;

    /// Claim the next available job, granting a lease. `None` when the
    /// queue has nothing deliverable right now.
    async fn dequeue(&self, queue: &str) -> Result<Option<LeasedJob>>;

    /// Remove a completed (or terminally dropped) job
    async fn ack(&self, job: &LeasedJob) -> Result<()>;

    /// Release a failed job for redelivery
    async fn nack(&self, job: &LeasedJob) -> Result<()>;

    /// Jobs not yet acked (available and leased)
    async fn depth(&self, queue: &str) -> Result<u64>;
}

/// Database-backed queue
pub struct SqliteJobQueue {
    pool: SqlitePool,
    lease_ms: i64,
    nack_delay_ms: i64,
}

impl SqliteJobQueue {
    pub fn new(pool: SqlitePool, lease_ms: i64) -> Self {
        Self {
            pool,
            lease_ms,
            nack_delay_ms: NACK_DELAY_MS,
        }
    }

    /// Override the redelivery delay (tests use 0)
    pub fn with_nack_delay_ms(mut self, ms: i64) -> Self {
        self.nack_delay_ms = ms;
        self
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn ready(&self) -> Result<()> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs LIMIT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Queue(format!("Queue storage unavailable: {}", e)))?;
        Ok(())
    }

    async fn enqueue(&self, queue: &str, payload: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now_ms = to_millis(Utc::now());

        retry_on_lock("queue enqueue", 5000, || async {
            sqlx::query(
                r#"
                INSERT INTO jobs (id, queue, payload, attempts, available_at, leased_until, enqueued_at)
                VALUES (?, ?, ?, 0, ?, NULL, ?)
                "#,
            )
            .bind(id.to_string())
            .bind(queue)
            .bind(payload)
            .bind(now_ms)
            .bind(now_ms)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
            Ok(())
        })
        .await?;

        tracing::debug!(queue, job_id = %id, "Enqueued job");
        Ok(id)
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<LeasedJob>> {
        let now_ms = to_millis(Utc::now());
        let lease_until = now_ms + self.lease_ms;

        // Single-statement claim: expired leases are deliverable again,
        // and the write lock serializes concurrent claimers.
        let row = retry_on_lock("queue dequeue", 5000, || async {
            sqlx::query(
                r#"
                UPDATE jobs
                SET leased_until = ?, attempts = attempts + 1
                WHERE id = (
                    SELECT id FROM jobs
                    WHERE queue = ?
                      AND available_at <= ?
                      AND (leased_until IS NULL OR leased_until <= ?)
                    ORDER BY available_at, rowid
                    LIMIT 1
                )
                RETURNING id, queue, payload, attempts
                "#,
            )
            .bind(lease_until)
            .bind(queue)
            .bind(now_ms)
            .bind(now_ms)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)
        })
        .await?;

        match row {
            Some(row) => {
                let id: String = row.get("id");
                let id = Uuid::parse_str(&id)
                    .map_err(|e| Error::Internal(format!("Invalid job id in queue: {}", e)))?;
                let job = LeasedJob {
                    id,
                    queue: row.get("queue"),
                    payload: row.get("payload"),
                    attempts: row.get("attempts"),
                };
                tracing::debug!(queue, job_id = %job.id, attempts = job.attempts, "Leased job");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, job: &LeasedJob) -> Result<()> {
        retry_on_lock("queue ack", 5000, || async {
            sqlx::query("DELETE FROM jobs WHERE id = ?")
                .bind(job.id.to_string())
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
            Ok(())
        })
        .await?;
        tracing::debug!(queue = %job.queue, job_id = %job.id, "Acked job");
        Ok(())
    }

    async fn nack(&self, job: &LeasedJob) -> Result<()> {
        let available_at = to_millis(Utc::now()) + self.nack_delay_ms;
        retry_on_lock("queue nack", 5000, || async {
            sqlx::query("UPDATE jobs SET leased_until = NULL, available_at = ? WHERE id = ?")
                .bind(available_at)
                .bind(job.id.to_string())
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
            Ok(())
        })
        .await?;
        tracing::debug!(queue = %job.queue, job_id = %job.id, attempts = job.attempts, "Nacked job");
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE queue = ?")
            .bind(queue)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
