//! Database retry logic
//!
//! Exponential backoff for transient SQLite lock errors. Several worker
//! tasks and the HTTP surface share one database file, so short lock
//! windows are expected under load.

use std::time::{Duration, Instant};

use finsight_common::{Error, Result};

/// Retry a database operation with exponential backoff until
/// `max_wait_ms` elapses.
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. If successful, return result
/// 3. If "database is locked" error:
///    a. If time elapsed < max_wait_ms: log WARN, backoff, retry
///    b. If time elapsed >= max_wait_ms: log ERROR, return error
/// 4. If other error: return error immediately (no retry)
///
/// **Backoff:** starts at 10ms, doubles per attempt, capped at 1000ms.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(
                operation = operation_name,
                attempt,
                "Retrying database operation"
            );
        }

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                let is_lock_error = match &err {
                    Error::Database(db_err) => db_err.to_string().contains("database is locked"),
                    _ => false,
                };

                if !is_lock_error {
                    return Err(err);
                }

                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(Error::Internal(format!(
                        "Database locked after {} attempts ({} ms elapsed, max {} ms)",
                        attempt,
                        elapsed.as_millis(),
                        max_wait_ms
                    )));
                }

                let next_backoff_ms = backoff_ms.min(1000);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = next_backoff_ms,
                    "Database locked, will retry after backoff"
                );
                tokio::time::sleep(Duration::from_millis(next_backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let result = retry_on_lock("test_op", 5000, || async { Ok::<i32, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn non_lock_error_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result = retry_on_lock("test_op", 5000, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, Error>(Error::Internal("boom".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lock_error_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_on_lock("test_op", 5000, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Database(sqlx::Error::Protocol(
                        "database is locked".to_string(),
                    )))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn lock_error_gives_up_after_max_wait() {
        let result = retry_on_lock("test_op", 30, || async {
            Err::<i32, Error>(Error::Database(sqlx::Error::Protocol(
                "database is locked".to_string(),
            )))
        })
        .await;

        match result {
            Err(Error::Internal(msg)) => assert!(msg.contains("Database locked")),
            other => panic!("expected Internal error, got {other:?}"),
        }
    }
}
