//! Queue worker pool
//!
//! Each queue gets a small set of identical workers. A worker claims
//! one job at a time, hands it to the queue's handler, and settles the
//! job according to the handler's outcome: completed and terminally
//! failed jobs are acked (a terminal failure would only fail the same
//! way again), transient failures are nacked for redelivery.

pub mod cropper;
pub mod enricher;

pub use cropper::CropperWorker;
pub use enricher::EnrichmentWorker;

use crate::queue::{JobQueue, LeasedJob};
use async_trait::async_trait;
use chrono::Utc;
use finsight_common::config::QueueConfig;
use finsight_common::events::{EventBus, PipelineEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How a handler settled one job.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// Job finished; ack it
    Complete,
    /// Terminal failure; ack it so it is not redelivered
    Drop(String),
    /// Transient failure; nack it for redelivery
    Retry(String),
}

/// Classify a handler result by the error taxonomy: terminal errors are
/// dropped, everything else is retried.
pub fn outcome_from(result: finsight_common::Result<()>) -> HandlerOutcome {
    match result {
        Ok(()) => HandlerOutcome::Complete,
        Err(e) if e.is_terminal() => HandlerOutcome::Drop(e.to_string()),
        Err(e) => HandlerOutcome::Retry(e.to_string()),
    }
}

/// One queue's job processor.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The queue this handler consumes.
    fn queue(&self) -> &'static str;

    /// Process one leased job. Must not panic on malformed payloads;
    /// classify them as [`HandlerOutcome::Drop`] instead.
    async fn handle(&self, job: &LeasedJob) -> HandlerOutcome;
}

/// Spawn `config.workers_per_queue` workers consuming the handler's
/// queue. Workers run until `cancel` fires and never abort mid-job;
/// cancellation is observed between jobs.
pub fn spawn_workers(
    handler: Arc<dyn JobHandler>,
    queue: Arc<dyn JobQueue>,
    events: EventBus,
    config: &QueueConfig,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    (0..config.workers_per_queue)
        .map(|worker_index| {
            let handler = handler.clone();
            let queue = queue.clone();
            let events = events.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                tracing::info!(
                    queue = handler.queue(),
                    worker = worker_index,
                    "Worker started"
                );
                worker_loop(handler, queue, events, poll_interval, cancel, worker_index).await;
                tracing::info!(worker = worker_index, "Worker stopped");
            })
        })
        .collect()
}

async fn worker_loop(
    handler: Arc<dyn JobHandler>,
    queue: Arc<dyn JobQueue>,
    events: EventBus,
    poll_interval: Duration,
    cancel: CancellationToken,
    worker_index: usize,
) {
    let queue_name = handler.queue();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let job = match queue.dequeue(queue_name).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(queue = queue_name, error = %e, "Failed to dequeue");
                if idle(&cancel, poll_interval).await {
                    break;
                }
                continue;
            }
        };

        let Some(job) = job else {
            if idle(&cancel, poll_interval).await {
                break;
            }
            continue;
        };

        tracing::debug!(
            queue = queue_name,
            job_id = %job.id,
            attempt = job.attempts,
            worker = worker_index,
            "Processing job"
        );

        match handler.handle(&job).await {
            HandlerOutcome::Complete => {
                if let Err(e) = queue.ack(&job).await {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to ack completed job");
                }
            }
            HandlerOutcome::Drop(reason) => {
                tracing::warn!(
                    queue = queue_name,
                    job_id = %job.id,
                    attempt = job.attempts,
                    reason = %reason,
                    "Dropping job after terminal failure"
                );
                events.emit_lossy(PipelineEvent::JobFailed {
                    queue: queue_name.to_string(),
                    job_id: job.id,
                    error: reason,
                    will_retry: false,
                    timestamp: Utc::now(),
                });
                if let Err(e) = queue.ack(&job).await {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to ack dropped job");
                }
            }
            HandlerOutcome::Retry(reason) => {
                tracing::warn!(
                    queue = queue_name,
                    job_id = %job.id,
                    attempt = job.attempts,
                    reason = %reason,
                    "Job failed, will retry"
                );
                events.emit_lossy(PipelineEvent::JobFailed {
                    queue: queue_name.to_string(),
                    job_id: job.id,
                    error: reason,
                    will_retry: true,
                    timestamp: Utc::now(),
                });
                if let Err(e) = queue.nack(&job).await {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to nack job");
                }
            }
        }
    }
}

/// Sleep for one poll interval or until cancelled. Returns `true` when
/// the loop should exit.
async fn idle(cancel: &CancellationToken, poll_interval: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(poll_interval) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database_pool;
    use crate::queue::SqliteJobQueue;
    use finsight_common::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingHandler {
        outcome: fn() -> HandlerOutcome,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        fn queue(&self) -> &'static str {
            "test-queue"
        }

        async fn handle(&self, _job: &LeasedJob) -> HandlerOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn test_config() -> QueueConfig {
        QueueConfig {
            workers_per_queue: 1,
            poll_interval_ms: 10,
            lease_ms: 60_000,
        }
    }

    async fn queue_fixture() -> (TempDir, Arc<SqliteJobQueue>) {
        let dir = TempDir::new().unwrap();
        let pool = init_database_pool(&dir.path().join("test.db")).await.unwrap();
        let queue = Arc::new(SqliteJobQueue::new(pool, 60_000).with_nack_delay_ms(0));
        (dir, queue)
    }

    #[test]
    fn test_outcome_classification() {
        assert!(matches!(outcome_from(Ok(())), HandlerOutcome::Complete));
        assert!(matches!(
            outcome_from(Err(Error::parse("payload", "oops"))),
            HandlerOutcome::Drop(_)
        ));
        assert!(matches!(
            outcome_from(Err(Error::Storage("unreachable".to_string()))),
            HandlerOutcome::Retry(_)
        ));
    }

    #[tokio::test]
    async fn test_completed_job_is_acked() {
        let (_dir, queue) = queue_fixture().await;
        queue.enqueue("test-queue", "payload").await.unwrap();

        let handler = Arc::new(CountingHandler {
            outcome: || HandlerOutcome::Complete,
            calls: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        let handles = spawn_workers(
            handler.clone(),
            queue.clone(),
            EventBus::new(16),
            &test_config(),
            cancel.clone(),
        );

        // Wait for the worker to drain the queue
        for _ in 0..100 {
            if queue.depth("test-queue").await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.depth("test-queue").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dropped_job_is_not_redelivered() {
        let (_dir, queue) = queue_fixture().await;
        queue.enqueue("test-queue", "broken").await.unwrap();

        let handler = Arc::new(CountingHandler {
            outcome: || HandlerOutcome::Drop("bad payload".to_string()),
            calls: AtomicUsize::new(0),
        });
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let cancel = CancellationToken::new();
        let handles = spawn_workers(
            handler.clone(),
            queue.clone(),
            events,
            &test_config(),
            cancel.clone(),
        );

        // JobFailed with will_retry = false announces the drop
        let event = rx.recv().await.unwrap();
        match event {
            PipelineEvent::JobFailed { will_retry, .. } => assert!(!will_retry),
            other => panic!("Unexpected event {:?}", other),
        }

        // Give the worker a chance to (incorrectly) redeliver
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.depth("test-queue").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retried_job_is_redelivered() {
        let (_dir, queue) = queue_fixture().await;
        queue.enqueue("test-queue", "flaky").await.unwrap();

        let handler = Arc::new(CountingHandler {
            outcome: || HandlerOutcome::Retry("upstream down".to_string()),
            calls: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        let handles = spawn_workers(
            handler.clone(),
            queue.clone(),
            EventBus::new(16),
            &test_config(),
            cancel.clone(),
        );

        // With a zero nack delay the job comes back quickly
        for _ in 0..100 {
            if handler.calls.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(handler.calls.load(Ordering::SeqCst) >= 2);
        // Still queued; nothing acked it
        assert_eq!(queue.depth("test-queue").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_workers_stop_on_cancellation() {
        let (_dir, queue) = queue_fixture().await;

        let handler = Arc::new(CountingHandler {
            outcome: || HandlerOutcome::Complete,
            calls: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        let config = QueueConfig {
            workers_per_queue: 3,
            ..test_config()
        };
        let handles = spawn_workers(
            handler,
            queue.clone(),
            EventBus::new(16),
            &config,
            cancel.clone(),
        );
        assert_eq!(handles.len(), 3);

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
