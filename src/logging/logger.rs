use flume::{bounded, Receiver, Sender};
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::types::ActivityLog;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Queue capacity before logs start getting dropped
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub worker_count: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 100,
            batch_timeout_ms: 1000,
            worker_count: 2,
        }
    }
}

/// Async activity logger. Callers enqueue fire-and-forget; worker tasks flush
/// batches to `chat_activity_logs`. Initialized once at startup and injected
/// into the components that log.
#[derive(Clone)]
pub struct ActivityLogger {
    sender: Option<Sender<ActivityLog>>,
}

impl ActivityLogger {
    pub fn new(pool: PgPool, config: LoggerConfig) -> Self {
        let (sender, receiver) = bounded(config.queue_capacity);

        info!(
            "Initializing ActivityLogger: queue={}, batch={}, timeout={}ms, workers={}",
            config.queue_capacity, config.batch_size, config.batch_timeout_ms, config.worker_count
        );

        for worker_id in 0..config.worker_count {
            let pool = pool.clone();
            let receiver = receiver.clone();
            let config = config.clone();

            tokio::spawn(async move {
                Self::worker_loop(worker_id, pool, receiver, config).await;
            });
        }

        Self {
            sender: Some(sender),
        }
    }

    /// Logger that discards everything. For tests and tooling without a
    /// database.
    pub fn noop() -> Self {
        Self { sender: None }
    }

    /// Non-blocking enqueue; drops the entry when the queue is full.
    pub fn log(&self, activity: ActivityLog) {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(e) = sender.try_send(activity) {
            warn!("Failed to enqueue activity log (queue full?): {}", e);
        }
    }

    async fn worker_loop(
        worker_id: usize,
        pool: PgPool,
        receiver: Receiver<ActivityLog>,
        config: LoggerConfig,
    ) {
        info!("Activity log worker {} started", worker_id);

        let batch_timeout = Duration::from_millis(config.batch_timeout_ms);
        let mut batch: Vec<ActivityLog> = Vec::with_capacity(config.batch_size);

        loop {
            let deadline = tokio::time::Instant::now() + batch_timeout;

            while batch.len() < config.batch_size {
                match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
                    Ok(Ok(log)) => batch.push(log),
                    Ok(Err(_)) => {
                        // Channel closed: final flush, then exit.
                        if !batch.is_empty() {
                            Self::flush_batch(&pool, &batch, worker_id).await;
                        }
                        info!("Activity log worker {} shutting down", worker_id);
                        return;
                    }
                    Err(_) => break,
                }
            }

            if !batch.is_empty() {
                Self::flush_batch(&pool, &batch, worker_id).await;
                batch.clear();
            } else {
                sleep(Duration::from_millis(100)).await;
            }
        }
    }

    async fn flush_batch(pool: &PgPool, batch: &[ActivityLog], worker_id: usize) {
        debug!("Worker {} flushing {} activity logs", worker_id, batch.len());

        let mut query_builder = sqlx::QueryBuilder::new(
            r#"
            INSERT INTO chat_activity_logs (
                session_id, user_id, activity_type, activity_status,
                message_content, response_content, fragment_count,
                processing_time_ms, llm_duration_ms, retrieval_duration_ms,
                error_message, created_at
            )
            "#,
        );

        query_builder.push_values(batch, |mut b, log| {
            b.push_bind(log.session_id)
                .push_bind(log.user_id)
                .push_bind(log.activity_type.as_str())
                .push_bind(log.activity_status.as_str())
                .push_bind(&log.message_content)
                .push_bind(&log.response_content)
                .push_bind(log.fragment_count)
                .push_bind(log.processing_time_ms)
                .push_bind(log.llm_duration_ms)
                .push_bind(log.retrieval_duration_ms)
                .push_bind(&log.error_message)
                .push_bind(log.created_at);
        });

        if let Err(e) = query_builder.build().execute(pool).await {
            error!("Worker {} failed to insert activity batch: {}", worker_id, e);
        }
    }
}
