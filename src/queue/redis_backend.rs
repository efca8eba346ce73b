//! Redis-backed queue storage.
//!
//! Job bodies live under their own key and queues hold job ids, so moving a
//! job between wait, active and failed lists never rewrites the body.

use crate::config::QueueConfig;
use crate::queue::keys::{registry_key, QueueKeys};
use crate::queue::{QueueBackend, QueueError, QueueResult, RawJob};
use async_trait::async_trait;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Redis connection pool type alias
pub type RedisPool = Pool<RedisConnectionManager>;

/// Delay between empty polls while reserving.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Build the pool and check the server answers.
pub async fn init_queue_pool(config: &QueueConfig) -> QueueResult<RedisPool> {
    info!(
        "Initializing Redis queue pool: max_connections={}, redis_url={}",
        config.max_connections, config.redis_url
    );

    let manager = RedisConnectionManager::new(config.redis_url.clone()).map_err(|e| {
        error!("Failed to create Redis connection manager: {}", e);
        QueueError::ConnectionError(e.to_string())
    })?;

    let pool = Pool::builder()
        .max_size(config.max_connections)
        .connection_timeout(Duration::from_secs(5))
        .build(manager)
        .await
        .map_err(|e| {
            error!("Failed to build Redis connection pool: {}", e);
            QueueError::ConnectionError(e.to_string())
        })?;

    health_check(&pool).await?;
    info!("Redis queue pool initialized successfully");
    Ok(pool)
}

pub async fn health_check(pool: &RedisPool) -> QueueResult<()> {
    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
    Ok(())
}

pub struct RedisQueueBackend {
    pool: RedisPool,
    prefix: String,
    closed: AtomicBool,
}

impl RedisQueueBackend {
    pub fn new(pool: RedisPool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
            closed: AtomicBool::new(false),
        }
    }

    fn keys(&self, queue: &str) -> QueueKeys {
        QueueKeys::new(&self.prefix, queue)
    }

    fn ensure_open(&self, queue: &str) -> QueueResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed(queue.to_string()));
        }
        Ok(())
    }

    /// Move one id from wait to active and load its body. `None` when the
    /// wait list is empty.
    async fn try_reserve(&self, keys: &QueueKeys) -> QueueResult<Option<RawJob>> {
        let mut conn = self.pool.get().await?;
        loop {
            let job_id: Option<String> = redis::cmd("RPOPLPUSH")
                .arg(keys.wait())
                .arg(keys.active())
                .query_async(&mut *conn)
                .await?;
            let Some(job_id) = job_id else {
                return Ok(None);
            };

            let body: Option<String> = redis::cmd("GET")
                .arg(keys.job(&job_id))
                .query_async(&mut *conn)
                .await?;
            let Some(body) = body else {
                warn!(job_id = %job_id, "dropping queued id with no job body");
                let _: i64 = redis::cmd("LREM")
                    .arg(keys.active())
                    .arg(1)
                    .arg(&job_id)
                    .query_async(&mut *conn)
                    .await?;
                continue;
            };

            let mut job: RawJob = serde_json::from_str(&body)?;
            job.attempts += 1;
            let _: () = redis::cmd("SET")
                .arg(keys.job(&job_id))
                .arg(serde_json::to_string(&job)?)
                .query_async(&mut *conn)
                .await?;
            return Ok(Some(job));
        }
    }
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn declare(&self, queue: &str) -> QueueResult<()> {
        self.ensure_open(queue)?;
        let mut conn = self.pool.get().await?;
        let _: i64 = redis::cmd("SADD")
            .arg(registry_key(&self.prefix))
            .arg(queue)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn push(&self, queue: &str, job: &RawJob) -> QueueResult<()> {
        self.ensure_open(queue)?;
        let keys = self.keys(queue);
        let body = serde_json::to_string(job)?;
        let mut conn = self.pool.get().await?;
        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(keys.job(&job.id))
            .arg(body)
            .ignore()
            .cmd("LPUSH")
            .arg(keys.wait())
            .arg(&job.id)
            .ignore()
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn reserve(&self, queue: &str, wait: Duration) -> QueueResult<Option<RawJob>> {
        let keys = self.keys(queue);
        let deadline = Instant::now() + wait;
        loop {
            self.ensure_open(queue)?;
            if let Some(job) = self.try_reserve(&keys).await? {
                return Ok(Some(job));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::time::sleep(remaining.min(POLL_INTERVAL)).await;
        }
    }

    async fn complete(&self, queue: &str, job_id: &str) -> QueueResult<()> {
        let keys = self.keys(queue);
        let mut conn = self.pool.get().await?;
        let _: () = redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(keys.active())
            .arg(1)
            .arg(job_id)
            .ignore()
            .cmd("DEL")
            .arg(keys.job(job_id))
            .ignore()
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn fail(&self, queue: &str, job_id: &str, reason: &str) -> QueueResult<()> {
        let keys = self.keys(queue);
        let mut conn = self.pool.get().await?;
        let _: () = redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(keys.active())
            .arg(1)
            .arg(job_id)
            .ignore()
            .cmd("LPUSH")
            .arg(keys.failed())
            .arg(job_id)
            .ignore()
            .cmd("HSET")
            .arg(keys.failed_reasons())
            .arg(job_id)
            .arg(reason)
            .ignore()
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn requeue_active(&self, queue: &str) -> QueueResult<usize> {
        self.ensure_open(queue)?;
        let keys = self.keys(queue);
        let mut conn = self.pool.get().await?;
        let mut moved = 0;
        // Newest reservation first onto the consuming end, so the oldest
        // stalled job is redelivered first.
        loop {
            let job_id: Option<String> = redis::cmd("LMOVE")
                .arg(keys.active())
                .arg(keys.wait())
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut *conn)
                .await?;
            if job_id.is_none() {
                return Ok(moved);
            }
            moved += 1;
        }
    }

    async fn close(&self) -> QueueResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(prefix = %self.prefix, "closing Redis queue backend");
        }
        Ok(())
    }
}
