//! Durable named job queues.
//!
//! A `QueueBackend` stores jobs (Redis in production, memory for local runs
//! and tests). `NamedQueue` binds one queue name to a backend. Each flow
//! wraps a `NamedQueue` in a `QueueWrapper` whose `enqueue` writes the ledger
//! row first and only then pushes the job that references it.

pub mod bulk_transaction;
pub mod error;
pub mod keys;
pub mod memory;
pub mod redis_backend;
pub mod registration;
pub mod server_registration;
pub mod transaction;
pub mod verify_account;

use crate::config::QueueConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

pub use error::{QueueError, QueueResult};

/// Queue names shared by producers and consumers.
pub mod names {
    pub const BOX_ACCOUNT_REGISTRATION: &str = "box-account-registration";
    pub const BOX_VERIFY_ACCOUNT: &str = "box-verify-account";
    pub const SERVER_ACCOUNT_REGISTRATION: &str = "server-account-registration";
    pub const TRANSACTION: &str = "transaction";
    pub const BULK_TRANSACTION: &str = "bulk-transaction";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job<T> {
    pub id: String,
    pub name: String,
    pub data: T,
    pub enqueued_at: DateTime<Utc>,
    /// Times the job has been handed to a consumer.
    #[serde(default)]
    pub attempts: u32,
}

pub type RawJob = Job<JsonValue>;

impl RawJob {
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> QueueResult<Job<T>> {
        Ok(Job {
            id: self.id.clone(),
            name: self.name.clone(),
            data: serde_json::from_value(self.data.clone())?,
            enqueued_at: self.enqueued_at,
            attempts: self.attempts,
        })
    }
}

/// Storage for named queues. Delivery is at-least-once: a reserved job stays
/// in the queue's active set until completed or failed.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Create the queue if absent.
    async fn declare(&self, queue: &str) -> QueueResult<()>;

    async fn push(&self, queue: &str, job: &RawJob) -> QueueResult<()>;

    /// Take the oldest waiting job, waiting up to `wait` for one to arrive.
    async fn reserve(&self, queue: &str, wait: Duration) -> QueueResult<Option<RawJob>>;

    async fn complete(&self, queue: &str, job_id: &str) -> QueueResult<()>;

    /// Record the job as failed. Failed jobs are kept for inspection and are
    /// never retried.
    async fn fail(&self, queue: &str, job_id: &str, reason: &str) -> QueueResult<()>;

    /// Move jobs left in the active set back to waiting. Returns how many.
    async fn requeue_active(&self, queue: &str) -> QueueResult<usize>;

    async fn close(&self) -> QueueResult<()>;
}

/// Handle on one named queue.
#[derive(Clone)]
pub struct NamedQueue {
    name: String,
    backend: Arc<dyn QueueBackend>,
}

impl NamedQueue {
    /// Bind to `name`, creating the queue if needed.
    pub async fn initialize(backend: Arc<dyn QueueBackend>, name: &str) -> QueueResult<Self> {
        backend.declare(name).await?;
        debug!(queue = %name, "queue initialized");
        Ok(Self {
            name: name.to_string(),
            backend,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn add<T: Serialize + Sync>(&self, job_name: &str, data: &T) -> QueueResult<String> {
        let job = RawJob {
            id: Uuid::new_v4().to_string(),
            name: job_name.to_string(),
            data: serde_json::to_value(data)?,
            enqueued_at: Utc::now(),
            attempts: 0,
        };
        self.backend.push(&self.name, &job).await?;
        debug!(queue = %self.name, job_id = %job.id, job_name = %job_name, "job pushed");
        Ok(job.id)
    }

    pub async fn reserve(&self, wait: Duration) -> QueueResult<Option<RawJob>> {
        self.backend.reserve(&self.name, wait).await
    }

    pub async fn complete(&self, job_id: &str) -> QueueResult<()> {
        self.backend.complete(&self.name, job_id).await
    }

    pub async fn fail(&self, job_id: &str, reason: &str) -> QueueResult<()> {
        self.backend.fail(&self.name, job_id, reason).await
    }

    pub async fn requeue_active(&self) -> QueueResult<usize> {
        self.backend.requeue_active(&self.name).await
    }

    pub async fn close(&self) -> QueueResult<()> {
        self.backend.close().await
    }
}

/// Result of a successful enqueue: the pushed job and the ledger row it
/// references.
#[derive(Debug, Clone)]
pub struct Enqueued<R> {
    pub job_id: String,
    pub record: R,
}

/// A flow-specific producer: ledger write, then job push.
#[async_trait]
pub trait QueueWrapper: Send + Sync {
    type Payload: Send + 'static;
    type Record: Send + 'static;

    fn queue(&self) -> &NamedQueue;

    /// Startup hook, run once before consumers start.
    async fn on_start(&self) -> QueueResult<()> {
        Ok(())
    }

    /// Write the ledger row, then push a job referencing it. A failed ledger
    /// write returns an error and pushes nothing.
    async fn enqueue(
        &self,
        job_name: &str,
        payload: Self::Payload,
    ) -> QueueResult<Enqueued<Self::Record>>;

    async fn close(&self) -> QueueResult<()> {
        self.queue().close().await
    }
}

/// Re-queue jobs a crashed process left reserved. Every consumer tolerates
/// redelivery, so wrappers call this from `on_start`.
///
/// The active list is shared by every process consuming the queue, so this
/// also re-delivers jobs a live peer is still running. With more than one
/// consumer process per queue, disable it (`QUEUE_RECOVER_ON_START=false`)
/// and recover stalled jobs from a single process.
pub(crate) async fn recover_reserved(queue: &NamedQueue) -> QueueResult<()> {
    let recovered = queue.requeue_active().await?;
    if recovered > 0 {
        tracing::warn!(
            queue = %queue.name(),
            recovered,
            "re-queued jobs left active by a previous run"
        );
    }
    Ok(())
}

/// Run the wrapper's start hook when recovery is enabled.
pub async fn start_queue<W>(wrapper: &W, config: &QueueConfig) -> QueueResult<()>
where
    W: QueueWrapper + ?Sized,
{
    if !config.recover_on_start {
        tracing::info!(queue = %wrapper.queue().name(), "startup recovery disabled");
        return Ok(());
    }
    wrapper.on_start().await
}
