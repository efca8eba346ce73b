//! Bounded worker pool that drains one named queue.
//!
//! Each reserved job runs as its own task; a semaphore caps how many run at
//! once. A job is completed when its processor returns `Ok`, otherwise the
//! processor's `on_failed` hook runs and the job is recorded as failed. Failed
//! jobs are never retried.

use crate::config::QueueConfig;
use crate::queue::{Job, NamedQueue, QueueError, QueueResult, RawJob};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    type Data: DeserializeOwned + Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    async fn process(&self, job: &Job<Self::Data>) -> Result<(), Self::Error>;

    /// Runs once after `process` fails, before the job is marked failed.
    async fn on_failed(&self, _job: &Job<Self::Data>, _error: &Self::Error) {}
}

pub struct QueueConsumer<P: JobProcessor> {
    queue: NamedQueue,
    processor: Arc<P>,
    concurrency: usize,
    poll_timeout: Duration,
}

impl<P: JobProcessor> QueueConsumer<P> {
    pub fn new(queue: NamedQueue, processor: Arc<P>, config: &QueueConfig) -> Self {
        Self {
            queue,
            processor,
            concurrency: config.concurrency.max(1),
            poll_timeout: Duration::from_secs(config.poll_timeout_secs.max(1)),
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            queue = %self.queue.name(),
            processor = self.processor.name(),
            concurrency = self.concurrency,
            "queue consumer started"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        loop {
            let permit = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if *shutdown_rx.borrow() {
                break;
            }

            match self.queue.reserve(self.poll_timeout).await {
                Ok(Some(raw)) => {
                    let queue = self.queue.clone();
                    let processor = self.processor.clone();
                    tokio::spawn(async move {
                        handle_job(&queue, processor.as_ref(), raw).await;
                        drop(permit);
                    });
                }
                Ok(None) => {}
                Err(QueueError::Closed(_)) => break,
                Err(e) => {
                    warn!(queue = %self.queue.name(), error = %e, "reserve failed, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        info!(queue = %self.queue.name(), "queue consumer stopping, waiting for in-flight jobs");
        let _ = semaphore.acquire_many(self.concurrency as u32).await;
        info!(queue = %self.queue.name(), "queue consumer stopped");
    }

    /// Process waiting jobs one at a time until the queue is empty. Returns
    /// the number of jobs handled.
    pub async fn run_until_idle(&self) -> QueueResult<usize> {
        let mut handled = 0;
        while let Some(raw) = self.queue.reserve(Duration::ZERO).await? {
            handle_job(&self.queue, self.processor.as_ref(), raw).await;
            handled += 1;
        }
        Ok(handled)
    }
}

async fn handle_job<P: JobProcessor>(queue: &NamedQueue, processor: &P, raw: RawJob) {
    let job = match raw.decode::<P::Data>() {
        Ok(job) => job,
        Err(e) => {
            error!(queue = %queue.name(), job_id = %raw.id, error = %e, "undecodable job");
            if let Err(e) = queue.fail(&raw.id, &e.to_string()).await {
                error!(queue = %queue.name(), job_id = %raw.id, error = %e, "could not record failed job");
            }
            return;
        }
    };

    match processor.process(&job).await {
        Ok(()) => {
            if let Err(e) = queue.complete(&job.id).await {
                warn!(queue = %queue.name(), job_id = %job.id, error = %e, "could not mark job completed");
            }
            info!(queue = %queue.name(), job_id = %job.id, job_name = %job.name, "job completed");
        }
        Err(err) => {
            error!(
                queue = %queue.name(),
                job_id = %job.id,
                job_name = %job.name,
                attempts = job.attempts,
                error = %err,
                "job failed"
            );
            processor.on_failed(&job, &err).await;
            if let Err(e) = queue.fail(&job.id, &err.to_string()).await {
                error!(queue = %queue.name(), job_id = %job.id, error = %e, "could not record failed job");
            }
        }
    }
}
