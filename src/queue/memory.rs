//! In-process queue backend used when external services are skipped and by
//! tests. Jobs do not survive a restart.

use crate::queue::{QueueBackend, QueueError, QueueResult, RawJob};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Default)]
struct QueueState {
    wait: VecDeque<RawJob>,
    active: Vec<RawJob>,
    failed: Vec<(RawJob, String)>,
    completed: Vec<String>,
    notify: Arc<Notify>,
}

#[derive(Default)]
pub struct MemoryQueueBackend {
    queues: Mutex<HashMap<String, QueueState>>,
    closed: AtomicBool,
}

impl MemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<String, QueueState>> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_open(&self, queue: &str) -> QueueResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed(queue.to_string()));
        }
        Ok(())
    }

    /// Jobs waiting to be reserved, oldest first.
    pub fn waiting(&self, queue: &str) -> Vec<RawJob> {
        self.queues()
            .get(queue)
            .map(|q| q.wait.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn active(&self, queue: &str) -> Vec<RawJob> {
        self.queues()
            .get(queue)
            .map(|q| q.active.clone())
            .unwrap_or_default()
    }

    pub fn failed(&self, queue: &str) -> Vec<(RawJob, String)> {
        self.queues()
            .get(queue)
            .map(|q| q.failed.clone())
            .unwrap_or_default()
    }

    pub fn completed(&self, queue: &str) -> Vec<String> {
        self.queues()
            .get(queue)
            .map(|q| q.completed.clone())
            .unwrap_or_default()
    }

    fn try_take(&self, queue: &str) -> Option<RawJob> {
        let mut queues = self.queues();
        let state = queues.get_mut(queue)?;
        let mut job = state.wait.pop_front()?;
        job.attempts += 1;
        state.active.push(job.clone());
        Some(job)
    }

    fn notifier(&self, queue: &str) -> Arc<Notify> {
        self.queues()
            .entry(queue.to_string())
            .or_default()
            .notify
            .clone()
    }

    fn take_active(&self, queue: &str, job_id: &str) -> Option<RawJob> {
        let mut queues = self.queues();
        let state = queues.get_mut(queue)?;
        let position = state.active.iter().position(|j| j.id == job_id)?;
        Some(state.active.remove(position))
    }
}

#[async_trait]
impl QueueBackend for MemoryQueueBackend {
    async fn declare(&self, queue: &str) -> QueueResult<()> {
        self.ensure_open(queue)?;
        self.queues().entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn push(&self, queue: &str, job: &RawJob) -> QueueResult<()> {
        self.ensure_open(queue)?;
        let notify = {
            let mut queues = self.queues();
            let state = queues.entry(queue.to_string()).or_default();
            state.wait.push_back(job.clone());
            state.notify.clone()
        };
        notify.notify_one();
        Ok(())
    }

    async fn reserve(&self, queue: &str, wait: Duration) -> QueueResult<Option<RawJob>> {
        self.ensure_open(queue)?;
        let notify = self.notifier(queue);
        let deadline = Instant::now() + wait;
        loop {
            let notified = notify.notified();
            if let Some(job) = self.try_take(queue) {
                return Ok(Some(job));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(self.try_take(queue));
            }
        }
    }

    async fn complete(&self, queue: &str, job_id: &str) -> QueueResult<()> {
        if self.take_active(queue, job_id).is_some() {
            if let Some(state) = self.queues().get_mut(queue) {
                state.completed.push(job_id.to_string());
            }
        }
        Ok(())
    }

    async fn fail(&self, queue: &str, job_id: &str, reason: &str) -> QueueResult<()> {
        if let Some(job) = self.take_active(queue, job_id) {
            if let Some(state) = self.queues().get_mut(queue) {
                state.failed.push((job, reason.to_string()));
            }
        }
        Ok(())
    }

    async fn requeue_active(&self, queue: &str) -> QueueResult<usize> {
        let (count, notify) = {
            let mut queues = self.queues();
            let Some(state) = queues.get_mut(queue) else {
                return Ok(0);
            };
            let stalled: Vec<RawJob> = state.active.drain(..).collect();
            let count = stalled.len();
            for job in stalled.into_iter().rev() {
                state.wait.push_front(job);
            }
            (count, state.notify.clone())
        };
        if count > 0 {
            notify.notify_one();
        }
        Ok(count)
    }

    async fn close(&self) -> QueueResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
