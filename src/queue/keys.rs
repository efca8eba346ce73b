//! Redis key layout for named queues.
//!
//! Each queue `name` under prefix `p` owns:
//! - `p:name:wait` list of job ids waiting for a consumer
//! - `p:name:active` list of job ids reserved by a consumer
//! - `p:name:failed` list of job ids whose processing failed
//! - `p:name:failed_reasons` hash of job id to failure reason
//! - `p:name:job:<id>` the serialized job

#[derive(Debug, Clone)]
pub struct QueueKeys {
    base: String,
}

impl QueueKeys {
    pub fn new(prefix: &str, queue: &str) -> Self {
        Self {
            base: format!("{}:{}", prefix, queue),
        }
    }

    pub fn wait(&self) -> String {
        format!("{}:wait", self.base)
    }

    pub fn active(&self) -> String {
        format!("{}:active", self.base)
    }

    pub fn failed(&self) -> String {
        format!("{}:failed", self.base)
    }

    pub fn failed_reasons(&self) -> String {
        format!("{}:failed_reasons", self.base)
    }

    pub fn job(&self, job_id: &str) -> String {
        format!("{}:job:{}", self.base, job_id)
    }
}

/// Set of every queue name declared under a prefix.
pub fn registry_key(prefix: &str) -> String {
    format!("{}:queues", prefix)
}
