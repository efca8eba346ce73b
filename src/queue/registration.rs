//! Box-side account registration queue.

use crate::database::repository::AccountLedger;
use crate::payments::types::{AccountMeta, AccountRecord, AccountType};
use crate::queue::{recover_reserved, Enqueued, NamedQueue, QueueResult, QueueWrapper};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// A worker's request to register a payout account, already validated.
#[derive(Debug, Clone)]
pub struct RegistrationPayload {
    pub worker_id: String,
    pub account_type: AccountType,
    pub hash: String,
    pub meta: AccountMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationJob {
    pub account_id: String,
}

pub struct RegistrationQueue {
    queue: NamedQueue,
    accounts: Arc<dyn AccountLedger>,
    box_id: String,
}

impl RegistrationQueue {
    pub fn new(queue: NamedQueue, accounts: Arc<dyn AccountLedger>, box_id: impl Into<String>) -> Self {
        Self {
            queue,
            accounts,
            box_id: box_id.into(),
        }
    }
}

#[async_trait]
impl QueueWrapper for RegistrationQueue {
    type Payload = RegistrationPayload;
    type Record = AccountRecord;

    fn queue(&self) -> &NamedQueue {
        &self.queue
    }

    async fn on_start(&self) -> QueueResult<()> {
        recover_reserved(&self.queue).await
    }

    async fn enqueue(
        &self,
        job_name: &str,
        payload: RegistrationPayload,
    ) -> QueueResult<Enqueued<AccountRecord>> {
        let record = AccountRecord::initialised(
            &self.box_id,
            payload.worker_id,
            payload.account_type,
            payload.hash,
            payload.meta,
        );
        let record = self.accounts.insert_account(&record).await?;

        let job_id = self
            .queue
            .add(
                job_name,
                &RegistrationJob {
                    account_id: record.id.clone(),
                },
            )
            .await?;

        info!(
            account_id = %record.id,
            worker_id = %record.worker_id,
            job_id = %job_id,
            "account registration queued"
        );
        Ok(Enqueued { job_id, record })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryLedger;
    use crate::payments::types::{AccountDetails, AccountStatus};
    use crate::queue::memory::MemoryQueueBackend;
    use crate::queue::names;

    fn payload() -> RegistrationPayload {
        RegistrationPayload {
            worker_id: "w1".to_string(),
            account_type: AccountType::Vpa,
            hash: "h1".to_string(),
            meta: AccountMeta::new(
                "Asha",
                AccountDetails {
                    id: "asha@upi".to_string(),
                    ifsc: None,
                },
            ),
        }
    }

    #[tokio::test]
    async fn enqueue_writes_initialised_row_then_job() {
        let backend = Arc::new(MemoryQueueBackend::new());
        let ledger = Arc::new(MemoryLedger::new());
        let queue = NamedQueue::initialize(backend.clone(), names::BOX_ACCOUNT_REGISTRATION)
            .await
            .unwrap();
        let wrapper = RegistrationQueue::new(queue, ledger.clone(), "box-1");

        let enqueued = wrapper.enqueue("register:w1", payload()).await.unwrap();

        assert_eq!(enqueued.record.status, AccountStatus::Initialised);
        assert_eq!(enqueued.record.box_id, "box-1");
        let waiting = backend.waiting(names::BOX_ACCOUNT_REGISTRATION);
        assert_eq!(waiting.len(), 1);
        let job = waiting[0].decode::<RegistrationJob>().unwrap();
        assert_eq!(job.data.account_id, enqueued.record.id);
    }

    #[tokio::test]
    async fn failed_ledger_write_pushes_nothing() {
        let backend = Arc::new(MemoryQueueBackend::new());
        let ledger = Arc::new(MemoryLedger::new());
        ledger.set_fail_writes(true);
        let queue = NamedQueue::initialize(backend.clone(), names::BOX_ACCOUNT_REGISTRATION)
            .await
            .unwrap();
        let wrapper = RegistrationQueue::new(queue, ledger, "box-1");

        assert!(wrapper.enqueue("register:w1", payload()).await.is_err());
        assert!(backend.waiting(names::BOX_ACCOUNT_REGISTRATION).is_empty());
    }
}
