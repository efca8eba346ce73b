//! Backend-side account registration queue. Accounts forwarded by a box are
//! stored as `SERVER_API` and queued for gateway onboarding.

use crate::database::repository::AccountLedger;
use crate::payments::types::{AccountRecord, AccountStatus};
use crate::queue::registration::RegistrationJob;
use crate::queue::{recover_reserved, Enqueued, NamedQueue, QueueResult, QueueWrapper};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub struct ServerRegistrationQueue {
    queue: NamedQueue,
    accounts: Arc<dyn AccountLedger>,
}

impl ServerRegistrationQueue {
    pub fn new(queue: NamedQueue, accounts: Arc<dyn AccountLedger>) -> Self {
        Self { queue, accounts }
    }
}

#[async_trait]
impl QueueWrapper for ServerRegistrationQueue {
    type Payload = AccountRecord;
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
        mut payload: AccountRecord,
    ) -> QueueResult<Enqueued<AccountRecord>> {
        payload.status = AccountStatus::ServerApi;
        let record = self.accounts.upsert_account(&payload).await?;

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
            box_id = %record.box_id,
            job_id = %job_id,
            "server account registration queued"
        );
        Ok(Enqueued { job_id, record })
    }
}
