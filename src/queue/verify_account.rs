//! Box-side account verification queue.
//!
//! The worker's confirmation is made durable (`CONFIRMATION_RECEIVED`)
//! before the job that forwards it to the backend is pushed.

use crate::database::error::DatabaseError;
use crate::database::repository::AccountLedger;
use crate::payments::types::{AccountRecord, AccountStatus};
use crate::queue::{
    recover_reserved, Enqueued, NamedQueue, QueueError, QueueResult, QueueWrapper,
};
use crate::services::accounts::transition_account;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyAccountJob {
    pub account_id: String,
    pub worker_id: String,
    pub confirm: bool,
}

pub struct VerifyAccountQueue {
    queue: NamedQueue,
    accounts: Arc<dyn AccountLedger>,
}

impl VerifyAccountQueue {
    pub fn new(queue: NamedQueue, accounts: Arc<dyn AccountLedger>) -> Self {
        Self { queue, accounts }
    }
}

#[async_trait]
impl QueueWrapper for VerifyAccountQueue {
    type Payload = VerifyAccountJob;
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
        payload: VerifyAccountJob,
    ) -> QueueResult<Enqueued<AccountRecord>> {
        // A repeated confirmation finds the row already at CONFIRMATION_RECEIVED.
        let record = transition_account(self.accounts.as_ref(), &payload.account_id, |current| {
            (current.status == AccountStatus::Verification)
                .then_some((AccountStatus::ConfirmationReceived, None))
        })
        .await?
        .into_record();
        if record.status != AccountStatus::ConfirmationReceived {
            return Err(QueueError::Ledger(DatabaseError::conflict(
                "account",
                &payload.account_id,
            )));
        }
        let job_id = self.queue.add(job_name, &payload).await?;

        info!(
            account_id = %record.id,
            confirm = payload.confirm,
            job_id = %job_id,
            "account verification queued"
        );
        Ok(Enqueued { job_id, record })
    }
}
