//! Payout transaction queue.
//!
//! `enqueue` inserts the `CREATED` ledger row carrying the idempotency key,
//! then pushes the full row together with the fund account to pay into.

use crate::database::repository::TransactionLedger;
use crate::payments::types::{
    TransactionMeta, TransactionPurpose, TransactionRecord, TransactionStatus,
};
use crate::queue::{recover_reserved, Enqueued, NamedQueue, QueueResult, QueueWrapper};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionPayload {
    pub amount: Decimal,
    pub account_id: String,
    pub fund_id: String,
    pub worker_id: String,
    pub currency: String,
    pub mode: String,
    pub purpose: TransactionPurpose,
    pub idempotency_key: String,
    pub source_account: String,
    pub bulk_id: Option<String>,
}

impl TransactionPayload {
    fn into_record(self) -> (TransactionRecord, String) {
        let now = Utc::now();
        let record = TransactionRecord {
            id: Uuid::new_v4().to_string(),
            amount: self.amount,
            currency: self.currency,
            account_id: self.account_id,
            worker_id: self.worker_id,
            bulk_id: self.bulk_id,
            source_account: self.source_account,
            purpose: self.purpose,
            mode: self.mode,
            status: TransactionStatus::Created,
            payout_id: None,
            utr: None,
            meta: TransactionMeta::new(self.idempotency_key),
            created_at: now,
            last_updated_at: now,
        };
        (record, self.fund_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionJob {
    pub transaction_record: TransactionRecord,
    pub fund_id: String,
}

pub struct TransactionQueue {
    queue: NamedQueue,
    transactions: Arc<dyn TransactionLedger>,
}

impl TransactionQueue {
    pub fn new(queue: NamedQueue, transactions: Arc<dyn TransactionLedger>) -> Self {
        Self {
            queue,
            transactions,
        }
    }
}

#[async_trait]
impl QueueWrapper for TransactionQueue {
    type Payload = TransactionPayload;
    type Record = TransactionRecord;

    fn queue(&self) -> &NamedQueue {
        &self.queue
    }

    async fn on_start(&self) -> QueueResult<()> {
        recover_reserved(&self.queue).await
    }

    async fn enqueue(
        &self,
        job_name: &str,
        payload: TransactionPayload,
    ) -> QueueResult<Enqueued<TransactionRecord>> {
        let (record, fund_id) = payload.into_record();
        let record = self.transactions.insert_transaction(&record).await?;

        let job_id = self
            .queue
            .add(
                job_name,
                &TransactionJob {
                    transaction_record: record.clone(),
                    fund_id,
                },
            )
            .await?;

        info!(
            transaction_id = %record.id,
            worker_id = %record.worker_id,
            purpose = %record.purpose.as_str(),
            amount = %record.amount,
            job_id = %job_id,
            "transaction queued"
        );
        Ok(Enqueued { job_id, record })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryLedger;
    use crate::queue::memory::MemoryQueueBackend;
    use crate::queue::names;

    fn payload(key: &str) -> TransactionPayload {
        TransactionPayload {
            amount: Decimal::from(20),
            account_id: "acc-1".to_string(),
            fund_id: "fa_1".to_string(),
            worker_id: "w1".to_string(),
            currency: "INR".to_string(),
            mode: "IMPS".to_string(),
            purpose: TransactionPurpose::Payout,
            idempotency_key: key.to_string(),
            source_account: "2323230000".to_string(),
            bulk_id: None,
        }
    }

    async fn wrapper() -> (TransactionQueue, Arc<MemoryQueueBackend>, Arc<MemoryLedger>) {
        let backend = Arc::new(MemoryQueueBackend::new());
        let ledger = Arc::new(MemoryLedger::new());
        let queue = NamedQueue::initialize(backend.clone(), names::TRANSACTION)
            .await
            .unwrap();
        (TransactionQueue::new(queue, ledger.clone()), backend, ledger)
    }

    #[tokio::test]
    async fn job_carries_the_created_row_and_fund_account() {
        let (wrapper, backend, _) = wrapper().await;
        let enqueued = wrapper.enqueue("payout:w1", payload("k1")).await.unwrap();

        assert_eq!(enqueued.record.status, TransactionStatus::Created);
        assert_eq!(enqueued.record.idempotency_key(), "k1");

        let waiting = backend.waiting(names::TRANSACTION);
        let job = waiting[0].decode::<TransactionJob>().unwrap();
        assert_eq!(job.data.transaction_record, enqueued.record);
        assert_eq!(job.data.fund_id, "fa_1");
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_reported_and_not_pushed() {
        let (wrapper, backend, ledger) = wrapper().await;
        wrapper.enqueue("payout:w1", payload("k1")).await.unwrap();

        let err = wrapper.enqueue("payout:w1", payload("k1")).await.unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(backend.waiting(names::TRANSACTION).len(), 1);
        assert_eq!(ledger.transaction_count(), 1);
    }
}
