//! Bulk payout queue: one ledger row per batch, expanded into per-worker
//! transactions by the consumer.

use crate::database::repository::BulkTransactionLedger;
use crate::payments::types::{
    bulk_total, BulkPaymentsTransactionRecord, BulkTransactionMeta, BulkTransactionStatus,
    TransactionRequest,
};
use crate::queue::{
    recover_reserved, Enqueued, NamedQueue, QueueError, QueueResult, QueueWrapper,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BulkTransactionPayload {
    pub user_id: String,
    pub requests: Vec<TransactionRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkTransactionJob {
    pub bulk_transaction_record: BulkPaymentsTransactionRecord,
    pub requests: Vec<TransactionRequest>,
}

pub struct BulkTransactionQueue {
    queue: NamedQueue,
    bulk_transactions: Arc<dyn BulkTransactionLedger>,
}

impl BulkTransactionQueue {
    pub fn new(queue: NamedQueue, bulk_transactions: Arc<dyn BulkTransactionLedger>) -> Self {
        Self {
            queue,
            bulk_transactions,
        }
    }
}

#[async_trait]
impl QueueWrapper for BulkTransactionQueue {
    type Payload = BulkTransactionPayload;
    type Record = BulkPaymentsTransactionRecord;

    fn queue(&self) -> &NamedQueue {
        &self.queue
    }

    async fn on_start(&self) -> QueueResult<()> {
        recover_reserved(&self.queue).await
    }

    async fn enqueue(
        &self,
        job_name: &str,
        payload: BulkTransactionPayload,
    ) -> QueueResult<Enqueued<BulkPaymentsTransactionRecord>> {
        let amount = bulk_total(&payload.requests)
            .ok_or_else(|| QueueError::InvalidPayload("bulk total overflows".to_string()))?;
        let n_workers = i32::try_from(payload.requests.len())
            .map_err(|_| QueueError::InvalidPayload("too many workers in one batch".to_string()))?;
        let now = Utc::now();
        let record = BulkPaymentsTransactionRecord {
            id: Uuid::new_v4().to_string(),
            user_id: payload.user_id,
            amount,
            n_workers,
            status: BulkTransactionStatus::Initialised,
            meta: BulkTransactionMeta::default(),
            created_at: now,
            last_updated_at: now,
        };
        let record = self.bulk_transactions.insert_bulk_transaction(&record).await?;

        let job_id = self
            .queue
            .add(
                job_name,
                &BulkTransactionJob {
                    bulk_transaction_record: record.clone(),
                    requests: payload.requests,
                },
            )
            .await?;

        info!(
            bulk_id = %record.id,
            n_workers = record.n_workers,
            amount = %record.amount,
            job_id = %job_id,
            "bulk transaction queued"
        );
        Ok(Enqueued { job_id, record })
    }
}
