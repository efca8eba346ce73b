//! Expands a bulk payout into one transaction per worker.
//!
//! Workers without an active verified account are recorded in the batch's
//! `failed_for_worker_ids`; the rest are queued as `BULK_PAYMENT`
//! transactions. A failed batch job never rolls back transactions it already
//! queued.

use crate::config::PayoutConfig;
use crate::database::error::DatabaseError;
use crate::database::repository::{AccountLedger, BulkTransactionLedger};
use crate::payments::types::{
    AccountRecord, AccountStatus, BulkTransactionMeta, BulkTransactionStatus, TransactionPurpose,
    TransactionRequest,
};
use crate::queue::bulk_transaction::BulkTransactionJob;
use crate::queue::transaction::{TransactionPayload, TransactionQueue};
use crate::queue::{Job, QueueWrapper};
use crate::services::accounts::payout_mode_for;
use crate::workers::consumer::JobProcessor;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

const FAILURE_SOURCE: &str = "Bulk Transaction Queue";

#[derive(Debug, Error)]
pub enum BulkTransactionError {
    #[error("ledger error: {0}")]
    Ledger(#[from] DatabaseError),
}

pub struct BulkTransactionProcessor {
    accounts: Arc<dyn AccountLedger>,
    bulk_transactions: Arc<dyn BulkTransactionLedger>,
    transactions: Arc<TransactionQueue>,
    payouts: PayoutConfig,
}

impl BulkTransactionProcessor {
    pub fn new(
        accounts: Arc<dyn AccountLedger>,
        bulk_transactions: Arc<dyn BulkTransactionLedger>,
        transactions: Arc<TransactionQueue>,
        payouts: PayoutConfig,
    ) -> Self {
        Self {
            accounts,
            bulk_transactions,
            transactions,
            payouts,
        }
    }

    async fn payable_account(&self, worker_id: &str) -> Result<AccountRecord, String> {
        let account = self
            .accounts
            .find_active_account(worker_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "worker has no active account".to_string())?;
        if account.status != AccountStatus::Verified {
            return Err(format!("active account is {}, not VERIFIED", account.status));
        }
        if account.fund_id.is_none() {
            return Err("active account has no fund account".to_string());
        }
        Ok(account)
    }

    async fn queue_one(&self, bulk_id: &str, request: &TransactionRequest) -> Result<(), String> {
        let account = self.payable_account(&request.worker_id).await?;
        let fund_id = account.fund_id.clone().unwrap_or_default();
        let payload = TransactionPayload {
            amount: request.amount,
            account_id: account.id.clone(),
            fund_id,
            worker_id: request.worker_id.clone(),
            currency: self.payouts.currency.clone(),
            mode: payout_mode_for(account.account_type, &self.payouts.mode),
            purpose: TransactionPurpose::BulkPayment,
            idempotency_key: format!("{}{}", account.hash, bulk_id),
            source_account: self.payouts.source_account.clone(),
            bulk_id: Some(bulk_id.to_string()),
        };
        let job_name = format!("BULK_TRANSACTION:{} | {}", request.worker_id, request.amount);
        match self.transactions.enqueue(&job_name, payload).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_duplicate() => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[async_trait]
impl JobProcessor for BulkTransactionProcessor {
    type Data = BulkTransactionJob;
    type Error = BulkTransactionError;

    fn name(&self) -> &'static str {
        "bulk-transaction"
    }

    async fn process(&self, job: &Job<BulkTransactionJob>) -> Result<(), BulkTransactionError> {
        let bulk_id = &job.data.bulk_transaction_record.id;
        self.bulk_transactions
            .update_bulk_status(bulk_id, BulkTransactionStatus::ServerBulkTransactionQueue, None)
            .await?;

        let mut failed_for_worker_ids = Vec::new();
        for request in &job.data.requests {
            if let Err(reason) = self.queue_one(bulk_id, request).await {
                warn!(
                    bulk_id = %bulk_id,
                    worker_id = %request.worker_id,
                    reason = %reason,
                    "bulk payout skipped for worker"
                );
                failed_for_worker_ids.push(request.worker_id.clone());
            }
        }

        if failed_for_worker_ids.is_empty() {
            self.bulk_transactions
                .update_bulk_status(bulk_id, BulkTransactionStatus::TransactionsProcessed, None)
                .await?;
        } else {
            let meta = BulkTransactionMeta {
                failed_for_worker_ids,
                ..Default::default()
            };
            self.bulk_transactions
                .update_bulk_status(bulk_id, BulkTransactionStatus::PartialProcessed, Some(&meta))
                .await?;
        }

        info!(bulk_id = %bulk_id, n_workers = job.data.requests.len(), "bulk transaction expanded");
        Ok(())
    }

    async fn on_failed(&self, job: &Job<BulkTransactionJob>, err: &BulkTransactionError) {
        let bulk_id = &job.data.bulk_transaction_record.id;
        let meta = BulkTransactionMeta {
            failure_source: Some(FAILURE_SOURCE.to_string()),
            failure_reason: Some(err.to_string()),
            ..Default::default()
        };
        if let Err(e) = self
            .bulk_transactions
            .update_bulk_status(bulk_id, BulkTransactionStatus::Failed, Some(&meta))
            .await
        {
            error!(bulk_id = %bulk_id, error = %e, "could not record bulk failure");
        }
    }
}
