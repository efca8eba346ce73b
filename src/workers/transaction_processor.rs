//! Payout processor for the transaction queue.
//!
//! For each job: check the worker's balance, create the payout at the
//! gateway with the row's idempotency key, then write the gateway's answer
//! back to the ledger. Failures before or at the gateway release the row as
//! `failed_before_transaction`. A ledger failure after the payout exists is
//! escalated and marks the row `failed_after_transaction`.

use crate::database::error::DatabaseError;
use crate::database::repository::{AccountLedger, TransactionLedger};
use crate::payments::account_status::AccountEvent;
use crate::payments::error::GatewayError;
use crate::payments::gateway::{PayoutEntity, PayoutGateway, PayoutRequest};
use crate::payments::types::{AccountStatus, TransactionRecord, TransactionStatus};
use crate::payments::utils::to_minor_units;
use crate::queue::transaction::TransactionJob;
use crate::queue::Job;
use crate::services::accounts::{advance_account, fail_account};
use crate::services::balance::BalanceService;
use crate::workers::consumer::JobProcessor;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

const FAILURE_SERVER: &str = "server";
const FAILURE_SOURCE: &str = "Transaction Queue Processor";

#[derive(Debug, Error)]
pub enum TransactionProcessorError {
    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: Decimal, required: Decimal },

    #[error("Transaction {0} not found")]
    TransactionNotFound(String),

    #[error("Invalid payout amount {0}")]
    InvalidAmount(Decimal),

    #[error("{}", .0.failure_reason())]
    Gateway(#[from] GatewayError),

    #[error("Ledger error before payout: {0}")]
    Ledger(#[from] DatabaseError),

    /// The payout exists at the gateway but the ledger does not reflect it.
    #[error("Ledger write failed after payout {payout_id} was created: {source}")]
    PostPayoutLedger {
        payout_id: String,
        #[source]
        source: DatabaseError,
    },
}

impl TransactionProcessorError {
    /// Whether money may have moved before the failure.
    pub fn payout_created(&self) -> bool {
        matches!(self, TransactionProcessorError::PostPayoutLedger { .. })
    }

    fn failure_status(&self) -> TransactionStatus {
        if self.payout_created() {
            TransactionStatus::FailedAfterTransaction
        } else {
            TransactionStatus::FailedBeforeTransaction
        }
    }
}

pub struct TransactionProcessor {
    accounts: Arc<dyn AccountLedger>,
    transactions: Arc<dyn TransactionLedger>,
    gateway: Arc<dyn PayoutGateway>,
    balance: Arc<BalanceService>,
}

impl TransactionProcessor {
    pub fn new(
        accounts: Arc<dyn AccountLedger>,
        transactions: Arc<dyn TransactionLedger>,
        gateway: Arc<dyn PayoutGateway>,
        balance: Arc<BalanceService>,
    ) -> Self {
        Self {
            accounts,
            transactions,
            gateway,
            balance,
        }
    }

    async fn execute(&self, job: &TransactionJob) -> Result<(), TransactionProcessorError> {
        let queued = &job.transaction_record;
        let stored = self
            .transactions
            .find_transaction(&queued.id)
            .await?
            .ok_or_else(|| TransactionProcessorError::TransactionNotFound(queued.id.clone()))?;
        if stored.status.is_final() {
            info!(transaction_id = %stored.id, status = %stored.status, "transaction already final");
            return Ok(());
        }

        if !stored.purpose.is_verification() {
            let check = self.balance.check(&stored).await?;
            if !check.is_sufficient() {
                return Err(TransactionProcessorError::InsufficientBalance {
                    available: check.available,
                    required: check.required,
                });
            }
        }

        let request = PayoutRequest {
            account_number: stored.source_account.clone(),
            amount: to_minor_units(stored.amount)
                .filter(|amount| *amount > 0)
                .ok_or(TransactionProcessorError::InvalidAmount(stored.amount))?,
            currency: stored.currency.clone(),
            fund_account_id: job.fund_id.clone(),
            mode: stored.mode.clone(),
            purpose: stored.purpose.as_str().to_string(),
            reference_id: Some(stored.id.clone()),
        };
        let payout = self
            .gateway
            .create_payout(&request, stored.idempotency_key())
            .await?;

        self.record_payout(&stored.id, &payout)
            .await
            .map_err(|source| TransactionProcessorError::PostPayoutLedger {
                payout_id: payout.id.clone(),
                source,
            })
    }

    /// Write the gateway response onto the freshest copy of the row.
    async fn record_payout(
        &self,
        transaction_id: &str,
        payout: &PayoutEntity,
    ) -> Result<(), DatabaseError> {
        let mut record = self
            .transactions
            .find_transaction(transaction_id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("transaction", transaction_id))?;
        record.apply_payout(payout);

        let Some(updated) = self.transactions.update_unless_final(&record).await? else {
            warn!(
                transaction_id = %transaction_id,
                payout_id = %payout.id,
                "transaction finalized before payout response was recorded"
            );
            return Ok(());
        };
        info!(
            transaction_id = %updated.id,
            payout_id = %payout.id,
            status = %updated.status,
            "payout recorded"
        );

        if updated.purpose.is_verification() {
            let mut events = vec![AccountEvent::PayoutCreated];
            if let Some(status) = payout.transaction_status() {
                events.push(AccountEvent::PayoutStatus(status));
            }
            advance_account(self.accounts.as_ref(), &updated.account_id, &events).await?;
        }
        Ok(())
    }

    /// Mark the row failed and, for verification payouts, the account too.
    async fn clean_up(&self, queued: &TransactionRecord, err: &TransactionProcessorError) {
        if let TransactionProcessorError::PostPayoutLedger { payout_id, .. } = err {
            error!(
                escalation = "page",
                transaction_id = %queued.id,
                payout_id = %payout_id,
                error = %err,
                "payout created but ledger not updated"
            );
        }

        let mut record = match self.transactions.find_transaction(&queued.id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => queued.clone(),
            Err(e) => {
                warn!(transaction_id = %queued.id, error = %e, "using queued copy for cleanup");
                queued.clone()
            }
        };
        record.status = err.failure_status();
        record
            .meta
            .record_failure(FAILURE_SERVER, FAILURE_SOURCE, err.to_string());
        match self.transactions.update_unless_final(&record).await {
            Ok(Some(_)) => {}
            Ok(None) => info!(transaction_id = %record.id, "transaction already final, failure not recorded"),
            Err(e) => error!(
                escalation = "page",
                transaction_id = %record.id,
                error = %e,
                "could not record transaction failure"
            ),
        }

        if record.purpose.is_verification() {
            if let Err(e) = fail_account(
                self.accounts.as_ref(),
                &record.account_id,
                AccountStatus::Failed,
                FAILURE_SERVER,
                FAILURE_SOURCE,
                &err.to_string(),
            )
            .await
            {
                error!(account_id = %record.account_id, error = %e, "could not record account failure");
            }
        }
    }
}

#[async_trait]
impl JobProcessor for TransactionProcessor {
    type Data = TransactionJob;
    type Error = TransactionProcessorError;

    fn name(&self) -> &'static str {
        "transaction"
    }

    async fn process(&self, job: &Job<TransactionJob>) -> Result<(), TransactionProcessorError> {
        let record = &job.data.transaction_record;
        // Cleanup runs under the same lock so a released reservation is
        // visible to the worker's next payout.
        let _guard = self.balance.lock_worker(&record.worker_id).await;
        match self.execute(&job.data).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.clean_up(record, &err).await;
                Err(err)
            }
        }
    }
}
