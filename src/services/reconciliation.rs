//! Applies gateway payout status to the ledger. Used by the webhook and by
//! the periodic payout reconciler so both follow the same rules:
//!
//! - a row in a final status is never changed
//! - `queued` arriving while the row is `processing` is stale and ignored
//! - verification payouts drive the linked account through the status machine

use crate::database::error::DatabaseError;
use crate::database::repository::{AccountLedger, TransactionLedger};
use crate::payments::account_status::AccountEvent;
use crate::payments::gateway::PayoutEntity;
use crate::payments::types::{AccountStatus, StatusUpdate, TransactionRecord, TransactionStatus};
use crate::services::accounts::advance_account;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("no transaction with payout id {0}")]
    UnknownPayout(String),

    #[error("payout {payout_id} reported unknown status '{status}'")]
    UnknownStatus { payout_id: String, status: String },

    #[error("ledger error: {0}")]
    Ledger(#[from] DatabaseError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Updated {
        transaction_id: String,
        status: TransactionStatus,
        account_status: Option<AccountStatus>,
    },
    IgnoredFinal {
        transaction_id: String,
        status: TransactionStatus,
    },
    IgnoredStale {
        transaction_id: String,
    },
}

pub struct LedgerReconciler {
    accounts: Arc<dyn AccountLedger>,
    transactions: Arc<dyn TransactionLedger>,
}

impl LedgerReconciler {
    pub fn new(accounts: Arc<dyn AccountLedger>, transactions: Arc<dyn TransactionLedger>) -> Self {
        Self {
            accounts,
            transactions,
        }
    }

    /// Reconcile the row that owns `payout.id`. Rows are never created here.
    pub async fn apply(&self, payout: &PayoutEntity) -> Result<ReconcileOutcome, ReconcileError> {
        let stored = self
            .transactions
            .find_by_payout_id(&payout.id)
            .await?
            .ok_or_else(|| ReconcileError::UnknownPayout(payout.id.clone()))?;
        self.apply_to(stored, payout).await
    }

    /// Reconcile a row already loaded by the caller.
    pub async fn apply_to(
        &self,
        mut stored: TransactionRecord,
        payout: &PayoutEntity,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let incoming = payout
            .transaction_status()
            .ok_or_else(|| ReconcileError::UnknownStatus {
                payout_id: payout.id.clone(),
                status: payout.status.clone(),
            })?;

        match stored.status.update_decision(incoming) {
            StatusUpdate::IgnoreFinal => {
                info!(
                    transaction_id = %stored.id,
                    status = %stored.status,
                    incoming = %incoming,
                    "transaction already final, update ignored"
                );
                return Ok(ReconcileOutcome::IgnoredFinal {
                    transaction_id: stored.id,
                    status: stored.status,
                });
            }
            StatusUpdate::IgnoreStale => {
                info!(
                    transaction_id = %stored.id,
                    incoming = %incoming,
                    "stale queued update for processing transaction ignored"
                );
                return Ok(ReconcileOutcome::IgnoredStale {
                    transaction_id: stored.id,
                });
            }
            StatusUpdate::Apply => {}
        }

        stored.status = incoming;
        if payout.utr.is_some() {
            stored.utr = payout.utr.clone();
        }
        stored.meta.absorb_status_update(payout);

        let Some(updated) = self.transactions.update_unless_final(&stored).await? else {
            // Another writer finalized the row between the read and the write.
            warn!(transaction_id = %stored.id, "transaction finalized concurrently");
            return Ok(ReconcileOutcome::IgnoredFinal {
                transaction_id: stored.id,
                status: incoming,
            });
        };

        let mut account_status = None;
        if updated.purpose.is_verification() {
            account_status = advance_account(
                self.accounts.as_ref(),
                &updated.account_id,
                &[AccountEvent::PayoutStatus(incoming)],
            )
            .await?
            .map(|account| account.status);
        }

        info!(
            transaction_id = %updated.id,
            payout_id = %payout.id,
            status = %updated.status,
            "transaction reconciled"
        );
        Ok(ReconcileOutcome::Updated {
            transaction_id: updated.id,
            status: updated.status,
            account_status,
        })
    }
}
