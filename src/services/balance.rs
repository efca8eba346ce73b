//! Worker balance guard for payouts.
//!
//! Available balance is earned credits minus every amount still reserved by
//! the worker's transactions. The transaction being checked is already in
//! the ledger, so its own amount is added back.

use crate::config::BalanceLockMode;
use crate::database::repository::{EarningsLedger, LedgerResult, TransactionLedger};
use crate::payments::types::TransactionRecord;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceCheck {
    pub earned: Decimal,
    pub reserved: Decimal,
    pub available: Decimal,
    pub required: Decimal,
}

impl BalanceCheck {
    pub fn is_sufficient(&self) -> bool {
        self.available >= self.required
    }
}

/// A held per-worker balance lock. The worker's map entry goes away with
/// the last holder or waiter.
pub struct WorkerLock<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a WorkerLocks,
    worker_id: String,
}

impl Drop for WorkerLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks
            .get(&self.worker_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.worker_id);
        }
    }
}

type WorkerLocks = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

pub struct BalanceService {
    transactions: Arc<dyn TransactionLedger>,
    earnings: Arc<dyn EarningsLedger>,
    lock_mode: BalanceLockMode,
    locks: WorkerLocks,
}

impl BalanceService {
    pub fn new(
        transactions: Arc<dyn TransactionLedger>,
        earnings: Arc<dyn EarningsLedger>,
        lock_mode: BalanceLockMode,
    ) -> Self {
        Self {
            transactions,
            earnings,
            lock_mode,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Serialize balance-sensitive work for one worker. Returns `None` when
    /// locking is disabled. The guard must be held until the outcome of the
    /// payout is written to the ledger.
    pub async fn lock_worker(&self, worker_id: &str) -> Option<WorkerLock<'_>> {
        if self.lock_mode == BalanceLockMode::None {
            return None;
        }
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(worker_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        Some(WorkerLock {
            guard: Some(lock.lock_owned().await),
            locks: &self.locks,
            worker_id: worker_id.to_string(),
        })
    }

    #[cfg(test)]
    fn tracked_workers(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub async fn check(&self, record: &TransactionRecord) -> LedgerResult<BalanceCheck> {
        let earned = self.earnings.earned_credits(&record.worker_id).await?;
        let reserved = self.transactions.reserved_amount(&record.worker_id).await?;
        let own = if record.status.counts_against_balance() {
            record.amount
        } else {
            Decimal::ZERO
        };
        let check = BalanceCheck {
            earned,
            reserved,
            available: earned - reserved + own,
            required: record.amount,
        };
        debug!(
            worker_id = %record.worker_id,
            earned = %check.earned,
            reserved = %check.reserved,
            available = %check.available,
            required = %check.required,
            "balance checked"
        );
        Ok(check)
    }
}
