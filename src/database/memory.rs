//! In-process ledger used when external services are skipped and by tests.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{
    AccountLedger, BulkTransactionLedger, EarningsLedger, LedgerResult, ListFilter,
    TransactionLedger,
};
use crate::payments::types::{
    AccountMeta, AccountRecord, AccountStatus, BulkPaymentsTransactionRecord,
    BulkTransactionMeta, BulkTransactionStatus, EligibleWorker, TransactionRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct MemoryLedger {
    accounts: Mutex<HashMap<String, AccountRecord>>,
    transactions: Mutex<HashMap<String, TransactionRecord>>,
    bulk_transactions: Mutex<HashMap<String, BulkPaymentsTransactionRecord>>,
    earnings: Mutex<HashMap<String, Decimal>>,
    fail_writes: AtomicBool,
    operations: AtomicUsize,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit_earnings(&self, worker_id: &str, amount: Decimal) {
        *guard(&self.earnings)
            .entry(worker_id.to_string())
            .or_insert(Decimal::ZERO) += amount;
    }

    /// Make every subsequent write fail as if the database were unreachable.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of ledger reads and writes served so far.
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    pub fn transaction_count(&self) -> usize {
        guard(&self.transactions).len()
    }

    fn touch(&self) {
        self.operations.fetch_add(1, Ordering::SeqCst);
    }

    fn check_write(&self) -> LedgerResult<()> {
        self.touch();
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DatabaseError::new(DatabaseErrorKind::ConnectionError {
                message: "ledger unavailable".to_string(),
            }));
        }
        Ok(())
    }

    fn unique_violation(constraint: &str) -> DatabaseError {
        DatabaseError::new(DatabaseErrorKind::UniqueViolation {
            constraint: constraint.to_string(),
        })
    }
}

fn newest_first<T, F>(mut rows: Vec<T>, created_at: F, limit: i64) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    rows.sort_by_key(|row| std::cmp::Reverse(created_at(row)));
    rows.truncate(limit.max(0) as usize);
    rows
}

#[async_trait]
impl AccountLedger for MemoryLedger {
    async fn insert_account(&self, record: &AccountRecord) -> LedgerResult<AccountRecord> {
        self.check_write()?;
        let mut accounts = guard(&self.accounts);
        if accounts.contains_key(&record.id) {
            return Err(Self::unique_violation("payments_account_pkey"));
        }
        if accounts.values().any(|a| a.hash == record.hash) {
            return Err(Self::unique_violation("payments_account_hash_idx"));
        }
        accounts.insert(record.id.clone(), record.clone());
        Ok(record.clone())
    }

    async fn upsert_account(&self, record: &AccountRecord) -> LedgerResult<AccountRecord> {
        self.check_write()?;
        let mut accounts = guard(&self.accounts);
        let mut stored = record.clone();
        stored.last_updated_at = Utc::now();
        if let Some(existing) = accounts.get(&record.id) {
            stored.created_at = existing.created_at;
            if stored.fund_id.is_none() {
                stored.fund_id = existing.fund_id.clone();
            }
        }
        accounts.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn find_account(&self, id: &str) -> LedgerResult<Option<AccountRecord>> {
        self.touch();
        Ok(guard(&self.accounts).get(id).cloned())
    }

    async fn find_account_by_hash(&self, hash: &str) -> LedgerResult<Option<AccountRecord>> {
        self.touch();
        Ok(guard(&self.accounts)
            .values()
            .find(|a| a.hash == hash)
            .cloned())
    }

    async fn find_active_account(&self, worker_id: &str) -> LedgerResult<Option<AccountRecord>> {
        self.touch();
        Ok(guard(&self.accounts)
            .values()
            .filter(|a| a.worker_id == worker_id && a.active)
            .max_by_key(|a| a.last_updated_at)
            .cloned())
    }

    async fn list_accounts(&self, filter: &ListFilter) -> LedgerResult<Vec<AccountRecord>> {
        self.touch();
        let rows = guard(&self.accounts)
            .values()
            .filter(|a| filter.matches(&a.worker_id, a.last_updated_at))
            .cloned()
            .collect();
        Ok(newest_first(rows, |a: &AccountRecord| a.created_at, filter.limit))
    }

    async fn update_account_status(
        &self,
        id: &str,
        expected: AccountStatus,
        status: AccountStatus,
        meta: Option<&AccountMeta>,
    ) -> LedgerResult<Option<AccountRecord>> {
        self.check_write()?;
        let mut accounts = guard(&self.accounts);
        let Some(account) = accounts.get_mut(id).filter(|a| a.status == expected) else {
            return Ok(None);
        };
        account.status = status;
        if let Some(meta) = meta {
            account.meta = meta.clone();
        }
        account.last_updated_at = Utc::now();
        Ok(Some(account.clone()))
    }

    async fn set_fund_id(&self, id: &str, fund_id: &str) -> LedgerResult<AccountRecord> {
        self.check_write()?;
        let mut accounts = guard(&self.accounts);
        let account = accounts
            .get_mut(id)
            .ok_or_else(|| DatabaseError::not_found("account", id))?;
        account.fund_id = Some(fund_id.to_string());
        account.last_updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn activate_account(&self, id: &str) -> LedgerResult<AccountRecord> {
        self.check_write()?;
        let mut accounts = guard(&self.accounts);
        let worker_id = accounts
            .get(id)
            .map(|a| a.worker_id.clone())
            .ok_or_else(|| DatabaseError::not_found("account", id))?;
        let now = Utc::now();
        for account in accounts.values_mut().filter(|a| a.worker_id == worker_id) {
            account.active = account.id == id;
            account.last_updated_at = now;
        }
        accounts
            .get(id)
            .cloned()
            .ok_or_else(|| DatabaseError::not_found("account", id))
    }
}

#[async_trait]
impl TransactionLedger for MemoryLedger {
    async fn insert_transaction(
        &self,
        record: &TransactionRecord,
    ) -> LedgerResult<TransactionRecord> {
        self.check_write()?;
        let mut transactions = guard(&self.transactions);
        if transactions.contains_key(&record.id) {
            return Err(Self::unique_violation("payments_transaction_pkey"));
        }
        if transactions
            .values()
            .any(|t| t.idempotency_key() == record.idempotency_key())
        {
            return Err(Self::unique_violation("payments_transaction_idempotency_idx"));
        }
        transactions.insert(record.id.clone(), record.clone());
        Ok(record.clone())
    }

    async fn find_transaction(&self, id: &str) -> LedgerResult<Option<TransactionRecord>> {
        self.touch();
        Ok(guard(&self.transactions).get(id).cloned())
    }

    async fn find_by_payout_id(&self, payout_id: &str) -> LedgerResult<Option<TransactionRecord>> {
        self.touch();
        Ok(guard(&self.transactions)
            .values()
            .find(|t| t.payout_id.as_deref() == Some(payout_id))
            .cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> LedgerResult<Option<TransactionRecord>> {
        self.touch();
        Ok(guard(&self.transactions)
            .values()
            .find(|t| t.idempotency_key() == key)
            .cloned())
    }

    async fn update_unless_final(
        &self,
        record: &TransactionRecord,
    ) -> LedgerResult<Option<TransactionRecord>> {
        self.check_write()?;
        let mut transactions = guard(&self.transactions);
        let stored = transactions
            .get_mut(&record.id)
            .ok_or_else(|| DatabaseError::not_found("transaction", &record.id))?;
        if stored.status.is_final() {
            return Ok(None);
        }
        stored.status = record.status;
        if record.payout_id.is_some() {
            stored.payout_id = record.payout_id.clone();
        }
        if record.utr.is_some() {
            stored.utr = record.utr.clone();
        }
        stored.meta = record.meta.clone();
        stored.last_updated_at = Utc::now();
        Ok(Some(stored.clone()))
    }

    async fn reserved_amount(&self, worker_id: &str) -> LedgerResult<Decimal> {
        self.touch();
        Ok(guard(&self.transactions)
            .values()
            .filter(|t| t.worker_id == worker_id && t.status.counts_against_balance())
            .map(|t| t.amount)
            .sum())
    }

    async fn list_transactions(
        &self,
        filter: &ListFilter,
    ) -> LedgerResult<Vec<TransactionRecord>> {
        self.touch();
        let rows = guard(&self.transactions)
            .values()
            .filter(|t| filter.matches(&t.worker_id, t.last_updated_at))
            .cloned()
            .collect();
        Ok(newest_first(rows, |t: &TransactionRecord| t.created_at, filter.limit))
    }

    async fn find_in_flight(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> LedgerResult<Vec<TransactionRecord>> {
        self.touch();
        let mut rows: Vec<TransactionRecord> = guard(&self.transactions)
            .values()
            .filter(|t| {
                t.payout_id.is_some() && !t.status.is_final() && t.last_updated_at < older_than
            })
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.last_updated_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

#[async_trait]
impl BulkTransactionLedger for MemoryLedger {
    async fn insert_bulk_transaction(
        &self,
        record: &BulkPaymentsTransactionRecord,
    ) -> LedgerResult<BulkPaymentsTransactionRecord> {
        self.check_write()?;
        let mut bulk = guard(&self.bulk_transactions);
        if bulk.contains_key(&record.id) {
            return Err(Self::unique_violation("bulk_payments_transaction_pkey"));
        }
        bulk.insert(record.id.clone(), record.clone());
        Ok(record.clone())
    }

    async fn find_bulk_transaction(
        &self,
        id: &str,
    ) -> LedgerResult<Option<BulkPaymentsTransactionRecord>> {
        self.touch();
        Ok(guard(&self.bulk_transactions).get(id).cloned())
    }

    async fn update_bulk_status(
        &self,
        id: &str,
        status: BulkTransactionStatus,
        meta: Option<&BulkTransactionMeta>,
    ) -> LedgerResult<BulkPaymentsTransactionRecord> {
        self.check_write()?;
        let mut bulk = guard(&self.bulk_transactions);
        let record = bulk
            .get_mut(id)
            .ok_or_else(|| DatabaseError::not_found("bulk transaction", id))?;
        record.status = status;
        if let Some(meta) = meta {
            record.meta = meta.clone();
        }
        record.last_updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn list_bulk_transactions(
        &self,
        filter: &ListFilter,
    ) -> LedgerResult<Vec<BulkPaymentsTransactionRecord>> {
        self.touch();
        let rows = guard(&self.bulk_transactions)
            .values()
            .filter(|b| filter.updated_since.map_or(true, |since| b.last_updated_at >= since))
            .cloned()
            .collect();
        Ok(newest_first(
            rows,
            |b: &BulkPaymentsTransactionRecord| b.created_at,
            filter.limit,
        ))
    }
}

#[async_trait]
impl EarningsLedger for MemoryLedger {
    async fn earned_credits(&self, worker_id: &str) -> LedgerResult<Decimal> {
        self.touch();
        Ok(guard(&self.earnings)
            .get(worker_id)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn eligible_workers(&self, limit: i64) -> LedgerResult<Vec<EligibleWorker>> {
        self.touch();
        let earnings = guard(&self.earnings).clone();
        let transactions = guard(&self.transactions);
        let mut eligible: Vec<EligibleWorker> = guard(&self.accounts)
            .values()
            .filter(|a| a.active && a.status == AccountStatus::Verified)
            .filter_map(|account| {
                let earned = earnings.get(&account.worker_id).copied()?;
                let held: Decimal = transactions
                    .values()
                    .filter(|t| {
                        t.worker_id == account.worker_id && t.status.counts_against_balance()
                    })
                    .map(|t| t.amount)
                    .sum();
                let amount = earned - held;
                (amount > Decimal::ZERO).then(|| EligibleWorker {
                    worker_id: account.worker_id.clone(),
                    account_id: account.id.clone(),
                    amount,
                })
            })
            .collect();
        eligible.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        eligible.truncate(limit.max(0) as usize);
        Ok(eligible)
    }
}
