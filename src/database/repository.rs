//! Ledger access traits. Postgres repositories implement them for
//! production; `memory::MemoryLedger` implements them for local runs and
//! tests.

use crate::database::error::DatabaseError;
use crate::payments::types::{
    AccountMeta, AccountRecord, AccountStatus, BulkPaymentsTransactionRecord,
    BulkTransactionMeta, BulkTransactionStatus, EligibleWorker, TransactionRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

pub type LedgerResult<T> = Result<T, DatabaseError>;

/// Filter for the admin listings. Rows come back newest first.
#[derive(Debug, Clone)]
pub struct ListFilter {
    pub worker_id: Option<String>,
    /// Only rows updated at or after this instant.
    pub updated_since: Option<DateTime<Utc>>,
    pub limit: i64,
}

impl ListFilter {
    pub fn new(limit: i64) -> Self {
        Self {
            worker_id: None,
            updated_since: None,
            limit,
        }
    }

    pub fn for_worker(worker_id: &str, limit: i64) -> Self {
        Self {
            worker_id: Some(worker_id.to_string()),
            ..Self::new(limit)
        }
    }

    pub fn matches(&self, worker_id: &str, last_updated_at: DateTime<Utc>) -> bool {
        self.worker_id.as_deref().map_or(true, |w| w == worker_id)
            && self.updated_since.map_or(true, |since| last_updated_at >= since)
    }
}

#[async_trait]
pub trait AccountLedger: Send + Sync {
    async fn insert_account(&self, record: &AccountRecord) -> LedgerResult<AccountRecord>;

    /// Insert or overwrite by id.
    async fn upsert_account(&self, record: &AccountRecord) -> LedgerResult<AccountRecord>;

    async fn find_account(&self, id: &str) -> LedgerResult<Option<AccountRecord>>;

    async fn find_account_by_hash(&self, hash: &str) -> LedgerResult<Option<AccountRecord>>;

    /// The worker's active account, if any.
    async fn find_active_account(&self, worker_id: &str) -> LedgerResult<Option<AccountRecord>>;

    async fn list_accounts(&self, filter: &ListFilter) -> LedgerResult<Vec<AccountRecord>>;

    /// Set the status, replacing metadata when `meta` is given, only while
    /// the stored status is still `expected`. Returns `None` when the row
    /// has moved on (or does not exist).
    async fn update_account_status(
        &self,
        id: &str,
        expected: AccountStatus,
        status: AccountStatus,
        meta: Option<&AccountMeta>,
    ) -> LedgerResult<Option<AccountRecord>>;

    async fn set_fund_id(&self, id: &str, fund_id: &str) -> LedgerResult<AccountRecord>;

    /// Mark `id` active and every other account of the same worker inactive.
    async fn activate_account(&self, id: &str) -> LedgerResult<AccountRecord>;
}

#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Insert a new row. A second row with the same idempotency key is a
    /// unique violation.
    async fn insert_transaction(&self, record: &TransactionRecord)
        -> LedgerResult<TransactionRecord>;

    async fn find_transaction(&self, id: &str) -> LedgerResult<Option<TransactionRecord>>;

    async fn find_by_payout_id(&self, payout_id: &str) -> LedgerResult<Option<TransactionRecord>>;

    async fn find_by_idempotency_key(&self, key: &str)
        -> LedgerResult<Option<TransactionRecord>>;

    /// Overwrite the mutable columns unless the stored row is already in a
    /// final status. Returns `None` when the stored row was final.
    async fn update_unless_final(
        &self,
        record: &TransactionRecord,
    ) -> LedgerResult<Option<TransactionRecord>>;

    /// Sum of amounts still held against the worker's earnings.
    async fn reserved_amount(&self, worker_id: &str) -> LedgerResult<Decimal>;

    async fn list_transactions(&self, filter: &ListFilter)
        -> LedgerResult<Vec<TransactionRecord>>;

    /// Rows with a payout id, in a non-final status, not touched since
    /// `older_than`.
    async fn find_in_flight(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> LedgerResult<Vec<TransactionRecord>>;
}

#[async_trait]
pub trait BulkTransactionLedger: Send + Sync {
    async fn insert_bulk_transaction(
        &self,
        record: &BulkPaymentsTransactionRecord,
    ) -> LedgerResult<BulkPaymentsTransactionRecord>;

    async fn find_bulk_transaction(
        &self,
        id: &str,
    ) -> LedgerResult<Option<BulkPaymentsTransactionRecord>>;

    async fn update_bulk_status(
        &self,
        id: &str,
        status: BulkTransactionStatus,
        meta: Option<&BulkTransactionMeta>,
    ) -> LedgerResult<BulkPaymentsTransactionRecord>;

    /// Bulk requests, newest first. The worker filter does not apply.
    async fn list_bulk_transactions(
        &self,
        filter: &ListFilter,
    ) -> LedgerResult<Vec<BulkPaymentsTransactionRecord>>;
}

#[async_trait]
pub trait EarningsLedger: Send + Sync {
    /// Total credits earned by the worker.
    async fn earned_credits(&self, worker_id: &str) -> LedgerResult<Decimal>;

    /// Workers with an active `VERIFIED` account whose earnings exceed what
    /// is already paid out or held, with the payable amount.
    async fn eligible_workers(&self, limit: i64) -> LedgerResult<Vec<EligibleWorker>>;
}
