use crate::database::error::DatabaseError;
use crate::database::repository::{LedgerResult, ListFilter, TransactionLedger};
use crate::payments::types::{
    TransactionMeta, TransactionPurpose, TransactionRecord, TransactionStatus,
    FINAL_TRANSACTION_STATUSES,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

const TRANSACTION_COLUMNS: &str = "id, amount, currency, account_id, worker_id, bulk_id, \
                                   source_account, purpose, mode, status, payout_id, utr, \
                                   meta, created_at, last_updated_at";

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: String,
    amount: Decimal,
    currency: String,
    account_id: String,
    worker_id: String,
    bulk_id: Option<String>,
    source_account: String,
    purpose: String,
    mode: String,
    status: String,
    payout_id: Option<String>,
    utr: Option<String>,
    meta: Json<TransactionMeta>,
    created_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for TransactionRecord {
    type Error = DatabaseError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let purpose = TransactionPurpose::from_str(&row.purpose)
            .ok_or_else(|| DatabaseError::decode(format!("unknown purpose '{}'", row.purpose)))?;
        let status = TransactionStatus::from_str(&row.status).ok_or_else(|| {
            DatabaseError::decode(format!("unknown transaction status '{}'", row.status))
        })?;

        Ok(TransactionRecord {
            id: row.id,
            amount: row.amount,
            currency: row.currency,
            account_id: row.account_id,
            worker_id: row.worker_id,
            bulk_id: row.bulk_id,
            source_account: row.source_account,
            purpose,
            mode: row.mode,
            status,
            payout_id: row.payout_id,
            utr: row.utr,
            meta: row.meta.0,
            created_at: row.created_at,
            last_updated_at: row.last_updated_at,
        })
    }
}

fn final_statuses() -> Vec<&'static str> {
    FINAL_TRANSACTION_STATUSES.iter().map(|s| s.as_str()).collect()
}

pub(crate) fn released_statuses() -> Vec<&'static str> {
    FINAL_TRANSACTION_STATUSES
        .iter()
        .filter(|s| !s.counts_against_balance())
        .map(|s| s.as_str())
        .collect()
}

/// Postgres-backed payout ledger.
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        value: &str,
    ) -> LedgerResult<Option<TransactionRecord>> {
        let sql = format!(
            "SELECT {} FROM payments_transaction WHERE {} = $1",
            TRANSACTION_COLUMNS, clause
        );
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(TransactionRecord::try_from)
            .transpose()
    }
}

#[async_trait]
impl TransactionLedger for TransactionRepository {
    async fn insert_transaction(
        &self,
        record: &TransactionRecord,
    ) -> LedgerResult<TransactionRecord> {
        let sql = format!(
            "INSERT INTO payments_transaction \
             (id, amount, currency, account_id, worker_id, bulk_id, source_account, purpose, \
              mode, status, payout_id, utr, idempotency_key, meta, created_at, last_updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             RETURNING {}",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(&record.id)
            .bind(record.amount)
            .bind(&record.currency)
            .bind(&record.account_id)
            .bind(&record.worker_id)
            .bind(&record.bulk_id)
            .bind(&record.source_account)
            .bind(record.purpose.as_str())
            .bind(&record.mode)
            .bind(record.status.as_str())
            .bind(&record.payout_id)
            .bind(&record.utr)
            .bind(record.idempotency_key())
            .bind(Json(&record.meta))
            .bind(record.created_at)
            .bind(record.last_updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.try_into()
    }

    async fn find_transaction(&self, id: &str) -> LedgerResult<Option<TransactionRecord>> {
        self.fetch_one_where("id", id).await
    }

    async fn find_by_payout_id(&self, payout_id: &str) -> LedgerResult<Option<TransactionRecord>> {
        self.fetch_one_where("payout_id", payout_id).await
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> LedgerResult<Option<TransactionRecord>> {
        self.fetch_one_where("idempotency_key", key).await
    }

    async fn update_unless_final(
        &self,
        record: &TransactionRecord,
    ) -> LedgerResult<Option<TransactionRecord>> {
        // The final-status check and the write happen in one statement so a
        // concurrent webhook cannot slip a final status in between.
        let sql = format!(
            "UPDATE payments_transaction \
             SET status = $2, payout_id = COALESCE($3, payout_id), utr = COALESCE($4, utr), \
                 meta = $5, last_updated_at = NOW() \
             WHERE id = $1 AND status <> ALL($6) \
             RETURNING {}",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(&record.id)
            .bind(record.status.as_str())
            .bind(&record.payout_id)
            .bind(&record.utr)
            .bind(Json(&record.meta))
            .bind(final_statuses())
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(TransactionRecord::try_from)
            .transpose()
    }

    async fn reserved_amount(&self, worker_id: &str) -> LedgerResult<Decimal> {
        let total: Option<Decimal> = sqlx::query_scalar(
            "SELECT SUM(amount) FROM payments_transaction \
             WHERE worker_id = $1 AND status <> ALL($2)",
        )
        .bind(worker_id)
        .bind(released_statuses())
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(total.unwrap_or(Decimal::ZERO))
    }

    async fn list_transactions(
        &self,
        filter: &ListFilter,
    ) -> LedgerResult<Vec<TransactionRecord>> {
        let sql = format!(
            "SELECT {} FROM payments_transaction \
             WHERE ($1::TEXT IS NULL OR worker_id = $1) \
               AND ($2::TIMESTAMPTZ IS NULL OR last_updated_at >= $2) \
             ORDER BY created_at DESC LIMIT $3",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(filter.worker_id.as_deref())
            .bind(filter.updated_since)
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .into_iter()
            .map(TransactionRecord::try_from)
            .collect()
    }

    async fn find_in_flight(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> LedgerResult<Vec<TransactionRecord>> {
        let sql = format!(
            "SELECT {} FROM payments_transaction \
             WHERE payout_id IS NOT NULL AND status <> ALL($1) AND last_updated_at < $2 \
             ORDER BY last_updated_at ASC LIMIT $3",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(final_statuses())
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .into_iter()
            .map(TransactionRecord::try_from)
            .collect()
    }
}
