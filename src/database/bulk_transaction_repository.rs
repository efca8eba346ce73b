use crate::database::error::DatabaseError;
use crate::database::repository::{BulkTransactionLedger, LedgerResult, ListFilter};
use crate::payments::types::{
    BulkPaymentsTransactionRecord, BulkTransactionMeta, BulkTransactionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

const BULK_COLUMNS: &str = "id, user_id, amount, n_workers, status, meta, created_at, last_updated_at";

#[derive(Debug, FromRow)]
struct BulkTransactionRow {
    id: String,
    user_id: String,
    amount: Decimal,
    n_workers: i32,
    status: String,
    meta: Json<BulkTransactionMeta>,
    created_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
}

impl TryFrom<BulkTransactionRow> for BulkPaymentsTransactionRecord {
    type Error = DatabaseError;

    fn try_from(row: BulkTransactionRow) -> Result<Self, Self::Error> {
        let status = BulkTransactionStatus::from_str(&row.status)
            .ok_or_else(|| DatabaseError::decode(format!("unknown bulk status '{}'", row.status)))?;
        Ok(BulkPaymentsTransactionRecord {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            n_workers: row.n_workers,
            status,
            meta: row.meta.0,
            created_at: row.created_at,
            last_updated_at: row.last_updated_at,
        })
    }
}

pub struct BulkTransactionRepository {
    pool: PgPool,
}

impl BulkTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BulkTransactionLedger for BulkTransactionRepository {
    async fn insert_bulk_transaction(
        &self,
        record: &BulkPaymentsTransactionRecord,
    ) -> LedgerResult<BulkPaymentsTransactionRecord> {
        let sql = format!(
            "INSERT INTO bulk_payments_transaction \
             (id, user_id, amount, n_workers, status, meta, created_at, last_updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
            BULK_COLUMNS
        );
        sqlx::query_as::<_, BulkTransactionRow>(&sql)
            .bind(&record.id)
            .bind(&record.user_id)
            .bind(record.amount)
            .bind(record.n_workers)
            .bind(record.status.as_str())
            .bind(Json(&record.meta))
            .bind(record.created_at)
            .bind(record.last_updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .try_into()
    }

    async fn find_bulk_transaction(
        &self,
        id: &str,
    ) -> LedgerResult<Option<BulkPaymentsTransactionRecord>> {
        let sql = format!("SELECT {} FROM bulk_payments_transaction WHERE id = $1", BULK_COLUMNS);
        sqlx::query_as::<_, BulkTransactionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(BulkPaymentsTransactionRecord::try_from)
            .transpose()
    }

    async fn update_bulk_status(
        &self,
        id: &str,
        status: BulkTransactionStatus,
        meta: Option<&BulkTransactionMeta>,
    ) -> LedgerResult<BulkPaymentsTransactionRecord> {
        let sql = format!(
            "UPDATE bulk_payments_transaction \
             SET status = $2, meta = COALESCE($3, meta), last_updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            BULK_COLUMNS
        );
        sqlx::query_as::<_, BulkTransactionRow>(&sql)
            .bind(id)
            .bind(status.as_str())
            .bind(meta.map(Json))
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .ok_or_else(|| DatabaseError::not_found("bulk transaction", id))?
            .try_into()
    }

    async fn list_bulk_transactions(
        &self,
        filter: &ListFilter,
    ) -> LedgerResult<Vec<BulkPaymentsTransactionRecord>> {
        let sql = format!(
            "SELECT {} FROM bulk_payments_transaction \
             WHERE ($1::TIMESTAMPTZ IS NULL OR last_updated_at >= $1) \
             ORDER BY created_at DESC LIMIT $2",
            BULK_COLUMNS
        );
        sqlx::query_as::<_, BulkTransactionRow>(&sql)
            .bind(filter.updated_since)
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .into_iter()
            .map(BulkPaymentsTransactionRecord::try_from)
            .collect()
    }
}
