use crate::database::error::DatabaseError;
use crate::database::repository::{AccountLedger, LedgerResult, ListFilter};
use crate::payments::types::{AccountMeta, AccountRecord, AccountStatus, AccountType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

const ACCOUNT_COLUMNS: &str = "id, box_id, worker_id, account_type, hash, fund_id, active, \
                               status, meta, created_at, last_updated_at";

#[derive(Debug, FromRow)]
struct AccountRow {
    id: String,
    box_id: String,
    worker_id: String,
    account_type: String,
    hash: String,
    fund_id: Option<String>,
    active: bool,
    status: String,
    meta: Json<AccountMeta>,
    created_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for AccountRecord {
    type Error = DatabaseError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let account_type = AccountType::from_str(&row.account_type).ok_or_else(|| {
            DatabaseError::decode(format!("unknown account type '{}'", row.account_type))
        })?;
        let status = AccountStatus::from_str(&row.status)
            .ok_or_else(|| DatabaseError::decode(format!("unknown account status '{}'", row.status)))?;

        Ok(AccountRecord {
            id: row.id,
            box_id: row.box_id,
            worker_id: row.worker_id,
            account_type,
            hash: row.hash,
            fund_id: row.fund_id,
            active: row.active,
            status,
            meta: row.meta.0,
            created_at: row.created_at,
            last_updated_at: row.last_updated_at,
        })
    }
}

/// Postgres-backed account ledger.
pub struct AccountRepository {
    pool: PgPool,
}

impl AccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> LedgerResult<Option<AccountRecord>> {
        let sql = format!(
            "SELECT {} FROM payments_account WHERE {} = $1",
            ACCOUNT_COLUMNS, clause
        );
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(AccountRecord::try_from)
            .transpose()
    }
}

#[async_trait]
impl AccountLedger for AccountRepository {
    async fn insert_account(&self, record: &AccountRecord) -> LedgerResult<AccountRecord> {
        let sql = format!(
            "INSERT INTO payments_account \
             (id, box_id, worker_id, account_type, hash, fund_id, active, status, meta, \
              created_at, last_updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {}",
            ACCOUNT_COLUMNS
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(&record.id)
            .bind(&record.box_id)
            .bind(&record.worker_id)
            .bind(record.account_type.as_str())
            .bind(&record.hash)
            .bind(&record.fund_id)
            .bind(record.active)
            .bind(record.status.as_str())
            .bind(Json(&record.meta))
            .bind(record.created_at)
            .bind(record.last_updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.try_into()
    }

    async fn upsert_account(&self, record: &AccountRecord) -> LedgerResult<AccountRecord> {
        let sql = format!(
            "INSERT INTO payments_account \
             (id, box_id, worker_id, account_type, hash, fund_id, active, status, meta, \
              created_at, last_updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW()) \
             ON CONFLICT (id) DO UPDATE SET \
               box_id = EXCLUDED.box_id, \
               worker_id = EXCLUDED.worker_id, \
               account_type = EXCLUDED.account_type, \
               hash = EXCLUDED.hash, \
               fund_id = COALESCE(EXCLUDED.fund_id, payments_account.fund_id), \
               active = EXCLUDED.active, \
               status = EXCLUDED.status, \
               meta = EXCLUDED.meta, \
               last_updated_at = NOW() \
             RETURNING {}",
            ACCOUNT_COLUMNS
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(&record.id)
            .bind(&record.box_id)
            .bind(&record.worker_id)
            .bind(record.account_type.as_str())
            .bind(&record.hash)
            .bind(&record.fund_id)
            .bind(record.active)
            .bind(record.status.as_str())
            .bind(Json(&record.meta))
            .bind(record.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.try_into()
    }

    async fn find_account(&self, id: &str) -> LedgerResult<Option<AccountRecord>> {
        self.fetch_one_where("id", id).await
    }

    async fn find_account_by_hash(&self, hash: &str) -> LedgerResult<Option<AccountRecord>> {
        self.fetch_one_where("hash", hash).await
    }

    async fn find_active_account(&self, worker_id: &str) -> LedgerResult<Option<AccountRecord>> {
        let sql = format!(
            "SELECT {} FROM payments_account \
             WHERE worker_id = $1 AND active = TRUE \
             ORDER BY last_updated_at DESC LIMIT 1",
            ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(AccountRecord::try_from)
            .transpose()
    }

    async fn list_accounts(&self, filter: &ListFilter) -> LedgerResult<Vec<AccountRecord>> {
        let sql = format!(
            "SELECT {} FROM payments_account \
             WHERE ($1::TEXT IS NULL OR worker_id = $1) \
               AND ($2::TIMESTAMPTZ IS NULL OR last_updated_at >= $2) \
             ORDER BY created_at DESC LIMIT $3",
            ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(filter.worker_id.as_deref())
            .bind(filter.updated_since)
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .into_iter()
            .map(AccountRecord::try_from)
            .collect()
    }

    async fn update_account_status(
        &self,
        id: &str,
        expected: AccountStatus,
        status: AccountStatus,
        meta: Option<&AccountMeta>,
    ) -> LedgerResult<Option<AccountRecord>> {
        let sql = format!(
            "UPDATE payments_account \
             SET status = $3, meta = COALESCE($4, meta), last_updated_at = NOW() \
             WHERE id = $1 AND status = $2 \
             RETURNING {}",
            ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .bind(expected.as_str())
            .bind(status.as_str())
            .bind(meta.map(Json))
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(AccountRecord::try_from)
            .transpose()
    }

    async fn set_fund_id(&self, id: &str, fund_id: &str) -> LedgerResult<AccountRecord> {
        let sql = format!(
            "UPDATE payments_account SET fund_id = $2, last_updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .bind(fund_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .ok_or_else(|| DatabaseError::not_found("account", id))?
            .try_into()
    }

    async fn activate_account(&self, id: &str) -> LedgerResult<AccountRecord> {
        sqlx::query(
            "UPDATE payments_account \
             SET active = (id = $1), last_updated_at = NOW() \
             WHERE worker_id = (SELECT worker_id FROM payments_account WHERE id = $1)",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        self.find_account(id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("account", id))
    }
}
