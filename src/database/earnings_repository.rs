use crate::database::error::DatabaseError;
use crate::database::repository::{EarningsLedger, LedgerResult};
use crate::database::transaction_repository::released_statuses;
use crate::payments::types::{AccountStatus, EligibleWorker};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;

pub struct EarningsRepository {
    pool: PgPool,
}

impl EarningsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EarningsLedger for EarningsRepository {
    async fn earned_credits(&self, worker_id: &str) -> LedgerResult<Decimal> {
        let total: Option<Decimal> =
            sqlx::query_scalar("SELECT SUM(amount) FROM worker_earning WHERE worker_id = $1")
                .bind(worker_id)
                .fetch_one(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        Ok(total.unwrap_or(Decimal::ZERO))
    }

    async fn eligible_workers(&self, limit: i64) -> LedgerResult<Vec<EligibleWorker>> {
        let rows: Vec<(String, String, Decimal)> = sqlx::query_as(
            "SELECT a.worker_id, a.id, e.earned - COALESCE(h.held, 0) AS amount \
             FROM payments_account a \
             JOIN (SELECT worker_id, SUM(amount) AS earned FROM worker_earning \
                   GROUP BY worker_id) e ON e.worker_id = a.worker_id \
             LEFT JOIN (SELECT worker_id, SUM(amount) AS held FROM payments_transaction \
                        WHERE status <> ALL($2) GROUP BY worker_id) h \
                    ON h.worker_id = a.worker_id \
             WHERE a.active = TRUE AND a.status = $1 \
               AND e.earned - COALESCE(h.held, 0) > 0 \
             ORDER BY a.worker_id LIMIT $3",
        )
        .bind(AccountStatus::Verified.as_str())
        .bind(released_statuses())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(rows
            .into_iter()
            .map(|(worker_id, account_id, amount)| EligibleWorker {
                worker_id,
                account_id,
                amount,
            })
            .collect())
    }
}
