//! Admin routes on the backend: bulk payouts and ledger listings.

use crate::api::header_value;
use crate::database::repository::{
    AccountLedger, BulkTransactionLedger, EarningsLedger, ListFilter, TransactionLedger,
};
use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::payments::types::{
    AccountRecord, BulkPaymentsTransactionRecord, EligibleWorker, TransactionRecord,
    TransactionRequest, MAX_BULK_WORKERS, MAX_PAYOUT_AMOUNT,
};
use crate::queue::bulk_transaction::{BulkTransactionPayload, BulkTransactionQueue};
use crate::queue::QueueWrapper;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

pub const USER_ID_HEADER: &str = "x-user-id";
const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

pub struct AdminState {
    pub accounts: Arc<dyn AccountLedger>,
    pub transactions: Arc<dyn TransactionLedger>,
    pub bulk_transactions: Arc<dyn BulkTransactionLedger>,
    pub earnings: Arc<dyn EarningsLedger>,
    pub bulk: Arc<BulkTransactionQueue>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub worker_id: Option<String>,
    /// RFC 3339; only rows updated at or after it are returned.
    pub from: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl ListQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    fn filter(&self) -> ListFilter {
        ListFilter {
            worker_id: self.worker_id.clone(),
            updated_since: self.from,
            limit: self.limit(),
        }
    }
}

/// Reject empty or oversized batches, blank workers, amounts outside
/// `(0, MAX_PAYOUT_AMOUNT]` and workers listed twice.
pub fn validate_bulk_requests(requests: &[TransactionRequest]) -> Result<(), AppError> {
    if requests.is_empty() {
        return Err(AppError::invalid_field("requests", "at least one payout is required"));
    }
    if requests.len() > MAX_BULK_WORKERS {
        return Err(AppError::invalid_field(
            "requests",
            format!("at most {} payouts per batch", MAX_BULK_WORKERS),
        ));
    }
    let mut seen = HashSet::new();
    for (i, request) in requests.iter().enumerate() {
        if request.worker_id.trim().is_empty() {
            return Err(AppError::missing_field(&format!("[{}].workerId", i)));
        }
        let reason = if request.amount <= Decimal::ZERO {
            Some("must be positive".to_string())
        } else if request.amount > MAX_PAYOUT_AMOUNT {
            Some(format!("must not exceed {}", MAX_PAYOUT_AMOUNT))
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::InvalidAmount {
                    amount: request.amount.to_string(),
                    reason,
                },
            )));
        }
        if !seen.insert(request.worker_id.as_str()) {
            return Err(AppError::invalid_field(
                &format!("[{}].workerId", i),
                "worker listed more than once",
            ));
        }
    }
    Ok(())
}

/// `POST /api/payments/bulk`
pub async fn create_bulk_payout(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Json(requests): Json<Vec<TransactionRequest>>,
) -> Result<Response, AppError> {
    let user_id = header_value(&headers, USER_ID_HEADER)
        .map(str::to_string)
        .ok_or_else(|| AppError::unauthorized("missing user identity"))?;
    validate_bulk_requests(&requests)?;

    let n_workers = requests.len();
    let enqueued = state
        .bulk
        .enqueue(
            &format!("BULK_TRANSACTION:{}", user_id),
            BulkTransactionPayload { user_id, requests },
        )
        .await?;
    info!(bulk_id = %enqueued.record.id, n_workers, "bulk payout accepted");
    Ok((StatusCode::CREATED, Json(enqueued.record)).into_response())
}

/// `GET /api/payments/transactions?worker_id=&from=&limit=`
pub async fn list_transactions(
    State(state): State<Arc<AdminState>>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<TransactionRecord>>, AppError> {
    let rows = state.transactions.list_transactions(&params.filter()).await?;
    Ok(Json(rows))
}

/// `GET /api/payments/accounts?worker_id=&from=&limit=`
pub async fn list_accounts(
    State(state): State<Arc<AdminState>>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<AccountRecord>>, AppError> {
    let rows = state.accounts.list_accounts(&params.filter()).await?;
    Ok(Json(rows))
}

/// `GET /api/payments/bulk?from=&limit=`
pub async fn list_bulk_payouts(
    State(state): State<Arc<AdminState>>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<BulkPaymentsTransactionRecord>>, AppError> {
    let rows = state
        .bulk_transactions
        .list_bulk_transactions(&params.filter())
        .await?;
    Ok(Json(rows))
}

/// `GET /api/payments/eligible`
///
/// Workers that can be paid now with the amount owed. The body can be posted
/// back unchanged as a bulk payout request.
pub async fn eligible_workers(
    State(state): State<Arc<AdminState>>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<EligibleWorker>>, AppError> {
    let workers = state.earnings.eligible_workers(params.limit()).await?;
    info!(count = workers.len(), "eligible workers computed");
    Ok(Json(workers))
}
