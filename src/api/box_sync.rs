//! Backend routes called by boxes. Every call carries the box's identity
//! token as a bearer token; the token must belong to the box that owns the
//! account.

use crate::api::header_value;
use crate::config::BoxRegistry;
use crate::database::repository::AccountLedger;
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::payments::types::{AccountRecord, AccountStatus, VerifyAccountRequest};
use crate::queue::server_registration::ServerRegistrationQueue;
use crate::queue::QueueWrapper;
use crate::services::accounts::{transition_account, Transition};
use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap},
    Json,
};
use std::sync::Arc;
use tracing::info;

pub struct BoxSyncState {
    pub accounts: Arc<dyn AccountLedger>,
    pub registration: Arc<ServerRegistrationQueue>,
    pub boxes: BoxRegistry,
}

/// Resolve the calling box from its bearer token.
fn authenticate(headers: &HeaderMap, boxes: &BoxRegistry) -> Result<String, AppError> {
    let token = header_value(headers, AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| AppError::unauthorized("missing box token"))?;
    boxes
        .box_for_token(token)
        .map(str::to_string)
        .ok_or_else(|| AppError::unauthorized("unknown box token"))
}

async fn owned_account(
    accounts: &dyn AccountLedger,
    box_id: &str,
    account_id: &str,
) -> Result<AccountRecord, AppError> {
    let account = accounts
        .find_account(account_id)
        .await?
        .ok_or_else(|| AppError::account_not_found(account_id))?;
    if account.box_id != box_id {
        return Err(AppError::forbidden("account belongs to another box"));
    }
    Ok(account)
}

/// `POST /payments/accounts`
pub async fn register_account(
    State(state): State<Arc<BoxSyncState>>,
    headers: HeaderMap,
    Json(account): Json<AccountRecord>,
) -> Result<Json<AccountRecord>, AppError> {
    let box_id = authenticate(&headers, &state.boxes)?;
    if account.box_id != box_id {
        return Err(AppError::forbidden("account belongs to another box"));
    }

    // Redelivered box jobs must not push an account back to SERVER_API.
    if let Some(existing) = state.accounts.find_account(&account.id).await? {
        if !existing.status.can_transition_to(&AccountStatus::ServerApi) {
            info!(account_id = %existing.id, status = %existing.status, "account already received");
            return Ok(Json(existing));
        }
    }

    let enqueued = state
        .registration
        .enqueue(&format!("SERVER_REGISTRATION:{}", account.id), account)
        .await?;
    Ok(Json(enqueued.record))
}

/// `GET /payments/accounts/{id}`
pub async fn get_account(
    State(state): State<Arc<BoxSyncState>>,
    Path(account_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AccountRecord>, AppError> {
    let box_id = authenticate(&headers, &state.boxes)?;
    let account = owned_account(state.accounts.as_ref(), &box_id, &account_id).await?;
    Ok(Json(account))
}

/// `PUT /payments/accounts/{id}/verify`
///
/// `confirm=true` records `CONFIRMATION_RECEIVED`; the verification payout's
/// webhook later makes the account `VERIFIED`. `confirm=false` rejects it.
pub async fn verify_account(
    State(state): State<Arc<BoxSyncState>>,
    Path(account_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<VerifyAccountRequest>,
) -> Result<Json<AccountRecord>, AppError> {
    let box_id = authenticate(&headers, &state.boxes)?;
    let account = owned_account(state.accounts.as_ref(), &box_id, &account_id).await?;
    if account.worker_id != request.worker_id {
        return Err(AppError::forbidden("account belongs to another worker"));
    }

    let target = if request.confirm {
        AccountStatus::ConfirmationReceived
    } else {
        AccountStatus::Rejected
    };
    // The payout may settle before the worker confirms.
    let settled = |status: AccountStatus| {
        status == target || (request.confirm && status == AccountStatus::Verified)
    };

    let transition = transition_account(state.accounts.as_ref(), &account.id, |current| {
        (!settled(current.status) && current.status.can_transition_to(&target))
            .then_some((target, None))
    })
    .await?;
    match transition {
        Transition::Moved { record, .. } => {
            info!(account_id = %record.id, status = %record.status, "account verification recorded");
            Ok(Json(record))
        }
        Transition::Kept(record) if settled(record.status) => Ok(Json(record)),
        Transition::Kept(record) => Err(AppError::new(AppErrorKind::Domain(
            DomainError::InvalidAccountStatus {
                account_id: record.id.clone(),
                status: record.status.to_string(),
            },
        ))),
    }
}
