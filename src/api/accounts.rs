//! Worker-facing account routes served by a box.
//!
//! The worker is identified by the `x-worker-id` header set by the box's
//! session layer.

use crate::api::header_value;
use crate::database::repository::AccountLedger;
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::middleware::error::get_request_id_from_headers;
use crate::payments::types::{AccountMeta, AccountRecord, AccountStatus};
use crate::queue::registration::{RegistrationPayload, RegistrationQueue};
use crate::queue::verify_account::{VerifyAccountJob, VerifyAccountQueue};
use crate::queue::QueueWrapper;
use crate::services::accounts::{account_hash, RegistrationRequest};
use crate::services::backend_client::{BackendApi, BoxCredentials};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub const WORKER_ID_HEADER: &str = "x-worker-id";

pub struct BoxApiState {
    pub accounts: Arc<dyn AccountLedger>,
    pub registration: Arc<RegistrationQueue>,
    pub verification: Arc<VerifyAccountQueue>,
    pub backend: Arc<dyn BackendApi>,
    pub credentials: BoxCredentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyBody {
    pub confirm: Option<bool>,
}

fn worker_id(headers: &HeaderMap) -> Result<String, AppError> {
    header_value(headers, WORKER_ID_HEADER)
        .map(str::to_string)
        .ok_or_else(|| AppError::unauthorized("missing worker identity"))
}

fn tag(err: impl Into<AppError>, headers: &HeaderMap) -> AppError {
    let err = err.into();
    match get_request_id_from_headers(headers) {
        Some(request_id) => err.with_request_id(request_id),
        None => err,
    }
}

/// `POST /api/payments/accounts`
pub async fn register_account(
    State(state): State<Arc<BoxApiState>>,
    headers: HeaderMap,
    Json(request): Json<RegistrationRequest>,
) -> Result<Response, AppError> {
    let worker_id = worker_id(&headers).map_err(|e| tag(e, &headers))?;
    request.validate().map_err(|e| tag(e, &headers))?;

    let hash = account_hash(&worker_id, &request.account.id, request.account.ifsc.as_deref());
    if let Some(existing) = state
        .accounts
        .find_account_by_hash(&hash)
        .await
        .map_err(|e| tag(e, &headers))?
    {
        info!(account_id = %existing.id, worker_id = %worker_id, "account already registered");
        return Ok((StatusCode::OK, Json(existing)).into_response());
    }

    let payload = RegistrationPayload {
        worker_id: worker_id.clone(),
        account_type: request.account_type,
        hash: hash.clone(),
        meta: AccountMeta::new(request.name, request.account),
    };
    match state
        .registration
        .enqueue(&format!("ACCOUNT_REGISTRATION:{}", worker_id), payload)
        .await
    {
        Ok(enqueued) => Ok((StatusCode::CREATED, Json(enqueued.record)).into_response()),
        // A concurrent request registered the same destination first.
        Err(e) if e.is_duplicate() => {
            let existing = state
                .accounts
                .find_account_by_hash(&hash)
                .await
                .map_err(|e| tag(e, &headers))?
                .ok_or_else(|| tag(e, &headers))?;
            Ok((StatusCode::OK, Json(existing)).into_response())
        }
        Err(e) => Err(tag(e, &headers)),
    }
}

/// `PUT /api/payments/accounts/{id}/verify`
pub async fn verify_account(
    State(state): State<Arc<BoxApiState>>,
    Path(account_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<VerifyBody>,
) -> Result<Response, AppError> {
    let worker_id = worker_id(&headers).map_err(|e| tag(e, &headers))?;
    let confirm = body
        .confirm
        .ok_or_else(|| tag(AppError::missing_field("confirm"), &headers))?;

    let account = state
        .accounts
        .find_account(&account_id)
        .await
        .map_err(|e| tag(e, &headers))?
        .ok_or_else(|| tag(AppError::account_not_found(&account_id), &headers))?;
    if account.worker_id != worker_id {
        return Err(tag(
            AppError::forbidden("account belongs to another worker"),
            &headers,
        ));
    }

    let account = refresh_if_behind(&state, account).await.map_err(|e| tag(e, &headers))?;
    if account.status != AccountStatus::Verification {
        return Err(tag(
            AppError::new(AppErrorKind::Domain(DomainError::InvalidAccountStatus {
                account_id: account.id.clone(),
                status: account.status.to_string(),
            })),
            &headers,
        ));
    }

    let job = VerifyAccountJob {
        account_id: account.id.clone(),
        worker_id: worker_id.clone(),
        confirm,
    };
    let enqueued = state
        .verification
        .enqueue(&format!("VERIFY_ACCOUNT:{}", worker_id), job)
        .await
        .map_err(|e| tag(e, &headers))?;
    Ok((StatusCode::OK, Json(enqueued.record)).into_response())
}

/// The box learns about `VERIFICATION` only from the backend, so a local row
/// that has not reached it yet is refreshed first.
async fn refresh_if_behind(
    state: &BoxApiState,
    account: AccountRecord,
) -> Result<AccountRecord, AppError> {
    if account.status == AccountStatus::Verification || account.status.is_sink() {
        return Ok(account);
    }
    match state
        .backend
        .fetch_account(&state.credentials, &account.id)
        .await
    {
        Ok(remote) => {
            let stored = state.accounts.upsert_account(&remote).await?;
            info!(account_id = %stored.id, status = %stored.status, "account refreshed from backend");
            Ok(stored)
        }
        Err(e) => {
            warn!(account_id = %account.id, error = %e, "account refresh failed");
            Ok(account)
        }
    }
}
