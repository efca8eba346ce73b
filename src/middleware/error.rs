//! JSON error bodies for `AppError`.
//!
//! Every failed request answers with the same shape:
//! `{"error": CODE, "message": ..., "request_id": ..., "timestamp": ...}`.
//! Internal failures never echo the underlying error text.

use crate::error::{AppError, ErrorCode};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorCode,
    pub message: String,
    pub request_id: Option<String>,
    /// RFC 3339
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            details: error
                .context
                .as_ref()
                .map(|context| serde_json::json!({ "context": context })),
            retryable: Some(error.is_retryable()),
        }
    }

    /// Body for ledger, queue and configuration failures.
    pub fn internal_error(request_id: Option<String>, retryable: bool) -> Self {
        Self {
            error: ErrorCode::InternalError,
            message: "An internal server error occurred. Please try again later.".to_string(),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(retryable),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = self.error_code();

        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(
                error = ?self,
                request_id = ?self.request_id,
                code = ?code,
                "request failed with internal error"
            );
            ErrorResponse::internal_error(self.request_id.clone(), self.is_retryable())
        } else {
            if status.is_server_error() {
                tracing::error!(
                    error = ?self,
                    request_id = ?self.request_id,
                    status = status.as_u16(),
                    "upstream call failed"
                );
            } else {
                tracing::warn!(
                    request_id = ?self.request_id,
                    status = status.as_u16(),
                    code = ?code,
                    message = %self.user_message(),
                    "request rejected"
                );
            }
            ErrorResponse::from_app_error(&self)
        };
        (status, Json(body)).into_response()
    }
}

pub fn get_request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
