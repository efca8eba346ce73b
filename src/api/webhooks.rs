use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::header_value;
use crate::services::webhook_processor::WebhookProcessor;

pub struct WebhookState {
    pub processor: Arc<WebhookProcessor>,
    /// Lowercase name of the header carrying the HMAC signature.
    pub signature_header: String,
}

/// POST /webhooks/payouts
///
/// The body is taken raw so the signature is checked over the exact bytes
/// the gateway signed. Once authenticated the gateway always gets a 200.
pub async fn payout_webhook(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = header_value(&headers, &state.signature_header);

    match state.processor.process(&body, signature).await {
        Ok(outcome) => {
            info!(outcome = ?outcome, "payout webhook processed");
            (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
        }
        Err(e) if e.is_auth_failure() => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"status": "error", "message": e.to_string()})),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "payout webhook acknowledged without update");
            (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
        }
    }
}
