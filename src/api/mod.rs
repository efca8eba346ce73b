//! HTTP surface of both node roles.
//!
//! A box serves its workers (`/api/payments/accounts`). The backend serves
//! boxes (`/payments/accounts`), the admin console (`/api/payments/*`) and
//! the gateway webhook.

pub mod accounts;
pub mod box_sync;
pub mod payments;
pub mod webhooks;

use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use axum::{
    http::HeaderMap,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub use accounts::BoxApiState;
pub use box_sync::BoxSyncState;
pub use payments::AdminState;
pub use webhooks::WebhookState;

/// Routes a box exposes to its workers.
pub fn box_routes(state: Arc<BoxApiState>) -> Router {
    Router::new()
        .route("/api/payments/accounts", post(accounts::register_account))
        .route(
            "/api/payments/accounts/{id}/verify",
            put(accounts::verify_account),
        )
        .with_state(state)
}

/// Routes the backend exposes to boxes, the admin console and the gateway.
pub fn backend_routes(
    sync: Arc<BoxSyncState>,
    admin: Arc<AdminState>,
    webhook: Arc<WebhookState>,
) -> Router {
    let box_sync = Router::new()
        .route("/payments/accounts", post(box_sync::register_account))
        .route("/payments/accounts/{id}", get(box_sync::get_account))
        .route(
            "/payments/accounts/{id}/verify",
            put(box_sync::verify_account),
        )
        .with_state(sync);

    let admin = Router::new()
        .route(
            "/api/payments/bulk",
            post(payments::create_bulk_payout).get(payments::list_bulk_payouts),
        )
        .route("/api/payments/eligible", get(payments::eligible_workers))
        .route("/api/payments/transactions", get(payments::list_transactions))
        .route("/api/payments/accounts", get(payments::list_accounts))
        .with_state(admin);

    let webhooks = Router::new()
        .route("/webhooks/payouts", post(webhooks::payout_webhook))
        .with_state(webhook);

    box_sync.merge(admin).merge(webhooks)
}

/// Request id, tracing and request logging shared by every router.
pub fn with_common_layers(router: Router) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(TraceLayer::new_for_http())
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
}

/// Trimmed, non-empty value of a header.
pub(crate) fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
