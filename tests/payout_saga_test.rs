//! End-to-end account registration and verification across a box and its
//! backend, both running in process over memory stores.

mod common;

use axum::http::{Method, StatusCode};
use common::{
    bank_registration, send, BackendNode, BoxNode, RouterBackend, UnavailableBackend, BOX_ID,
    BOX_TOKEN,
};
use gigpay_backend::database::repository::{AccountLedger, ListFilter, TransactionLedger};
use gigpay_backend::payments::types::{AccountStatus, TransactionPurpose, TransactionStatus};
use gigpay_backend::queue::registration::RegistrationJob;
use gigpay_backend::queue::{names, NamedQueue};
use serde_json::json;
use std::sync::Arc;

const WORKER: &str = "worker-1";

async fn register(box_node: &BoxNode, account_number: &str) -> (StatusCode, serde_json::Value) {
    send(
        &box_node.router,
        Method::POST,
        "/api/payments/accounts",
        &[("x-worker-id", WORKER)],
        Some(bank_registration(account_number)),
    )
    .await
}

#[tokio::test]
async fn test_account_is_registered_onboarded_and_verified() {
    let backend = BackendNode::start().await;
    let box_node = BoxNode::start(Arc::new(RouterBackend::new(backend.router.clone()))).await;

    // Worker registers on the box: row written, job queued, nothing sent yet.
    let (status, body) = register(&box_node, "50100012345678").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "INITIALISED");
    let account_id = body["id"].as_str().unwrap().to_string();
    let hash = body["hash"].as_str().unwrap().to_string();

    // Box consumer forwards the account to the backend.
    assert_eq!(box_node.drain().await, 1);
    let boxed = box_node.ledger.find_account(&account_id).await.unwrap().unwrap();
    assert_eq!(boxed.status, AccountStatus::ServerApi);

    // Backend onboards at the gateway and pays the verification amount.
    backend.drain().await;
    let server = backend.ledger.find_account(&account_id).await.unwrap().unwrap();
    assert_eq!(server.status, AccountStatus::Verification);
    assert_eq!(server.fund_id.as_deref(), Some(format!("fa_fund-account-{}", hash).as_str()));
    assert_eq!(backend.gateway.contact_calls(), 1);
    assert_eq!(backend.gateway.fund_account_calls(), 1);

    let transactions = backend
        .ledger
        .list_transactions(&ListFilter::for_worker(WORKER, 10))
        .await
        .unwrap();
    assert_eq!(transactions.len(), 1);
    let verification = &transactions[0];
    assert_eq!(verification.purpose, TransactionPurpose::Verification);
    assert_eq!(verification.status, TransactionStatus::Processing);
    assert_eq!(verification.idempotency_key(), format!("verification-{}", hash));
    let payout_id = verification.payout_id.clone().unwrap();

    // Worker confirms; the box refreshes its stale row from the backend first.
    let (status, body) = send(
        &box_node.router,
        Method::PUT,
        &format!("/api/payments/accounts/{}/verify", account_id),
        &[("x-worker-id", WORKER)],
        Some(json!({"confirm": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CONFIRMATION_RECEIVED");

    assert_eq!(box_node.drain().await, 1);
    let server = backend.ledger.find_account(&account_id).await.unwrap().unwrap();
    assert_eq!(server.status, AccountStatus::ConfirmationReceived);

    // The payout settles and the account becomes the worker's active one.
    assert_eq!(backend.webhook(&payout_id, "processed", Some("UTR0001")).await, StatusCode::OK);
    let server = backend.ledger.find_account(&account_id).await.unwrap().unwrap();
    assert_eq!(server.status, AccountStatus::Verified);
    assert!(server.active);

    let settled = backend
        .ledger
        .find_transaction(&verification.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settled.status, TransactionStatus::Processed);
    assert_eq!(settled.utr.as_deref(), Some("UTR0001"));
    assert_eq!(backend.gateway.distinct_payouts(), 1);
}

#[tokio::test]
async fn test_same_destination_is_registered_once() {
    let backend = BackendNode::start().await;
    let box_node = BoxNode::start(Arc::new(RouterBackend::new(backend.router.clone()))).await;

    let (first_status, first) = register(&box_node, "50100099990000").await;
    let (second_status, second) = register(&box_node, "50100099990000").await;

    assert_eq!(first_status, StatusCode::CREATED);
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(first["id"], second["id"]);
    assert_eq!(box_node.queues.waiting(names::BOX_ACCOUNT_REGISTRATION).len(), 1);
}

#[tokio::test]
async fn test_redelivered_server_registration_does_not_onboard_twice() {
    let backend = BackendNode::start().await;
    let box_node = BoxNode::start(Arc::new(RouterBackend::new(backend.router.clone()))).await;

    let (_, body) = register(&box_node, "50100011112222").await;
    let account_id = body["id"].as_str().unwrap().to_string();
    box_node.drain().await;
    backend.drain().await;

    let queue = NamedQueue::initialize(backend.queues.clone(), names::SERVER_ACCOUNT_REGISTRATION)
        .await
        .unwrap();
    queue
        .add(
            "SERVER_REGISTRATION:redelivered",
            &RegistrationJob {
                account_id: account_id.clone(),
            },
        )
        .await
        .unwrap();
    backend.drain().await;

    assert_eq!(backend.gateway.contact_calls(), 1);
    assert_eq!(backend.gateway.fund_account_calls(), 1);
    assert_eq!(backend.gateway.payout_calls(), 1);
    assert_eq!(backend.ledger.transaction_count(), 1);
    let server = backend.ledger.find_account(&account_id).await.unwrap().unwrap();
    assert_eq!(server.status, AccountStatus::Verification);
}

#[tokio::test]
async fn test_worker_rejection_reaches_the_backend() {
    let backend = BackendNode::start().await;
    let box_node = BoxNode::start(Arc::new(RouterBackend::new(backend.router.clone()))).await;

    let (_, body) = register(&box_node, "50100033334444").await;
    let account_id = body["id"].as_str().unwrap().to_string();
    box_node.drain().await;
    backend.drain().await;

    let (status, _) = send(
        &box_node.router,
        Method::PUT,
        &format!("/api/payments/accounts/{}/verify", account_id),
        &[("x-worker-id", WORKER)],
        Some(json!({"confirm": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    box_node.drain().await;

    let server = backend.ledger.find_account(&account_id).await.unwrap().unwrap();
    assert_eq!(server.status, AccountStatus::Rejected);
    let boxed = box_node.ledger.find_account(&account_id).await.unwrap().unwrap();
    assert_eq!(boxed.status, AccountStatus::Rejected);
}

#[tokio::test]
async fn test_unreachable_backend_fails_the_account_without_retry() {
    let box_node = BoxNode::start(Arc::new(UnavailableBackend)).await;

    let (_, body) = register(&box_node, "50100055556666").await;
    let account_id = body["id"].as_str().unwrap().to_string();
    assert_eq!(box_node.drain().await, 1);

    let boxed = box_node.ledger.find_account(&account_id).await.unwrap().unwrap();
    assert_eq!(boxed.status, AccountStatus::Failed);
    assert_eq!(boxed.meta.failure_server.as_deref(), Some("box"));
    assert!(boxed.meta.failure_reason.unwrap().contains("503"));
    assert_eq!(box_node.queues.failed(names::BOX_ACCOUNT_REGISTRATION).len(), 1);
    assert!(box_node.queues.waiting(names::BOX_ACCOUNT_REGISTRATION).is_empty());

    // Nothing to confirm while the account never reached VERIFICATION.
    let (status, body) = send(
        &box_node.router,
        Method::PUT,
        &format!("/api/payments/accounts/{}/verify", account_id),
        &[("x-worker-id", WORKER)],
        Some(json!({"confirm": true})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_ACCOUNT_STATUS");
}

#[tokio::test]
async fn test_invalid_registration_is_rejected_before_queueing() {
    let box_node = BoxNode::start(Arc::new(UnavailableBackend)).await;

    let (status, body) = send(
        &box_node.router,
        Method::POST,
        "/api/payments/accounts",
        &[("x-worker-id", WORKER)],
        Some(json!({"type": "bank_account", "name": "Asha", "account": {"id": "123"}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");

    let (status, _) = send(
        &box_node.router,
        Method::POST,
        "/api/payments/accounts",
        &[],
        Some(bank_registration("50100077778888")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(box_node.queues.waiting(names::BOX_ACCOUNT_REGISTRATION).is_empty());
}

#[tokio::test]
async fn test_backend_rejects_unknown_or_foreign_boxes() {
    let backend = BackendNode::start().await;
    let account = json!({
        "id": "acc-1",
        "box_id": BOX_ID,
        "worker_id": WORKER,
        "account_type": "bank_account",
        "hash": "h-1",
        "active": false,
        "status": "BOX_ACCOUNTS_QUEUE",
        "meta": {"name": "Asha", "account": {"id": "1", "ifsc": "HDFC0001234"}},
        "created_at": "2024-01-01T00:00:00Z",
        "last_updated_at": "2024-01-01T00:00:00Z"
    });

    let (status, _) = send(
        &backend.router,
        Method::POST,
        "/payments/accounts",
        &[("authorization", "Bearer wrong-token")],
        Some(account.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut foreign = account.clone();
    foreign["box_id"] = json!("box-2");
    let bearer = format!("Bearer {}", BOX_TOKEN);
    let (status, _) = send(
        &backend.router,
        Method::POST,
        "/payments/accounts",
        &[("authorization", bearer.as_str())],
        Some(foreign),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &backend.router,
        Method::POST,
        "/payments/accounts",
        &[("authorization", bearer.as_str())],
        Some(account),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "SERVER_API");
}
