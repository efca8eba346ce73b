//! Bulk payouts through the admin routes, and the ledger listings.

mod common;

use axum::http::{Method, StatusCode};
use common::{send, BackendNode};
use gigpay_backend::database::repository::{
    AccountLedger, BulkTransactionLedger, ListFilter, TransactionLedger,
};
use gigpay_backend::payments::types::{
    AccountDetails, AccountMeta, AccountRecord, AccountStatus, AccountType,
    BulkTransactionStatus, TransactionPurpose, TransactionStatus,
};
use rust_decimal::Decimal;
use serde_json::json;

const ADMIN: (&str, &str) = ("x-user-id", "admin-1");

async fn verified_account(node: &BackendNode, worker_id: &str) -> AccountRecord {
    let mut account = AccountRecord::initialised(
        "box-1",
        worker_id,
        AccountType::BankAccount,
        format!("hash-{}", worker_id),
        AccountMeta::new(
            "Worker",
            AccountDetails {
                id: "50100012345678".to_string(),
                ifsc: Some("HDFC0001234".to_string()),
            },
        ),
    );
    account.status = AccountStatus::Verified;
    account.fund_id = Some(format!("fa_{}", worker_id));
    node.ledger.insert_account(&account).await.unwrap();
    node.ledger.activate_account(&account.id).await.unwrap()
}

#[tokio::test]
async fn test_bulk_payout_pays_verified_workers_and_reports_the_rest() {
    let node = BackendNode::start().await;
    let account = verified_account(&node, "w-1").await;
    node.ledger.credit_earnings("w-1", Decimal::from(100));

    let (status, body) = send(
        &node.router,
        Method::POST,
        "/api/payments/bulk",
        &[ADMIN],
        Some(json!([
            {"workerId": "w-1", "amount": 50},
            {"workerId": "w-2", "amount": 20}
        ])),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "INITIALISED");
    assert_eq!(body["n_workers"], 2);
    assert_eq!(body["user_id"], "admin-1");
    let bulk_id = body["id"].as_str().unwrap().to_string();

    node.drain().await;

    let bulk = node
        .ledger
        .find_bulk_transaction(&bulk_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bulk.status, BulkTransactionStatus::PartialProcessed);
    assert_eq!(bulk.meta.failed_for_worker_ids, vec!["w-2".to_string()]);

    let rows = node
        .ledger
        .list_transactions(&ListFilter::for_worker("w-1", 10))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.purpose, TransactionPurpose::BulkPayment);
    assert_eq!(row.bulk_id.as_deref(), Some(bulk_id.as_str()));
    assert_eq!(row.idempotency_key(), format!("{}{}", account.hash, bulk_id));
    assert_eq!(row.amount, Decimal::from(50));
    assert_eq!(row.status, TransactionStatus::Processing);
    assert!(node
        .ledger
        .list_transactions(&ListFilter::for_worker("w-2", 10))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_bulk_payout_with_every_worker_payable_is_processed() {
    let node = BackendNode::start().await;
    verified_account(&node, "w-a").await;
    verified_account(&node, "w-b").await;

    let (status, body) = send(
        &node.router,
        Method::POST,
        "/api/payments/bulk",
        &[ADMIN],
        Some(json!([
            {"workerId": "w-a", "amount": 5},
            {"workerId": "w-b", "amount": 5}
        ])),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    node.drain().await;

    let bulk = node
        .ledger
        .find_bulk_transaction(body["id"].as_str().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bulk.status, BulkTransactionStatus::TransactionsProcessed);
    assert!(bulk.meta.failed_for_worker_ids.is_empty());
    assert_eq!(node.ledger.transaction_count(), 2);
}

#[tokio::test]
async fn test_bulk_payout_validation() {
    let node = BackendNode::start().await;

    for body in [
        json!([]),
        json!([{"workerId": "w-1", "amount": 0}]),
        json!([{"workerId": "", "amount": 5}]),
        json!([{"workerId": "w-1", "amount": 5}, {"workerId": "w-1", "amount": 7}]),
        json!([{"workerId": "w-1", "amount": 10_000_001}]),
        json!([
            {"workerId": "w-1", "amount": "79228162514264337593543950335"},
            {"workerId": "w-2", "amount": "79228162514264337593543950335"}
        ]),
    ] {
        let (status, response) = send(
            &node.router,
            Method::POST,
            "/api/payments/bulk",
            &[ADMIN],
            Some(body),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "VALIDATION_ERROR");
    }

    let (status, _) = send(
        &node.router,
        Method::POST,
        "/api/payments/bulk",
        &[],
        Some(json!([{"workerId": "w-1", "amount": 5}])),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(node.queues.waiting("bulk-transaction").is_empty());
}

#[tokio::test]
async fn test_ledger_listings_filter_by_worker() {
    let node = BackendNode::start().await;
    verified_account(&node, "w-list").await;
    verified_account(&node, "w-other").await;

    let (status, body) = send(
        &node.router,
        Method::GET,
        "/api/payments/accounts?worker_id=w-list",
        &[ADMIN],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let accounts = body.as_array().unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0]["worker_id"], "w-list");
    assert_eq!(accounts[0]["status"], "VERIFIED");

    let (status, body) = send(
        &node.router,
        Method::GET,
        "/api/payments/accounts?limit=1",
        &[ADMIN],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = send(
        &node.router,
        Method::GET,
        "/api/payments/transactions?worker_id=w-list",
        &[ADMIN],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_eligible_workers_feed_a_bulk_payout() {
    let node = BackendNode::start().await;
    let paid = verified_account(&node, "w-earned").await;
    node.ledger.credit_earnings("w-earned", Decimal::from(100));
    verified_account(&node, "w-nothing-earned").await;

    let mut unverified = AccountRecord::initialised(
        "box-1",
        "w-unverified",
        AccountType::Vpa,
        "hash-w-unverified",
        AccountMeta::new(
            "Worker",
            AccountDetails {
                id: "w-unverified@upi".to_string(),
                ifsc: None,
            },
        ),
    );
    unverified.status = AccountStatus::Verification;
    node.ledger.insert_account(&unverified).await.unwrap();
    node.ledger.credit_earnings("w-unverified", Decimal::from(40));

    let (status, eligible) = send(
        &node.router,
        Method::GET,
        "/api/payments/eligible",
        &[ADMIN],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let workers = eligible.as_array().unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0]["workerId"], "w-earned");
    assert_eq!(workers[0]["account_id"], paid.id.as_str());
    assert_eq!(workers[0]["amount"].as_str(), Some("100"));

    let (status, _) = send(
        &node.router,
        Method::POST,
        "/api/payments/bulk",
        &[ADMIN],
        Some(eligible.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    node.drain().await;

    let (_, eligible) = send(
        &node.router,
        Method::GET,
        "/api/payments/eligible",
        &[ADMIN],
        None,
    )
    .await;
    assert!(eligible.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_bulk_listing_honours_limit_and_from() {
    let node = BackendNode::start().await;
    for worker in ["w-l1", "w-l2"] {
        let (status, _) = send(
            &node.router,
            Method::POST,
            "/api/payments/bulk",
            &[ADMIN],
            Some(json!([{"workerId": worker, "amount": 5}])),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send(&node.router, Method::GET, "/api/payments/bulk", &[ADMIN], None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row["user_id"] == "admin-1"));

    let (_, body) = send(
        &node.router,
        Method::GET,
        "/api/payments/bulk?limit=1",
        &[ADMIN],
        None,
    )
    .await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = send(
        &node.router,
        Method::GET,
        "/api/payments/bulk?from=2099-01-01T00:00:00Z",
        &[ADMIN],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let (_, body) = send(
        &node.router,
        Method::GET,
        "/api/payments/bulk?from=2000-01-01T00:00:00Z",
        &[ADMIN],
        None,
    )
    .await;
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_ledger_listings_filter_by_update_time() {
    let node = BackendNode::start().await;
    verified_account(&node, "w-from").await;

    let (status, body) = send(
        &node.router,
        Method::GET,
        "/api/payments/accounts?worker_id=w-from&from=2000-01-01T00:00:00Z",
        &[ADMIN],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    for path in [
        "/api/payments/accounts?from=2099-01-01T00:00:00Z",
        "/api/payments/transactions?from=2099-01-01T00:00:00Z",
    ] {
        let (status, body) = send(&node.router, Method::GET, path, &[ADMIN], None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());
    }
}
