mod common;

#[cfg(test)]
mod webhook_tests {
    use super::common::{post_webhook, sign, webhook_body, BackendNode};
    use axum::http::StatusCode;
    use gigpay_backend::database::repository::{AccountLedger, TransactionLedger};
    use gigpay_backend::payments::types::{
        AccountDetails, AccountMeta, AccountRecord, AccountStatus, AccountType,
        TransactionPurpose, TransactionRecord, TransactionStatus,
    };
    use gigpay_backend::queue::transaction::TransactionPayload;
    use gigpay_backend::queue::QueueWrapper;
    use rust_decimal::Decimal;

    async fn paid(node: &BackendNode, worker_id: &str) -> TransactionRecord {
        node.ledger.credit_earnings(worker_id, Decimal::from(100));
        let enqueued = node
            .transaction_queue
            .enqueue(
                &format!("PAYOUT:{}", worker_id),
                TransactionPayload {
                    amount: Decimal::from(10),
                    account_id: format!("acc-{}", worker_id),
                    fund_id: format!("fa_{}", worker_id),
                    worker_id: worker_id.to_string(),
                    currency: "INR".to_string(),
                    mode: "IMPS".to_string(),
                    purpose: TransactionPurpose::Payout,
                    idempotency_key: format!("payout-{}", worker_id),
                    source_account: "2323230000000000".to_string(),
                    bulk_id: None,
                },
            )
            .await
            .unwrap();
        node.drain().await;
        stored(node, &enqueued.record.id).await
    }

    async fn stored(node: &BackendNode, id: &str) -> TransactionRecord {
        node.ledger.find_transaction(id).await.unwrap().unwrap()
    }

    /// An account waiting on its verification payout, with the payout made.
    async fn verifying(node: &BackendNode, worker_id: &str) -> (AccountRecord, TransactionRecord) {
        let mut account = AccountRecord::initialised(
            "box-1",
            worker_id,
            AccountType::Vpa,
            format!("hash-{}", worker_id),
            AccountMeta::new(
                "Worker",
                AccountDetails {
                    id: format!("{}@upi", worker_id),
                    ifsc: None,
                },
            ),
        );
        account.status = AccountStatus::TransactionQueue;
        node.ledger.insert_account(&account).await.unwrap();

        let enqueued = node
            .transaction_queue
            .enqueue(
                &format!("VERIFICATION:{}", worker_id),
                TransactionPayload {
                    amount: Decimal::ONE,
                    account_id: account.id.clone(),
                    fund_id: format!("fa_{}", worker_id),
                    worker_id: worker_id.to_string(),
                    currency: "INR".to_string(),
                    mode: "UPI".to_string(),
                    purpose: TransactionPurpose::Verification,
                    idempotency_key: format!("verification-{}", account.hash),
                    source_account: "2323230000000000".to_string(),
                    bulk_id: None,
                },
            )
            .await
            .unwrap();
        node.drain().await;
        (account, stored(node, &enqueued.record.id).await)
    }

    #[tokio::test]
    async fn test_tampered_body_is_rejected_before_the_ledger() {
        let node = BackendNode::start().await;
        let signed = webhook_body("pout_1", "processed", None);
        let signature = sign(&signed);
        let tampered = webhook_body("pout_1", "reversed", None);
        let before = node.ledger.operation_count();

        assert_eq!(
            post_webhook(&node.router, &tampered, Some(&signature)).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            post_webhook(&node.router, &signed, None).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(node.ledger.operation_count(), before);
    }

    #[tokio::test]
    async fn test_unknown_payout_is_acknowledged() {
        let node = BackendNode::start().await;
        assert_eq!(
            node.webhook("pout_missing", "processed", None).await,
            StatusCode::OK
        );
        assert_eq!(node.ledger.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_processed_payout_is_final() {
        let node = BackendNode::start().await;
        let record = paid(&node, "w-final").await;
        let payout_id = record.payout_id.clone().unwrap();

        node.webhook(&payout_id, "processed", Some("UTR77")).await;
        node.webhook(&payout_id, "reversed", None).await;

        let record = stored(&node, &record.id).await;
        assert_eq!(record.status, TransactionStatus::Processed);
        assert_eq!(record.utr.as_deref(), Some("UTR77"));
        assert_eq!(record.meta.utr.as_deref(), Some("UTR77"));
    }

    #[tokio::test]
    async fn test_late_queued_event_is_ignored() {
        let node = BackendNode::start().await;
        let record = paid(&node, "w-late").await;
        assert_eq!(record.status, TransactionStatus::Processing);

        let status = node
            .webhook(record.payout_id.as_deref().unwrap(), "queued", None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            stored(&node, &record.id).await.status,
            TransactionStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_processed_verification_activates_the_account() {
        let node = BackendNode::start().await;
        let (account, record) = verifying(&node, "w-ver").await;
        assert_eq!(
            node.ledger.find_account(&account.id).await.unwrap().unwrap().status,
            AccountStatus::Verification
        );

        node.webhook(record.payout_id.as_deref().unwrap(), "processed", Some("UTR1"))
            .await;

        let account = node.ledger.find_account(&account.id).await.unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Verified);
        assert!(account.active);
        let active = node.ledger.find_active_account("w-ver").await.unwrap().unwrap();
        assert_eq!(active.id, account.id);
    }

    #[tokio::test]
    async fn test_reversed_verification_fails_confirmation() {
        let node = BackendNode::start().await;
        let (account, record) = verifying(&node, "w-rev").await;

        node.webhook(record.payout_id.as_deref().unwrap(), "reversed", None)
            .await;

        assert_eq!(
            stored(&node, &record.id).await.status,
            TransactionStatus::Reversed
        );
        let account = node.ledger.find_account(&account.id).await.unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::ConfirmationFailed);
        assert!(!account.active);
    }
}
