//! Shared fixtures for the integration tests: an in-process gateway, a box
//! and a backend node wired over memory ledgers and memory queues.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use gigpay_backend::api::{self, AdminState, BoxApiState, BoxSyncState, WebhookState};
use gigpay_backend::config::{BalanceLockMode, BoxRegistry, PayoutConfig, QueueConfig};
use gigpay_backend::database::memory::MemoryLedger;
use gigpay_backend::database::Ledgers;
use gigpay_backend::payments::error::{GatewayError, GatewayResult};
use gigpay_backend::payments::gateway::{
    ContactRequest, ContactResponse, FundAccountRequest, FundAccountResponse, PayoutEntity,
    PayoutGateway, PayoutRequest,
};
use gigpay_backend::payments::types::{AccountRecord, VerifyAccountRequest};
use gigpay_backend::payments::utils::sign_hmac_sha256_hex;
use gigpay_backend::queue::bulk_transaction::BulkTransactionQueue;
use gigpay_backend::queue::memory::MemoryQueueBackend;
use gigpay_backend::queue::registration::RegistrationQueue;
use gigpay_backend::queue::server_registration::ServerRegistrationQueue;
use gigpay_backend::queue::transaction::TransactionQueue;
use gigpay_backend::queue::verify_account::VerifyAccountQueue;
use gigpay_backend::queue::{names, NamedQueue, QueueBackend};
use gigpay_backend::services::{
    BackendApi, BackendClientError, BalanceService, BoxCredentials, LedgerReconciler,
    WebhookProcessor,
};
use gigpay_backend::workers::box_registration::BoxRegistrationProcessor;
use gigpay_backend::workers::box_verification::BoxVerificationProcessor;
use gigpay_backend::workers::bulk_transaction_processor::BulkTransactionProcessor;
use gigpay_backend::workers::server_registration::ServerRegistrationProcessor;
use gigpay_backend::workers::transaction_processor::TransactionProcessor;
use gigpay_backend::workers::QueueConsumer;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

pub const BOX_ID: &str = "box-1";
pub const BOX_TOKEN: &str = "box-1-token";
pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

pub fn payout_config() -> PayoutConfig {
    PayoutConfig {
        currency: "INR".to_string(),
        mode: "IMPS".to_string(),
        verification_amount: Decimal::ONE,
        source_account: "2323230000000000".to_string(),
        balance_lock_mode: BalanceLockMode::PerWorker,
    }
}

pub fn queue_config() -> QueueConfig {
    QueueConfig {
        concurrency: 8,
        poll_timeout_secs: 1,
        ..QueueConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Gateway double that deduplicates on the idempotency key the way the real
/// gateway does.
pub struct MockGateway {
    payouts: Mutex<HashMap<String, PayoutEntity>>,
    payout_status: Mutex<String>,
    fail_payouts: AtomicBool,
    contact_calls: AtomicUsize,
    fund_account_calls: AtomicUsize,
    payout_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            payouts: Mutex::new(HashMap::new()),
            payout_status: Mutex::new("processing".to_string()),
            fail_payouts: AtomicBool::new(false),
            contact_calls: AtomicUsize::new(0),
            fund_account_calls: AtomicUsize::new(0),
            payout_calls: AtomicUsize::new(0),
        }
    }

    /// Status reported by newly created payouts.
    pub fn set_payout_status(&self, status: &str) {
        *self.payout_status.lock().unwrap() = status.to_string();
    }

    pub fn set_fail_payouts(&self, fail: bool) {
        self.fail_payouts.store(fail, Ordering::SeqCst);
    }

    /// Change what `fetch_payout` reports for a payout.
    pub fn settle(&self, payout_id: &str, status: &str, utr: Option<&str>) {
        let mut payouts = self.payouts.lock().unwrap();
        if let Some(payout) = payouts.values_mut().find(|p| p.id == payout_id) {
            payout.status = status.to_string();
            payout.utr = utr.map(str::to_string);
        }
    }

    pub fn payout_for_key(&self, key: &str) -> Option<PayoutEntity> {
        self.payouts.lock().unwrap().get(key).cloned()
    }

    pub fn distinct_payouts(&self) -> usize {
        self.payouts.lock().unwrap().len()
    }

    pub fn payout_calls(&self) -> usize {
        self.payout_calls.load(Ordering::SeqCst)
    }

    pub fn contact_calls(&self) -> usize {
        self.contact_calls.load(Ordering::SeqCst)
    }

    pub fn fund_account_calls(&self) -> usize {
        self.fund_account_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PayoutGateway for MockGateway {
    async fn create_contact(
        &self,
        _request: &ContactRequest,
        idempotency_key: &str,
    ) -> GatewayResult<ContactResponse> {
        self.contact_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ContactResponse {
            id: format!("cont_{}", idempotency_key),
        })
    }

    async fn create_fund_account(
        &self,
        _request: &FundAccountRequest,
        idempotency_key: &str,
    ) -> GatewayResult<FundAccountResponse> {
        self.fund_account_calls.fetch_add(1, Ordering::SeqCst);
        Ok(FundAccountResponse {
            id: format!("fa_{}", idempotency_key),
            active: Some(true),
        })
    }

    async fn create_payout(
        &self,
        request: &PayoutRequest,
        idempotency_key: &str,
    ) -> GatewayResult<PayoutEntity> {
        self.payout_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_payouts.load(Ordering::SeqCst) {
            return Err(GatewayError::RequestError {
                status: 400,
                code: Some("BAD_REQUEST_ERROR".to_string()),
                description: "The fund account is not active".to_string(),
            });
        }

        let status = self.payout_status.lock().unwrap().clone();
        let mut payouts = self.payouts.lock().unwrap();
        let count = payouts.len();
        let payout = payouts
            .entry(idempotency_key.to_string())
            .or_insert_with(|| PayoutEntity {
                id: format!("pout_{}", count + 1),
                entity: Some("payout".to_string()),
                fund_account_id: Some(request.fund_account_id.clone()),
                amount: Some(request.amount),
                currency: Some(request.currency.clone()),
                status,
                mode: Some(request.mode.clone()),
                purpose: Some(request.purpose.clone()),
                reference_id: request.reference_id.clone(),
                fees: Some(0),
                tax: Some(0),
                ..Default::default()
            });
        Ok(payout.clone())
    }

    async fn fetch_payout(&self, payout_id: &str) -> GatewayResult<PayoutEntity> {
        self.payouts
            .lock()
            .unwrap()
            .values()
            .find(|p| p.id == payout_id)
            .cloned()
            .ok_or_else(|| GatewayError::RequestError {
                status: 404,
                code: None,
                description: format!("payout {} not found", payout_id),
            })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

pub fn webhook_body(payout_id: &str, status: &str, utr: Option<&str>) -> String {
    json!({
        "entity": "event",
        "event": format!("payout.{}", status),
        "payload": {"payout": {"entity": {
            "id": payout_id,
            "entity": "payout",
            "status": status,
            "utr": utr,
        }}}
    })
    .to_string()
}

pub fn sign(body: &str) -> String {
    sign_hmac_sha256_hex(body.as_bytes(), WEBHOOK_SECRET).unwrap()
}

pub async fn post_webhook(router: &Router, body: &str, signature: Option<&str>) -> StatusCode {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/webhooks/payouts")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    let response = router
        .clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    response.status()
}

// ---------------------------------------------------------------------------
// Backend node
// ---------------------------------------------------------------------------

pub struct BackendNode {
    pub ledger: Arc<MemoryLedger>,
    pub queues: Arc<MemoryQueueBackend>,
    pub gateway: Arc<MockGateway>,
    pub router: Router,
    pub transaction_queue: Arc<TransactionQueue>,
    pub reconciler: Arc<LedgerReconciler>,
    pub transaction_processor: Arc<TransactionProcessor>,
    server_registration: QueueConsumer<ServerRegistrationProcessor>,
    transactions: QueueConsumer<TransactionProcessor>,
    bulk: QueueConsumer<BulkTransactionProcessor>,
}

impl BackendNode {
    pub async fn start() -> Self {
        Self::start_with(payout_config()).await
    }

    pub async fn start_with(payouts: PayoutConfig) -> Self {
        let ledger = Arc::new(MemoryLedger::new());
        let ledgers = Ledgers::memory(ledger.clone());
        let queues = Arc::new(MemoryQueueBackend::new());
        let backend: Arc<dyn QueueBackend> = queues.clone();
        let gateway = Arc::new(MockGateway::new());
        let config = queue_config();

        let server_queue = NamedQueue::initialize(backend.clone(), names::SERVER_ACCOUNT_REGISTRATION)
            .await
            .unwrap();
        let transaction_named = NamedQueue::initialize(backend.clone(), names::TRANSACTION)
            .await
            .unwrap();
        let bulk_named = NamedQueue::initialize(backend, names::BULK_TRANSACTION)
            .await
            .unwrap();

        let transaction_queue = Arc::new(TransactionQueue::new(
            transaction_named.clone(),
            ledgers.transactions.clone(),
        ));
        let balance = Arc::new(BalanceService::new(
            ledgers.transactions.clone(),
            ledgers.earnings.clone(),
            payouts.balance_lock_mode,
        ));
        let transaction_processor = Arc::new(TransactionProcessor::new(
            ledgers.accounts.clone(),
            ledgers.transactions.clone(),
            gateway.clone(),
            balance,
        ));
        let reconciler = Arc::new(LedgerReconciler::new(
            ledgers.accounts.clone(),
            ledgers.transactions.clone(),
        ));

        let server_registration = QueueConsumer::new(
            server_queue.clone(),
            Arc::new(ServerRegistrationProcessor::new(
                ledgers.accounts.clone(),
                gateway.clone(),
                transaction_queue.clone(),
                payouts.clone(),
            )),
            &config,
        );
        let transactions =
            QueueConsumer::new(transaction_named, transaction_processor.clone(), &config);
        let bulk = QueueConsumer::new(
            bulk_named.clone(),
            Arc::new(BulkTransactionProcessor::new(
                ledgers.accounts.clone(),
                ledgers.bulk_transactions.clone(),
                transaction_queue.clone(),
                payouts,
            )),
            &config,
        );

        let routes = api::backend_routes(
            Arc::new(BoxSyncState {
                accounts: ledgers.accounts.clone(),
                registration: Arc::new(ServerRegistrationQueue::new(
                    server_queue,
                    ledgers.accounts.clone(),
                )),
                boxes: BoxRegistry::default().with_box(BOX_ID, BOX_TOKEN),
            }),
            Arc::new(AdminState {
                accounts: ledgers.accounts.clone(),
                transactions: ledgers.transactions.clone(),
                bulk_transactions: ledgers.bulk_transactions.clone(),
                earnings: ledgers.earnings.clone(),
                bulk: Arc::new(BulkTransactionQueue::new(
                    bulk_named,
                    ledgers.bulk_transactions.clone(),
                )),
            }),
            Arc::new(WebhookState {
                processor: Arc::new(WebhookProcessor::new(reconciler.clone(), WEBHOOK_SECRET)),
                signature_header: SIGNATURE_HEADER.to_string(),
            }),
        );

        Self {
            ledger,
            queues,
            gateway,
            router: api::with_common_layers(routes),
            transaction_queue,
            reconciler,
            transaction_processor,
            server_registration,
            transactions,
            bulk,
        }
    }

    /// Run every backend consumer until no queue has work left.
    pub async fn drain(&self) -> usize {
        let mut total = 0;
        loop {
            let handled = self.server_registration.run_until_idle().await.unwrap()
                + self.bulk.run_until_idle().await.unwrap()
                + self.transactions.run_until_idle().await.unwrap();
            if handled == 0 {
                return total;
            }
            total += handled;
        }
    }

    pub async fn webhook(&self, payout_id: &str, status: &str, utr: Option<&str>) -> StatusCode {
        let body = webhook_body(payout_id, status, utr);
        post_webhook(&self.router, &body, Some(&sign(&body))).await
    }
}

/// `BackendApi` that calls a backend router in process.
#[derive(Clone)]
pub struct RouterBackend {
    router: Router,
}

impl RouterBackend {
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    async fn call(
        &self,
        credentials: &BoxCredentials,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Result<AccountRecord, BackendClientError> {
        let bearer = format!("Bearer {}", credentials.id_token);
        let (status, value) = send(
            &self.router,
            method,
            uri,
            &[(header::AUTHORIZATION.as_str(), bearer.as_str())],
            body,
        )
        .await;
        if !status.is_success() {
            return Err(BackendClientError::Status {
                status: status.as_u16(),
                message: value["message"].as_str().unwrap_or_default().to_string(),
            });
        }
        serde_json::from_value(value).map_err(|e| BackendClientError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl BackendApi for RouterBackend {
    async fn register_account(
        &self,
        credentials: &BoxCredentials,
        account: &AccountRecord,
    ) -> Result<AccountRecord, BackendClientError> {
        self.call(
            credentials,
            Method::POST,
            "/payments/accounts",
            Some(serde_json::to_value(account).unwrap()),
        )
        .await
    }

    async fn verify_account(
        &self,
        credentials: &BoxCredentials,
        account_id: &str,
        request: &VerifyAccountRequest,
    ) -> Result<AccountRecord, BackendClientError> {
        self.call(
            credentials,
            Method::PUT,
            &format!("/payments/accounts/{}/verify", account_id),
            Some(serde_json::to_value(request).unwrap()),
        )
        .await
    }

    async fn fetch_account(
        &self,
        credentials: &BoxCredentials,
        account_id: &str,
    ) -> Result<AccountRecord, BackendClientError> {
        self.call(
            credentials,
            Method::GET,
            &format!("/payments/accounts/{}", account_id),
            None,
        )
        .await
    }
}

/// `BackendApi` whose every call fails with a 503.
pub struct UnavailableBackend;

#[async_trait]
impl BackendApi for UnavailableBackend {
    async fn register_account(
        &self,
        _credentials: &BoxCredentials,
        _account: &AccountRecord,
    ) -> Result<AccountRecord, BackendClientError> {
        Err(unavailable())
    }

    async fn verify_account(
        &self,
        _credentials: &BoxCredentials,
        _account_id: &str,
        _request: &VerifyAccountRequest,
    ) -> Result<AccountRecord, BackendClientError> {
        Err(unavailable())
    }

    async fn fetch_account(
        &self,
        _credentials: &BoxCredentials,
        _account_id: &str,
    ) -> Result<AccountRecord, BackendClientError> {
        Err(unavailable())
    }
}

fn unavailable() -> BackendClientError {
    BackendClientError::Status {
        status: 503,
        message: "backend down".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Box node
// ---------------------------------------------------------------------------

pub struct BoxNode {
    pub ledger: Arc<MemoryLedger>,
    pub queues: Arc<MemoryQueueBackend>,
    pub router: Router,
    registration: QueueConsumer<BoxRegistrationProcessor>,
    verification: QueueConsumer<BoxVerificationProcessor>,
}

impl BoxNode {
    pub async fn start(backend: Arc<dyn BackendApi>) -> Self {
        let ledger = Arc::new(MemoryLedger::new());
        let ledgers = Ledgers::memory(ledger.clone());
        let queues = Arc::new(MemoryQueueBackend::new());
        let queue_backend: Arc<dyn QueueBackend> = queues.clone();
        let config = queue_config();
        let credentials = BoxCredentials {
            box_id: BOX_ID.to_string(),
            id_token: BOX_TOKEN.to_string(),
        };

        let registration_named =
            NamedQueue::initialize(queue_backend.clone(), names::BOX_ACCOUNT_REGISTRATION)
                .await
                .unwrap();
        let verify_named = NamedQueue::initialize(queue_backend, names::BOX_VERIFY_ACCOUNT)
            .await
            .unwrap();

        let registration = QueueConsumer::new(
            registration_named.clone(),
            Arc::new(BoxRegistrationProcessor::new(
                ledgers.accounts.clone(),
                backend.clone(),
                credentials.clone(),
            )),
            &config,
        );
        let verification = QueueConsumer::new(
            verify_named.clone(),
            Arc::new(BoxVerificationProcessor::new(
                ledgers.accounts.clone(),
                backend.clone(),
                credentials.clone(),
            )),
            &config,
        );

        let routes = api::box_routes(Arc::new(BoxApiState {
            accounts: ledgers.accounts.clone(),
            registration: Arc::new(RegistrationQueue::new(
                registration_named,
                ledgers.accounts.clone(),
                BOX_ID,
            )),
            verification: Arc::new(VerifyAccountQueue::new(verify_named, ledgers.accounts)),
            backend,
            credentials,
        }));

        Self {
            ledger,
            queues,
            router: api::with_common_layers(routes),
            registration,
            verification,
        }
    }

    pub async fn drain(&self) -> usize {
        self.registration.run_until_idle().await.unwrap()
            + self.verification.run_until_idle().await.unwrap()
    }
}

/// Worker registration body for a bank account.
pub fn bank_registration(account_number: &str) -> Value {
    json!({
        "type": "bank_account",
        "name": "Asha Devi",
        "account": {"id": account_number, "ifsc": "HDFC0001234"}
    })
}
