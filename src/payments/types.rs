use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use uuid::Uuid;

use crate::payments::gateway::PayoutEntity;

pub const META_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Account status
// ---------------------------------------------------------------------------

/// Registration state of a worker's payout destination.
///
/// The forward path is ordered; `ConfirmationFailed`, `Rejected`, `Failed`
/// and `Invalid` are sinks that can be entered from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Uninitialised,
    Initialised,
    BoxAccountsQueue,
    ServerApi,
    ServerAccountsQueue,
    TransactionQueue,
    TransactionCreated,
    Verification,
    ConfirmationReceived,
    Verified,
    ConfirmationFailed,
    Rejected,
    Failed,
    Invalid,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Uninitialised => "UNINITIALISED",
            AccountStatus::Initialised => "INITIALISED",
            AccountStatus::BoxAccountsQueue => "BOX_ACCOUNTS_QUEUE",
            AccountStatus::ServerApi => "SERVER_API",
            AccountStatus::ServerAccountsQueue => "SERVER_ACCOUNTS_QUEUE",
            AccountStatus::TransactionQueue => "TRANSACTION_QUEUE",
            AccountStatus::TransactionCreated => "TRANSACTION_CREATED",
            AccountStatus::Verification => "VERIFICATION",
            AccountStatus::ConfirmationReceived => "CONFIRMATION_RECEIVED",
            AccountStatus::Verified => "VERIFIED",
            AccountStatus::ConfirmationFailed => "CONFIRMATION_FAILED",
            AccountStatus::Rejected => "REJECTED",
            AccountStatus::Failed => "FAILED",
            AccountStatus::Invalid => "INVALID",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "UNINITIALISED" => Some(AccountStatus::Uninitialised),
            "INITIALISED" => Some(AccountStatus::Initialised),
            "BOX_ACCOUNTS_QUEUE" => Some(AccountStatus::BoxAccountsQueue),
            "SERVER_API" => Some(AccountStatus::ServerApi),
            "SERVER_ACCOUNTS_QUEUE" => Some(AccountStatus::ServerAccountsQueue),
            "TRANSACTION_QUEUE" => Some(AccountStatus::TransactionQueue),
            "TRANSACTION_CREATED" => Some(AccountStatus::TransactionCreated),
            "VERIFICATION" => Some(AccountStatus::Verification),
            "CONFIRMATION_RECEIVED" => Some(AccountStatus::ConfirmationReceived),
            "VERIFIED" => Some(AccountStatus::Verified),
            "CONFIRMATION_FAILED" => Some(AccountStatus::ConfirmationFailed),
            "REJECTED" => Some(AccountStatus::Rejected),
            "FAILED" => Some(AccountStatus::Failed),
            "INVALID" => Some(AccountStatus::Invalid),
            _ => None,
        }
    }

    /// Position on the forward path; sinks have none.
    pub fn forward_rank(&self) -> Option<u8> {
        match self {
            AccountStatus::Uninitialised => Some(0),
            AccountStatus::Initialised => Some(1),
            AccountStatus::BoxAccountsQueue => Some(2),
            AccountStatus::ServerApi => Some(3),
            AccountStatus::ServerAccountsQueue => Some(4),
            AccountStatus::TransactionQueue => Some(5),
            AccountStatus::TransactionCreated => Some(6),
            AccountStatus::Verification => Some(7),
            AccountStatus::ConfirmationReceived => Some(8),
            AccountStatus::Verified => Some(9),
            AccountStatus::ConfirmationFailed
            | AccountStatus::Rejected
            | AccountStatus::Failed
            | AccountStatus::Invalid => None,
        }
    }

    pub fn is_sink(&self) -> bool {
        self.forward_rank().is_none()
    }

    /// `Verified` ends the forward path; together with the sinks no further
    /// transition is accepted.
    pub fn is_terminal(&self) -> bool {
        self.is_sink() || *self == AccountStatus::Verified
    }

    pub fn can_transition_to(&self, next: &AccountStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.forward_rank(), next.forward_rank()) {
            (_, None) => true,
            (Some(current), Some(next)) => next > current,
            (None, Some(_)) => false,
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Transaction status
// ---------------------------------------------------------------------------

/// Payout status. Gateway states use the gateway's lowercase names; the
/// `created` and `failed_*_transaction` states are written only by this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Created,
    Queued,
    Pending,
    Processing,
    Processed,
    Rejected,
    Cancelled,
    Reversed,
    Failed,
    FailedBeforeTransaction,
    FailedAfterTransaction,
}

pub const FINAL_TRANSACTION_STATUSES: [TransactionStatus; 7] = [
    TransactionStatus::Processed,
    TransactionStatus::Rejected,
    TransactionStatus::Cancelled,
    TransactionStatus::Reversed,
    TransactionStatus::Failed,
    TransactionStatus::FailedBeforeTransaction,
    TransactionStatus::FailedAfterTransaction,
];

/// Outcome of comparing a ledger status with an incoming status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    Apply,
    IgnoreFinal,
    IgnoreStale,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Created => "created",
            TransactionStatus::Queued => "queued",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Processed => "processed",
            TransactionStatus::Rejected => "rejected",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Reversed => "reversed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::FailedBeforeTransaction => "failed_before_transaction",
            TransactionStatus::FailedAfterTransaction => "failed_after_transaction",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "created" => Some(TransactionStatus::Created),
            "queued" => Some(TransactionStatus::Queued),
            "pending" => Some(TransactionStatus::Pending),
            "processing" => Some(TransactionStatus::Processing),
            "processed" => Some(TransactionStatus::Processed),
            "rejected" => Some(TransactionStatus::Rejected),
            "cancelled" => Some(TransactionStatus::Cancelled),
            "reversed" => Some(TransactionStatus::Reversed),
            "failed" => Some(TransactionStatus::Failed),
            "failed_before_transaction" => Some(TransactionStatus::FailedBeforeTransaction),
            "failed_after_transaction" => Some(TransactionStatus::FailedAfterTransaction),
            _ => None,
        }
    }

    pub fn is_final(&self) -> bool {
        FINAL_TRANSACTION_STATUSES.contains(self)
    }

    pub fn is_failure(&self) -> bool {
        self.is_final() && *self != TransactionStatus::Processed
    }

    /// Whether the amount is held against the worker's earnings. Rows where
    /// no money could have moved release their reservation.
    pub fn counts_against_balance(&self) -> bool {
        !matches!(
            self,
            TransactionStatus::FailedBeforeTransaction
                | TransactionStatus::Rejected
                | TransactionStatus::Cancelled
                | TransactionStatus::Reversed
                | TransactionStatus::Failed
        )
    }

    pub fn update_decision(&self, incoming: TransactionStatus) -> StatusUpdate {
        if self.is_final() {
            return StatusUpdate::IgnoreFinal;
        }
        if *self == TransactionStatus::Processing && incoming == TransactionStatus::Queued {
            return StatusUpdate::IgnoreStale;
        }
        StatusUpdate::Apply
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionPurpose {
    Verification,
    BulkPayment,
    Payout,
}

impl TransactionPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionPurpose::Verification => "VERIFICATION",
            TransactionPurpose::BulkPayment => "BULK_PAYMENT",
            TransactionPurpose::Payout => "PAYOUT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "VERIFICATION" => Some(TransactionPurpose::Verification),
            "BULK_PAYMENT" => Some(TransactionPurpose::BulkPayment),
            "PAYOUT" => Some(TransactionPurpose::Payout),
            _ => None,
        }
    }

    pub fn is_verification(&self) -> bool {
        *self == TransactionPurpose::Verification
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    BankAccount,
    Vpa,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::BankAccount => "bank_account",
            AccountType::Vpa => "vpa",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bank_account" => Some(AccountType::BankAccount),
            "vpa" => Some(AccountType::Vpa),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkTransactionStatus {
    Initialised,
    ServerBulkTransactionQueue,
    TransactionsProcessed,
    PartialProcessed,
    Failed,
}

impl BulkTransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkTransactionStatus::Initialised => "INITIALISED",
            BulkTransactionStatus::ServerBulkTransactionQueue => "SERVER_BULK_TRANSACTION_QUEUE",
            BulkTransactionStatus::TransactionsProcessed => "TRANSACTIONS_PROCESSED",
            BulkTransactionStatus::PartialProcessed => "PARTIAL_PROCESSED",
            BulkTransactionStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "INITIALISED" => Some(BulkTransactionStatus::Initialised),
            "SERVER_BULK_TRANSACTION_QUEUE" => Some(BulkTransactionStatus::ServerBulkTransactionQueue),
            "TRANSACTIONS_PROCESSED" => Some(BulkTransactionStatus::TransactionsProcessed),
            "PARTIAL_PROCESSED" => Some(BulkTransactionStatus::PartialProcessed),
            "FAILED" => Some(BulkTransactionStatus::Failed),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

fn merge_opt<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) {
    if let Some(value) = incoming {
        *slot = Some(value.clone());
    }
}

fn default_meta_version() -> u32 {
    META_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountDetails {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ifsc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountMeta {
    pub name: String,
    pub account: AccountDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl AccountMeta {
    pub fn new(name: impl Into<String>, account: AccountDetails) -> Self {
        Self {
            name: name.into(),
            account,
            failure_server: None,
            failure_source: None,
            failure_reason: None,
            extra: Map::new(),
        }
    }

    pub fn record_failure(&mut self, server: &str, source: &str, reason: impl Into<String>) {
        self.failure_server = Some(server.to_string());
        self.failure_source = Some(source.to_string());
        self.failure_reason = Some(reason.into());
    }
}

/// Transaction metadata. Gateway fields accumulate over the row's lifetime:
/// merges only ever add or replace keys with present values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionMeta {
    #[serde(default = "default_meta_version")]
    pub version: u32,
    pub idempotency_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fees: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_source: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl TransactionMeta {
    pub fn new(idempotency_key: impl Into<String>) -> Self {
        Self {
            version: META_VERSION,
            idempotency_key: idempotency_key.into(),
            entity: None,
            notes: None,
            fees: None,
            tax: None,
            reference_id: None,
            narration: None,
            batch_id: None,
            failure_reason: None,
            created_at: None,
            utr: None,
            failure_server: None,
            failure_source: None,
            extra: Map::new(),
        }
    }

    /// Merge the extra fields of a payout creation response.
    pub fn absorb_payout(&mut self, payout: &PayoutEntity) {
        merge_opt(&mut self.entity, &payout.entity);
        merge_opt(&mut self.notes, &payout.notes);
        merge_opt(&mut self.fees, &payout.fees);
        merge_opt(&mut self.tax, &payout.tax);
        merge_opt(&mut self.reference_id, &payout.reference_id);
        merge_opt(&mut self.narration, &payout.narration);
        merge_opt(&mut self.batch_id, &payout.batch_id);
        merge_opt(&mut self.failure_reason, &payout.failure_reason);
        merge_opt(&mut self.created_at, &payout.created_at);
        merge_opt(&mut self.utr, &payout.utr);
    }

    /// Merge the fields carried by a status callback.
    pub fn absorb_status_update(&mut self, payout: &PayoutEntity) {
        merge_opt(&mut self.failure_reason, &payout.failure_reason);
        merge_opt(&mut self.utr, &payout.utr);
    }

    pub fn record_failure(&mut self, server: &str, source: &str, reason: impl Into<String>) {
        self.failure_server = Some(server.to_string());
        self.failure_source = Some(source.to_string());
        self.failure_reason = Some(reason.into());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkTransactionMeta {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_for_worker_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Ledger records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: String,
    pub box_id: String,
    pub worker_id: String,
    pub account_type: AccountType,
    pub hash: String,
    #[serde(default)]
    pub fund_id: Option<String>,
    pub active: bool,
    pub status: AccountStatus,
    pub meta: AccountMeta,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl AccountRecord {
    pub fn initialised(
        box_id: impl Into<String>,
        worker_id: impl Into<String>,
        account_type: AccountType,
        hash: impl Into<String>,
        meta: AccountMeta,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            box_id: box_id.into(),
            worker_id: worker_id.into(),
            account_type,
            hash: hash.into(),
            fund_id: None,
            active: false,
            status: AccountStatus::Initialised,
            meta,
            created_at: now,
            last_updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub amount: Decimal,
    pub currency: String,
    pub account_id: String,
    pub worker_id: String,
    #[serde(default)]
    pub bulk_id: Option<String>,
    pub source_account: String,
    pub purpose: TransactionPurpose,
    pub mode: String,
    pub status: TransactionStatus,
    #[serde(default)]
    pub payout_id: Option<String>,
    #[serde(default)]
    pub utr: Option<String>,
    pub meta: TransactionMeta,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn idempotency_key(&self) -> &str {
        &self.meta.idempotency_key
    }

    /// Reflect a payout creation response. The status only moves when the
    /// current ledger status accepts it.
    pub fn apply_payout(&mut self, payout: &PayoutEntity) {
        self.payout_id = Some(payout.id.clone());
        if payout.utr.is_some() {
            self.utr = payout.utr.clone();
        }
        self.meta.absorb_payout(payout);
        if let Some(incoming) = payout.transaction_status() {
            if self.status.update_decision(incoming) == StatusUpdate::Apply {
                self.status = incoming;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkPaymentsTransactionRecord {
    pub id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub n_workers: i32,
    pub status: BulkTransactionStatus,
    #[serde(default)]
    pub meta: BulkTransactionMeta,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Wire types shared by box and backend
// ---------------------------------------------------------------------------

/// One item of a bulk payout request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
    #[serde(rename = "workerId")]
    pub worker_id: String,
    pub amount: Decimal,
}

/// Largest single payout accepted, in rupees.
pub const MAX_PAYOUT_AMOUNT: Decimal = Decimal::from_parts(10_000_000, 0, 0, false, 0);

/// Most workers one bulk request may pay.
pub const MAX_BULK_WORKERS: usize = 1000;

/// Total of a batch, or `None` when it does not fit a `Decimal`.
pub fn bulk_total(requests: &[TransactionRequest]) -> Option<Decimal> {
    requests
        .iter()
        .try_fold(Decimal::ZERO, |total, request| total.checked_add(request.amount))
}

/// A worker who can be paid now, and how much.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibleWorker {
    #[serde(rename = "workerId")]
    pub worker_id: String,
    pub account_id: String,
    pub amount: Decimal,
}

/// Body of `PUT /payments/accounts/{id}/verify`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyAccountRequest {
    #[serde(rename = "workerId")]
    pub worker_id: String,
    pub confirm: bool,
}
