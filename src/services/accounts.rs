//! Payout account registration helpers shared by box and backend.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{AccountLedger, LedgerResult};
use crate::error::AppError;
use crate::payments::account_status::{advance, AccountEvent};
use crate::payments::error::GatewayError;
use crate::payments::types::{
    AccountDetails, AccountMeta, AccountRecord, AccountStatus, AccountType,
};
use crate::queue::QueueError;
use crate::services::backend_client::BackendClientError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

/// Body of a worker's account registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub name: String,
    pub account: AccountDetails,
}

impl RegistrationRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::missing_field("name"));
        }
        if self.account.id.trim().is_empty() {
            return Err(AppError::missing_field("account.id"));
        }
        match self.account_type {
            AccountType::BankAccount => {
                let ifsc = self.account.ifsc.as_deref().unwrap_or("").trim();
                if ifsc.is_empty() {
                    return Err(AppError::missing_field("account.ifsc"));
                }
                if ifsc.len() != 11 || !ifsc.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(AppError::invalid_field(
                        "account.ifsc",
                        "IFSC must be 11 alphanumeric characters",
                    ));
                }
            }
            AccountType::Vpa => {
                if !self.account.id.contains('@') {
                    return Err(AppError::invalid_field(
                        "account.id",
                        "VPA must look like name@bank",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Deduplication hash of a worker's payout destination.
pub fn account_hash(worker_id: &str, account_id: &str, ifsc: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(worker_id.as_bytes());
    hasher.update(b"|");
    hasher.update(account_id.as_bytes());
    hasher.update(b"|");
    hasher.update(ifsc.unwrap_or("").to_uppercase().as_bytes());
    hex::encode(hasher.finalize())
}

/// Payout mode for an account. UPI addresses can only be paid over UPI.
pub fn payout_mode_for(account_type: AccountType, default_mode: &str) -> String {
    match account_type {
        AccountType::Vpa => "UPI".to_string(),
        AccountType::BankAccount => default_mode.to_string(),
    }
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] DatabaseError),

    #[error("backend call failed: {0}")]
    Backend(#[from] BackendClientError),

    #[error("gateway call failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("account {account_id} is missing {field}")]
    Incomplete { account_id: String, field: String },
}

impl RegistrationError {
    /// Reason stored in the account's failure metadata.
    pub fn failure_reason(&self) -> String {
        match self {
            RegistrationError::Gateway(err) => err.failure_reason(),
            other => other.to_string(),
        }
    }
}

pub async fn load_account(
    accounts: &dyn AccountLedger,
    account_id: &str,
) -> Result<AccountRecord, RegistrationError> {
    accounts
        .find_account(account_id)
        .await?
        .ok_or_else(|| RegistrationError::AccountNotFound(account_id.to_string()))
}

/// Attempts at a conditional status write before giving up on a row that
/// keeps changing underneath us.
const STATUS_WRITE_ATTEMPTS: usize = 5;

/// Outcome of [`transition_account`].
#[derive(Debug, Clone)]
pub enum Transition {
    Moved {
        from: AccountStatus,
        record: AccountRecord,
    },
    /// The decision was to leave the stored row as it is.
    Kept(AccountRecord),
}

impl Transition {
    pub fn into_record(self) -> AccountRecord {
        match self {
            Transition::Moved { record, .. } | Transition::Kept(record) => record,
        }
    }

    pub fn moved(self) -> Option<AccountRecord> {
        match self {
            Transition::Moved { record, .. } => Some(record),
            Transition::Kept(_) => None,
        }
    }
}

/// Read the account, let `decide` pick the next status (and optionally new
/// metadata) from what is stored, and write it only if the row still holds
/// the status the decision was made from. A lost race re-reads and decides
/// again, so a concurrent writer's forward move is never overwritten.
pub async fn transition_account<F>(
    accounts: &dyn AccountLedger,
    account_id: &str,
    mut decide: F,
) -> LedgerResult<Transition>
where
    F: FnMut(&AccountRecord) -> Option<(AccountStatus, Option<AccountMeta>)> + Send,
{
    for _ in 0..STATUS_WRITE_ATTEMPTS {
        let account = accounts
            .find_account(account_id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("account", account_id))?;
        let Some((next, meta)) = decide(&account) else {
            return Ok(Transition::Kept(account));
        };
        if let Some(record) = accounts
            .update_account_status(account_id, account.status, next, meta.as_ref())
            .await?
        {
            return Ok(Transition::Moved {
                from: account.status,
                record,
            });
        }
        debug!(
            account_id = %account_id,
            expected = %account.status,
            "account status changed concurrently, deciding again"
        );
    }
    Err(DatabaseError::conflict("account", account_id))
}

/// Move `account` to `target` if that is a forward step; otherwise return the
/// stored row unchanged.
pub async fn move_forward(
    accounts: &dyn AccountLedger,
    account: AccountRecord,
    target: AccountStatus,
) -> LedgerResult<AccountRecord> {
    if !account.status.can_transition_to(&target) {
        return Ok(account);
    }
    let transition = transition_account(accounts, &account.id, |current| {
        current
            .status
            .can_transition_to(&target)
            .then_some((target, None))
    })
    .await?;
    Ok(transition.into_record())
}

/// Put the account into a failure sink, recording who failed and why.
/// Accounts already in a terminal state are left alone.
pub async fn fail_account(
    accounts: &dyn AccountLedger,
    account_id: &str,
    target: AccountStatus,
    server: &str,
    source: &str,
    reason: &str,
) -> LedgerResult<Option<AccountRecord>> {
    let transition = transition_account(accounts, account_id, |current| {
        if !current.status.can_transition_to(&target) {
            return None;
        }
        let mut meta = current.meta.clone();
        meta.record_failure(server, source, reason);
        Some((target, Some(meta)))
    })
    .await;
    match transition {
        Ok(transition) => Ok(transition.moved()),
        Err(DatabaseError {
            kind: DatabaseErrorKind::NotFound { .. },
        }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Run verification payout events through the account status machine and
/// persist the result. A newly verified account becomes the worker's active
/// account.
pub async fn advance_account(
    accounts: &dyn AccountLedger,
    account_id: &str,
    events: &[AccountEvent],
) -> LedgerResult<Option<AccountRecord>> {
    let transition = transition_account(accounts, account_id, |current| {
        advance(current.status, events).map(|next| (next, None))
    })
    .await?;
    let Transition::Moved { from, mut record } = transition else {
        return Ok(None);
    };

    if record.status == AccountStatus::Verified {
        record = accounts.activate_account(account_id).await?;
    }
    info!(
        account_id = %account_id,
        from = %from,
        to = %record.status,
        "account status advanced"
    );
    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryLedger;
    use crate::database::repository::ListFilter;
    use crate::payments::types::TransactionStatus;

    fn bank_request(ifsc: Option<&str>) -> RegistrationRequest {
        RegistrationRequest {
            account_type: AccountType::BankAccount,
            name: "Ravi".to_string(),
            account: AccountDetails {
                id: "1234567890".to_string(),
                ifsc: ifsc.map(str::to_string),
            },
        }
    }

    async fn account_in(ledger: &MemoryLedger, status: AccountStatus) -> AccountRecord {
        let mut record = AccountRecord::initialised(
            "box-1",
            "w1",
            AccountType::BankAccount,
            uuid::Uuid::new_v4().to_string(),
            AccountMeta::new(
                "Ravi",
                AccountDetails {
                    id: "1234567890".to_string(),
                    ifsc: Some("HDFC0001234".to_string()),
                },
            ),
        );
        record.status = status;
        ledger.insert_account(&record).await.unwrap()
    }

    /// Hands out one outdated copy of the account, like a reader that loaded
    /// the row just before a concurrent writer moved it.
    struct StaleRead {
        inner: MemoryLedger,
        stale: std::sync::Mutex<Option<AccountRecord>>,
    }

    #[async_trait::async_trait]
    impl AccountLedger for StaleRead {
        async fn insert_account(&self, record: &AccountRecord) -> LedgerResult<AccountRecord> {
            self.inner.insert_account(record).await
        }

        async fn upsert_account(&self, record: &AccountRecord) -> LedgerResult<AccountRecord> {
            self.inner.upsert_account(record).await
        }

        async fn find_account(&self, id: &str) -> LedgerResult<Option<AccountRecord>> {
            let stale = self.stale.lock().unwrap().take();
            match stale {
                Some(record) => Ok(Some(record)),
                None => self.inner.find_account(id).await,
            }
        }

        async fn find_account_by_hash(&self, hash: &str) -> LedgerResult<Option<AccountRecord>> {
            self.inner.find_account_by_hash(hash).await
        }

        async fn find_active_account(
            &self,
            worker_id: &str,
        ) -> LedgerResult<Option<AccountRecord>> {
            self.inner.find_active_account(worker_id).await
        }

        async fn list_accounts(&self, filter: &ListFilter) -> LedgerResult<Vec<AccountRecord>> {
            self.inner.list_accounts(filter).await
        }

        async fn update_account_status(
            &self,
            id: &str,
            expected: AccountStatus,
            status: AccountStatus,
            meta: Option<&AccountMeta>,
        ) -> LedgerResult<Option<AccountRecord>> {
            self.inner
                .update_account_status(id, expected, status, meta)
                .await
        }

        async fn set_fund_id(&self, id: &str, fund_id: &str) -> LedgerResult<AccountRecord> {
            self.inner.set_fund_id(id, fund_id).await
        }

        async fn activate_account(&self, id: &str) -> LedgerResult<AccountRecord> {
            self.inner.activate_account(id).await
        }
    }

    /// A verified account, plus a reader holding its `TRANSACTION_QUEUE` copy.
    async fn verified_behind_stale_read() -> (StaleRead, AccountRecord) {
        let inner = MemoryLedger::new();
        let account = account_in(&inner, AccountStatus::Verified).await;
        let account = inner.activate_account(&account.id).await.unwrap();
        let mut stale = account.clone();
        stale.status = AccountStatus::TransactionQueue;
        stale.active = false;
        let ledger = StaleRead {
            inner,
            stale: std::sync::Mutex::new(Some(stale)),
        };
        (ledger, account)
    }

    #[test]
    fn bank_accounts_need_an_ifsc() {
        assert!(bank_request(None).validate().is_err());
        assert!(bank_request(Some("SHORT")).validate().is_err());
        assert!(bank_request(Some("HDFC0001234")).validate().is_ok());
    }

    #[test]
    fn vpa_must_contain_a_handle() {
        let mut request = bank_request(None);
        request.account_type = AccountType::Vpa;
        assert!(request.validate().is_err());
        request.account.id = "ravi@okbank".to_string();
        assert!(request.validate().is_ok());
    }

    #[test]
    fn hash_is_stable_and_ifsc_case_insensitive() {
        let a = account_hash("w1", "1234567890", Some("hdfc0001234"));
        let b = account_hash("w1", "1234567890", Some("HDFC0001234"));
        assert_eq!(a, b);
        assert_ne!(a, account_hash("w2", "1234567890", Some("HDFC0001234")));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn vpa_accounts_are_paid_over_upi() {
        assert_eq!(payout_mode_for(AccountType::Vpa, "IMPS"), "UPI");
        assert_eq!(payout_mode_for(AccountType::BankAccount, "IMPS"), "IMPS");
    }

    #[tokio::test]
    async fn move_forward_never_goes_back() {
        let ledger = MemoryLedger::new();
        let account = account_in(&ledger, AccountStatus::TransactionQueue).await;

        let same = move_forward(&ledger, account.clone(), AccountStatus::ServerAccountsQueue)
            .await
            .unwrap();
        assert_eq!(same.status, AccountStatus::TransactionQueue);

        let moved = move_forward(&ledger, account, AccountStatus::TransactionCreated)
            .await
            .unwrap();
        assert_eq!(moved.status, AccountStatus::TransactionCreated);
    }

    #[tokio::test]
    async fn processed_verification_activates_the_account() {
        let ledger = MemoryLedger::new();
        let account = account_in(&ledger, AccountStatus::ConfirmationReceived).await;

        let updated = advance_account(
            &ledger,
            &account.id,
            &[AccountEvent::PayoutStatus(TransactionStatus::Processed)],
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(updated.status, AccountStatus::Verified);
        assert!(updated.active);
    }

    #[tokio::test]
    async fn failure_metadata_is_recorded() {
        let ledger = MemoryLedger::new();
        let account = account_in(&ledger, AccountStatus::Initialised).await;

        let failed = fail_account(
            &ledger,
            &account.id,
            AccountStatus::Failed,
            "box",
            "Box Registration Queue",
            "backend unreachable",
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(failed.status, AccountStatus::Failed);
        assert_eq!(failed.meta.failure_server.as_deref(), Some("box"));
        assert_eq!(failed.meta.failure_reason.as_deref(), Some("backend unreachable"));

        let again = fail_account(
            &ledger,
            &account.id,
            AccountStatus::ConfirmationFailed,
            "box",
            "Box Verification Queue",
            "late",
        )
        .await
        .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn late_payout_creation_does_not_undo_a_settled_verification() {
        let (ledger, account) = verified_behind_stale_read().await;

        let advanced = advance_account(
            &ledger,
            &account.id,
            &[
                AccountEvent::PayoutCreated,
                AccountEvent::PayoutStatus(TransactionStatus::Processing),
            ],
        )
        .await
        .unwrap();

        assert!(advanced.is_none());
        let stored = ledger.find_account(&account.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Verified);
        assert!(stored.active);
    }

    #[tokio::test]
    async fn late_failure_does_not_sink_a_verified_account() {
        let (ledger, account) = verified_behind_stale_read().await;

        let failed = fail_account(
            &ledger,
            &account.id,
            AccountStatus::Failed,
            "server",
            "Transaction Queue Processor",
            "gateway timeout",
        )
        .await
        .unwrap();

        assert!(failed.is_none());
        let stored = ledger.find_account(&account.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Verified);
        assert!(stored.meta.failure_reason.is_none());
    }

    #[tokio::test]
    async fn move_forward_decides_again_after_losing_the_race() {
        let (ledger, account) = verified_behind_stale_read().await;
        let mut stale = account.clone();
        stale.status = AccountStatus::TransactionQueue;

        let kept = move_forward(&ledger, stale, AccountStatus::TransactionCreated)
            .await
            .unwrap();
        assert_eq!(kept.status, AccountStatus::Verified);
    }
}
