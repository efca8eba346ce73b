//! Backend consumer for account registration.
//!
//! Onboards the account at the gateway (contact, then fund account), stores
//! the fund account id and queues the verification payout. Each step is
//! skipped on redelivery once its result is in the ledger.

use crate::config::PayoutConfig;
use crate::database::repository::AccountLedger;
use crate::payments::gateway::{
    BankAccountDetails, ContactRequest, FundAccountRequest, PayoutGateway, VpaDetails,
};
use crate::payments::types::{AccountRecord, AccountStatus, AccountType, TransactionPurpose};
use crate::queue::registration::RegistrationJob;
use crate::queue::transaction::{TransactionPayload, TransactionQueue};
use crate::queue::{Job, QueueWrapper};
use crate::services::accounts::{
    fail_account, load_account, move_forward, payout_mode_for, RegistrationError,
};
use crate::workers::consumer::JobProcessor;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

const FAILURE_SOURCE: &str = "Server Registration Queue";

/// Idempotency key of the account's verification payout.
pub fn verification_key(account: &AccountRecord) -> String {
    format!("verification-{}", account.hash)
}

pub struct ServerRegistrationProcessor {
    accounts: Arc<dyn AccountLedger>,
    gateway: Arc<dyn PayoutGateway>,
    transactions: Arc<TransactionQueue>,
    payouts: PayoutConfig,
}

impl ServerRegistrationProcessor {
    pub fn new(
        accounts: Arc<dyn AccountLedger>,
        gateway: Arc<dyn PayoutGateway>,
        transactions: Arc<TransactionQueue>,
        payouts: PayoutConfig,
    ) -> Self {
        Self {
            accounts,
            gateway,
            transactions,
            payouts,
        }
    }

    async fn onboard(&self, account: &AccountRecord) -> Result<String, RegistrationError> {
        let contact = self
            .gateway
            .create_contact(
                &ContactRequest {
                    name: account.meta.name.clone(),
                    contact_type: "worker".to_string(),
                    reference_id: account.worker_id.clone(),
                },
                &format!("contact-{}", account.hash),
            )
            .await?;

        let details = &account.meta.account;
        let request = match account.account_type {
            AccountType::BankAccount => {
                let ifsc = details.ifsc.clone().ok_or_else(|| RegistrationError::Incomplete {
                    account_id: account.id.clone(),
                    field: "ifsc".to_string(),
                })?;
                FundAccountRequest {
                    contact_id: contact.id,
                    account_type: account.account_type.as_str().to_string(),
                    bank_account: Some(BankAccountDetails {
                        name: account.meta.name.clone(),
                        ifsc,
                        account_number: details.id.clone(),
                    }),
                    vpa: None,
                }
            }
            AccountType::Vpa => FundAccountRequest {
                contact_id: contact.id,
                account_type: account.account_type.as_str().to_string(),
                bank_account: None,
                vpa: Some(VpaDetails {
                    address: details.id.clone(),
                }),
            },
        };

        let fund_account = self
            .gateway
            .create_fund_account(&request, &format!("fund-account-{}", account.hash))
            .await?;
        Ok(fund_account.id)
    }
}

#[async_trait]
impl JobProcessor for ServerRegistrationProcessor {
    type Data = RegistrationJob;
    type Error = RegistrationError;

    fn name(&self) -> &'static str {
        "server-registration"
    }

    async fn process(&self, job: &Job<RegistrationJob>) -> Result<(), RegistrationError> {
        let accounts = self.accounts.as_ref();
        let account = load_account(accounts, &job.data.account_id).await?;
        if account.status.is_terminal() {
            info!(account_id = %account.id, status = %account.status, "account already settled");
            return Ok(());
        }

        let mut account = move_forward(accounts, account, AccountStatus::ServerAccountsQueue).await?;
        let fund_id = match account.fund_id.clone() {
            Some(fund_id) => fund_id,
            None => {
                let fund_id = self.onboard(&account).await?;
                account = accounts.set_fund_id(&account.id, &fund_id).await?;
                fund_id
            }
        };
        let account = move_forward(accounts, account, AccountStatus::TransactionQueue).await?;

        let payload = TransactionPayload {
            amount: self.payouts.verification_amount,
            account_id: account.id.clone(),
            fund_id,
            worker_id: account.worker_id.clone(),
            currency: self.payouts.currency.clone(),
            mode: payout_mode_for(account.account_type, &self.payouts.mode),
            purpose: TransactionPurpose::Verification,
            idempotency_key: verification_key(&account),
            source_account: self.payouts.source_account.clone(),
            bulk_id: None,
        };
        match self
            .transactions
            .enqueue(&format!("VERIFICATION:{}", account.worker_id), payload)
            .await
        {
            Ok(enqueued) => info!(
                account_id = %account.id,
                transaction_id = %enqueued.record.id,
                "verification payout queued"
            ),
            Err(e) if e.is_duplicate() => {
                info!(account_id = %account.id, "verification payout already queued");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn on_failed(&self, job: &Job<RegistrationJob>, err: &RegistrationError) {
        if let Err(e) = fail_account(
            self.accounts.as_ref(),
            &job.data.account_id,
            AccountStatus::Failed,
            "server",
            FAILURE_SOURCE,
            &err.failure_reason(),
        )
        .await
        {
            error!(
                account_id = %job.data.account_id,
                error = %e,
                "could not record registration failure"
            );
        }
    }
}
