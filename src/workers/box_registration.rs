//! Box consumer for account registration: forwards the account to the
//! backend and mirrors the backend's copy locally.

use crate::database::repository::AccountLedger;
use crate::payments::types::AccountStatus;
use crate::queue::registration::RegistrationJob;
use crate::queue::Job;
use crate::services::accounts::{fail_account, load_account, move_forward, RegistrationError};
use crate::services::backend_client::{BackendApi, BoxCredentials};
use crate::workers::consumer::JobProcessor;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

const FAILURE_SOURCE: &str = "Box Registration Queue";

pub struct BoxRegistrationProcessor {
    accounts: Arc<dyn AccountLedger>,
    backend: Arc<dyn BackendApi>,
    credentials: BoxCredentials,
}

impl BoxRegistrationProcessor {
    pub fn new(
        accounts: Arc<dyn AccountLedger>,
        backend: Arc<dyn BackendApi>,
        credentials: BoxCredentials,
    ) -> Self {
        Self {
            accounts,
            backend,
            credentials,
        }
    }
}

#[async_trait]
impl JobProcessor for BoxRegistrationProcessor {
    type Data = RegistrationJob;
    type Error = RegistrationError;

    fn name(&self) -> &'static str {
        "box-registration"
    }

    async fn process(&self, job: &Job<RegistrationJob>) -> Result<(), RegistrationError> {
        let account = load_account(self.accounts.as_ref(), &job.data.account_id).await?;
        let account =
            move_forward(self.accounts.as_ref(), account, AccountStatus::BoxAccountsQueue).await?;

        let registered = self
            .backend
            .register_account(&self.credentials, &account)
            .await?;
        let stored = self.accounts.upsert_account(&registered).await?;

        info!(
            account_id = %stored.id,
            status = %stored.status,
            "account registered with backend"
        );
        Ok(())
    }

    async fn on_failed(&self, job: &Job<RegistrationJob>, err: &RegistrationError) {
        if let Err(e) = fail_account(
            self.accounts.as_ref(),
            &job.data.account_id,
            AccountStatus::Failed,
            "box",
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
