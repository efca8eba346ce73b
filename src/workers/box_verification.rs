//! Box consumer for account verification: forwards the worker's
//! confirmation to the backend.

use crate::database::repository::AccountLedger;
use crate::payments::types::{AccountStatus, VerifyAccountRequest};
use crate::queue::verify_account::VerifyAccountJob;
use crate::queue::Job;
use crate::services::accounts::{fail_account, RegistrationError};
use crate::services::backend_client::{BackendApi, BoxCredentials};
use crate::workers::consumer::JobProcessor;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

const FAILURE_SOURCE: &str = "Box Verification Queue";

pub struct BoxVerificationProcessor {
    accounts: Arc<dyn AccountLedger>,
    backend: Arc<dyn BackendApi>,
    credentials: BoxCredentials,
}

impl BoxVerificationProcessor {
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
impl JobProcessor for BoxVerificationProcessor {
    type Data = VerifyAccountJob;
    type Error = RegistrationError;

    fn name(&self) -> &'static str {
        "box-verification"
    }

    async fn process(&self, job: &Job<VerifyAccountJob>) -> Result<(), RegistrationError> {
        let request = VerifyAccountRequest {
            worker_id: job.data.worker_id.clone(),
            confirm: job.data.confirm,
        };
        let verified = self
            .backend
            .verify_account(&self.credentials, &job.data.account_id, &request)
            .await?;
        let stored = self.accounts.upsert_account(&verified).await?;

        info!(
            account_id = %stored.id,
            status = %stored.status,
            confirm = job.data.confirm,
            "verification forwarded to backend"
        );
        Ok(())
    }

    async fn on_failed(&self, job: &Job<VerifyAccountJob>, err: &RegistrationError) {
        if let Err(e) = fail_account(
            self.accounts.as_ref(),
            &job.data.account_id,
            AccountStatus::ConfirmationFailed,
            "box",
            FAILURE_SOURCE,
            &err.failure_reason(),
        )
        .await
        {
            error!(
                account_id = %job.data.account_id,
                error = %e,
                "could not record verification failure"
            );
        }
    }
}
