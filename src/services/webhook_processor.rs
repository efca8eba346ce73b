use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::payments::gateway::PayoutWebhook;
use crate::payments::utils::verify_hmac_sha256_hex;
use crate::services::reconciliation::{LedgerReconciler, ReconcileError, ReconcileOutcome};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Missing signature header")]
    MissingSignature,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),
}

impl WebhookError {
    /// Authentication failures are the only errors reported to the caller.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            WebhookError::MissingSignature | WebhookError::InvalidSignature
        )
    }
}

pub struct WebhookProcessor {
    reconciler: Arc<LedgerReconciler>,
    secret: String,
}

impl WebhookProcessor {
    pub fn new(reconciler: Arc<LedgerReconciler>, secret: impl Into<String>) -> Self {
        Self {
            reconciler,
            secret: secret.into(),
        }
    }

    /// HMAC-SHA256 of the raw body against the signature header. Runs before
    /// anything touches the ledger.
    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> Result<(), WebhookError> {
        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(WebhookError::MissingSignature)?;
        if !verify_hmac_sha256_hex(body, &self.secret, signature) {
            return Err(WebhookError::InvalidSignature);
        }
        Ok(())
    }

    pub async fn process(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome, WebhookError> {
        if let Err(e) = self.verify(body, signature) {
            error!(error = %e, "payout webhook rejected");
            return Err(e);
        }

        let webhook: PayoutWebhook = serde_json::from_slice(body)
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
        let payout = &webhook.payload.payout.entity;
        info!(
            payout_id = %payout.id,
            status = %payout.status,
            event = ?webhook.event,
            "payout webhook received"
        );

        match self.reconciler.apply(payout).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(payout_id = %payout.id, error = %e, "payout webhook not applied");
                Err(e.into())
            }
        }
    }
}
