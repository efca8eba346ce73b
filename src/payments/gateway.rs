use crate::payments::error::GatewayResult;
use crate::payments::types::TransactionStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Request header carrying the payout idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "X-Payout-Idempotency";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayoutRequest {
    pub account_number: String,
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    pub fund_account_id: String,
    pub mode: String,
    pub purpose: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
}

/// Payout object as returned by creation, fetch and webhook payloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayoutEntity {
    pub id: String,
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub fund_account_id: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub notes: Option<JsonValue>,
    #[serde(default)]
    pub fees: Option<i64>,
    #[serde(default)]
    pub tax: Option<i64>,
    pub status: String,
    #[serde(default)]
    pub utr: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub narration: Option<String>,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl PayoutEntity {
    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        TransactionStatus::from_str(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub contact_type: String,
    pub reference_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContactResponse {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankAccountDetails {
    pub name: String,
    pub ifsc: String,
    pub account_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VpaDetails {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundAccountRequest {
    pub contact_id: String,
    pub account_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_account: Option<BankAccountDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpa: Option<VpaDetails>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FundAccountResponse {
    pub id: String,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayoutWebhook {
    #[serde(default)]
    pub event: Option<String>,
    pub payload: PayoutWebhookPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayoutWebhookPayload {
    pub payout: PayoutEnvelope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayoutEnvelope {
    pub entity: PayoutEntity,
}

#[async_trait]
pub trait PayoutGateway: Send + Sync {
    /// Onboarding calls carry an idempotency key derived from the account
    /// hash so a redelivered registration job reuses the same records.
    async fn create_contact(
        &self,
        request: &ContactRequest,
        idempotency_key: &str,
    ) -> GatewayResult<ContactResponse>;

    async fn create_fund_account(
        &self,
        request: &FundAccountRequest,
        idempotency_key: &str,
    ) -> GatewayResult<FundAccountResponse>;

    /// Create a payout. The gateway deduplicates on `idempotency_key`; a
    /// repeated call returns the payout created by the first one.
    async fn create_payout(
        &self,
        request: &PayoutRequest,
        idempotency_key: &str,
    ) -> GatewayResult<PayoutEntity>;

    async fn fetch_payout(&self, payout_id: &str) -> GatewayResult<PayoutEntity>;

    fn name(&self) -> &'static str;
}
