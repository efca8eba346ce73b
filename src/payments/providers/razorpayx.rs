use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::gateway::{
    ContactRequest, ContactResponse, FundAccountRequest, FundAccountResponse, PayoutEntity,
    PayoutGateway, PayoutRequest, IDEMPOTENCY_HEADER,
};
use crate::payments::utils::{PayoutHttpClient, RequestAuth};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_SIGNATURE_HEADER: &str = "x-razorpay-signature";

#[derive(Debug, Clone)]
pub struct RazorpayXConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub signature_header: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for RazorpayXConfig {
    fn default() -> Self {
        Self {
            key_id: String::new(),
            key_secret: String::new(),
            webhook_secret: String::new(),
            signature_header: DEFAULT_SIGNATURE_HEADER.to_string(),
            base_url: "https://api.razorpay.com/v1".to_string(),
            timeout_secs: 30,
            max_retries: 0,
        }
    }
}

fn required_env(key: &str) -> GatewayResult<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(GatewayError::ValidationError {
            message: format!("{} environment variable is required", key),
            field: Some(key.to_string()),
        })
}

impl RazorpayXConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            key_id: required_env("GATEWAY_KEY_ID")?,
            key_secret: required_env("GATEWAY_KEY_SECRET")?,
            webhook_secret: required_env("GATEWAY_WEBHOOK_SECRET")?,
            signature_header: std::env::var("GATEWAY_SIGNATURE_HEADER")
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.signature_header),
            base_url: std::env::var("GATEWAY_BASE_URL").unwrap_or(defaults.base_url),
            timeout_secs: std::env::var("GATEWAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            max_retries: std::env::var("GATEWAY_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
        })
    }
}

pub struct RazorpayXProvider {
    config: RazorpayXConfig,
    http: PayoutHttpClient,
}

impl RazorpayXProvider {
    pub fn new(config: RazorpayXConfig) -> GatewayResult<Self> {
        let http =
            PayoutHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn auth(&self) -> RequestAuth<'_> {
        RequestAuth::Basic {
            username: &self.config.key_id,
            password: &self.config.key_secret,
        }
    }

    fn to_json<T: serde::Serialize>(value: &T) -> GatewayResult<serde_json::Value> {
        serde_json::to_value(value).map_err(|e| GatewayError::ValidationError {
            message: format!("failed to encode gateway request: {}", e),
            field: None,
        })
    }
}

#[async_trait]
impl PayoutGateway for RazorpayXProvider {
    async fn create_contact(
        &self,
        request: &ContactRequest,
        idempotency_key: &str,
    ) -> GatewayResult<ContactResponse> {
        let body = Self::to_json(request)?;
        self.http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/contacts"),
                self.auth(),
                Some(&body),
                &[(IDEMPOTENCY_HEADER, idempotency_key)],
            )
            .await
    }

    async fn create_fund_account(
        &self,
        request: &FundAccountRequest,
        idempotency_key: &str,
    ) -> GatewayResult<FundAccountResponse> {
        let body = Self::to_json(request)?;
        self.http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/fund_accounts"),
                self.auth(),
                Some(&body),
                &[(IDEMPOTENCY_HEADER, idempotency_key)],
            )
            .await
    }

    async fn create_payout(
        &self,
        request: &PayoutRequest,
        idempotency_key: &str,
    ) -> GatewayResult<PayoutEntity> {
        if request.amount <= 0 {
            return Err(GatewayError::ValidationError {
                message: "payout amount must be positive".to_string(),
                field: Some("amount".to_string()),
            });
        }
        let body = Self::to_json(request)?;
        let payout: PayoutEntity = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/payouts"),
                self.auth(),
                Some(&body),
                &[(IDEMPOTENCY_HEADER, idempotency_key)],
            )
            .await?;

        info!(
            payout_id = %payout.id,
            status = %payout.status,
            idempotency_key = %idempotency_key,
            "payout created"
        );
        Ok(payout)
    }

    async fn fetch_payout(&self, payout_id: &str) -> GatewayResult<PayoutEntity> {
        self.http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/payouts/{}", payout_id)),
                self.auth(),
                None,
                &[],
            )
            .await
    }

    fn name(&self) -> &'static str {
        "razorpayx"
    }
}
