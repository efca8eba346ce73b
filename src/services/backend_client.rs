//! Box-to-backend HTTP client.
//!
//! The box identity token travels as a per-request bearer header; the client
//! itself holds no credentials.

use crate::config::BoxNodeConfig;
use crate::payments::types::{AccountRecord, VerifyAccountRequest};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct BoxCredentials {
    pub box_id: String,
    pub id_token: String,
}

impl From<&BoxNodeConfig> for BoxCredentials {
    fn from(config: &BoxNodeConfig) -> Self {
        Self {
            box_id: config.box_id.clone(),
            id_token: config.id_token.clone(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum BackendClientError {
    #[error("backend unreachable: {0}")]
    Network(String),

    #[error("backend request timed out after {0}s")]
    Timeout(u64),

    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

impl From<BackendClientError> for crate::error::AppError {
    fn from(err: BackendClientError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError};

        let kind = match &err {
            BackendClientError::Timeout(secs) => ExternalError::Timeout {
                service: "backend".to_string(),
                timeout_secs: *secs,
            },
            BackendClientError::Status { status, .. } => ExternalError::PeerServer {
                message: err.to_string(),
                is_retryable: *status >= 500,
            },
            _ => ExternalError::PeerServer {
                message: err.to_string(),
                is_retryable: true,
            },
        };
        AppError::new(AppErrorKind::External(kind))
    }
}

/// Calls a box makes on its backend.
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// `POST /payments/accounts`; returns the backend's copy of the account.
    async fn register_account(
        &self,
        credentials: &BoxCredentials,
        account: &AccountRecord,
    ) -> Result<AccountRecord, BackendClientError>;

    /// `PUT /payments/accounts/{id}/verify`
    async fn verify_account(
        &self,
        credentials: &BoxCredentials,
        account_id: &str,
        request: &VerifyAccountRequest,
    ) -> Result<AccountRecord, BackendClientError>;

    /// `GET /payments/accounts/{id}`
    async fn fetch_account(
        &self,
        credentials: &BoxCredentials,
        account_id: &str,
    ) -> Result<AccountRecord, BackendClientError>;
}

pub struct HttpBackendClient {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

impl HttpBackendClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, BackendClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BackendClientError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs,
        })
    }

    pub fn from_config(config: &BoxNodeConfig) -> Result<Self, BackendClientError> {
        Self::new(&config.backend_base_url, config.backend_timeout_secs)
    }

    fn request(&self, method: Method, path: &str, credentials: &BoxCredentials) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&credentials.id_token)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BackendClientError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendClientError::Timeout(self.timeout_secs)
            } else {
                BackendClientError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendClientError::InvalidResponse(e.to_string()))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "backend call rejected");
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|body| {
                    body.get("message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                })
                .unwrap_or(text);
            return Err(BackendClientError::Status {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&text).map_err(|e| BackendClientError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl BackendApi for HttpBackendClient {
    async fn register_account(
        &self,
        credentials: &BoxCredentials,
        account: &AccountRecord,
    ) -> Result<AccountRecord, BackendClientError> {
        debug!(account_id = %account.id, box_id = %credentials.box_id, "registering account with backend");
        let request = self
            .request(Method::POST, "/payments/accounts", credentials)
            .json(account);
        self.send(request).await
    }

    async fn verify_account(
        &self,
        credentials: &BoxCredentials,
        account_id: &str,
        body: &VerifyAccountRequest,
    ) -> Result<AccountRecord, BackendClientError> {
        debug!(account_id = %account_id, confirm = body.confirm, "forwarding verification to backend");
        let request = self
            .request(
                Method::PUT,
                &format!("/payments/accounts/{}/verify", account_id),
                credentials,
            )
            .json(body);
        self.send(request).await
    }

    async fn fetch_account(
        &self,
        credentials: &BoxCredentials,
        account_id: &str,
    ) -> Result<AccountRecord, BackendClientError> {
        let request = self.request(
            Method::GET,
            &format!("/payments/accounts/{}", account_id),
            credentials,
        );
        self.send(request).await
    }
}
