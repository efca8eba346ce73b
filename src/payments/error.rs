use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError { message: String },

    /// Non-success HTTP answer from the gateway. `description` is the
    /// gateway's own error description when the body carried one.
    #[error("Gateway request failed: status={status}, description={description}")]
    RequestError {
        status: u16,
        code: Option<String>,
        description: String,
    },

    #[error("Invalid gateway response: {message}")]
    InvalidResponse { message: String },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::ValidationError { .. } => false,
            GatewayError::NetworkError { .. } => true,
            GatewayError::RateLimitError { .. } => true,
            GatewayError::RequestError { status, .. } => *status >= 500,
            GatewayError::InvalidResponse { .. } => false,
            GatewayError::WebhookVerificationError { .. } => false,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            GatewayError::ValidationError { .. } => 400,
            GatewayError::NetworkError { .. } => 503,
            GatewayError::RateLimitError { .. } => 429,
            GatewayError::RequestError { .. } => 502,
            GatewayError::InvalidResponse { .. } => 502,
            GatewayError::WebhookVerificationError { .. } => 401,
        }
    }

    /// Human-readable reason recorded in ledger metadata.
    pub fn failure_reason(&self) -> String {
        match self {
            GatewayError::RequestError { description, .. } => description.clone(),
            other => other.to_string(),
        }
    }
}

impl From<GatewayError> for crate::error::AppError {
    fn from(err: GatewayError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError};

        AppError::new(AppErrorKind::External(ExternalError::PaymentGateway {
            message: err.to_string(),
            is_retryable: err.is_retryable(),
        }))
    }
}
