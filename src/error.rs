//! Error handling for the payout backend and box servers
//!
//! A unified error system with HTTP status mapping, user-facing messages
//! and structured error codes for client handling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "ACCOUNT_NOT_FOUND")]
    AccountNotFound,
    #[serde(rename = "INVALID_ACCOUNT_STATUS")]
    InvalidAccountStatus,
    #[serde(rename = "DUPLICATE_RECORD")]
    DuplicateRecord,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "QUEUE_ERROR")]
    QueueError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_GATEWAY_ERROR")]
    PaymentGatewayError,
    #[serde(rename = "PEER_SERVER_ERROR")]
    PeerServerError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    AccountNotFound { account_id: String },
    /// Operation not allowed while the account is in this status
    InvalidAccountStatus { account_id: String, status: String },
    /// A ledger uniqueness constraint rejected the write
    Duplicate { constraint: String },
    /// Missing or unknown credentials
    Unauthorized { reason: String },
    /// Credentials valid but not for this resource
    Forbidden { reason: String },
}

/// Infrastructure-level errors (database, queue, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Queue { message: String },
    Configuration { message: String },
}

/// External service errors (payout gateway, peer server)
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentGateway { message: String, is_retryable: bool },
    /// The box's backend, or a box calling the backend
    PeerServer { message: String, is_retryable: bool },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    MissingField { field: String },
    InvalidField { field: String, reason: String },
    InvalidAmount { amount: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::MissingField {
            field: field.to_string(),
        }))
    }

    pub fn invalid_field(field: &str, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }))
    }

    pub fn account_not_found(account_id: &str) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::AccountNotFound {
            account_id: account_id.to_string(),
        }))
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::Unauthorized {
            reason: reason.into(),
        }))
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::Forbidden {
            reason: reason.into(),
        }))
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::AccountNotFound { .. } => 404,
                DomainError::InvalidAccountStatus { .. } => 400,
                DomainError::Duplicate { .. } => 409,
                DomainError::Unauthorized { .. } => 401,
                DomainError::Forbidden { .. } => 403,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => 502,
                ExternalError::PeerServer { .. } => 502,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::AccountNotFound { .. } => ErrorCode::AccountNotFound,
                DomainError::InvalidAccountStatus { .. } => ErrorCode::InvalidAccountStatus,
                DomainError::Duplicate { .. } => ErrorCode::DuplicateRecord,
                DomainError::Unauthorized { .. } => ErrorCode::Unauthorized,
                DomainError::Forbidden { .. } => ErrorCode::Forbidden,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Queue { .. } => ErrorCode::QueueError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => ErrorCode::PaymentGatewayError,
                ExternalError::PeerServer { .. } => ErrorCode::PeerServerError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::AccountNotFound { account_id } => {
                    format!("Account '{}' not found", account_id)
                }
                DomainError::InvalidAccountStatus { account_id, status } => format!(
                    "Account '{}' cannot be changed while in status {}",
                    account_id, status
                ),
                DomainError::Duplicate { constraint } => {
                    format!("Record already exists ({})", constraint)
                }
                DomainError::Unauthorized { reason } => format!("Unauthorized: {}", reason),
                DomainError::Forbidden { reason } => format!("Forbidden: {}", reason),
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { is_retryable, .. } => {
                    if *is_retryable {
                        "Payout gateway is temporarily unavailable. Please try again".to_string()
                    } else {
                        "Payout processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::PeerServer { message, .. } => {
                    format!("Upstream server error: {}", message)
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Queue { .. } => true,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { is_retryable, .. } => *is_retryable,
                ExternalError::PeerServer { is_retryable, .. } => *is_retryable,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError>, From<QueueError> and From<GatewayError> live next to
// those types.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
