//! Queue-specific error types

use crate::database::error::DatabaseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Redis unavailable, pool exhausted or a command failed
    #[error("Queue connection error: {0}")]
    ConnectionError(String),

    #[error("Queue serialization error: {0}")]
    SerializationError(String),

    /// The payload cannot be turned into a ledger row; nothing was queued
    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("Queue '{0}' is closed")]
    Closed(String),

    /// The ledger write that must precede a push failed; nothing was queued
    #[error("Ledger write failed before enqueue: {0}")]
    Ledger(#[from] DatabaseError),
}

impl QueueError {
    /// The enqueue hit a ledger uniqueness constraint, i.e. the record was
    /// already written by an earlier attempt.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, QueueError::Ledger(err) if err.is_unique_violation())
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::ConnectionError(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::SerializationError(err.to_string())
    }
}

impl From<bb8::RunError<redis::RedisError>> for QueueError {
    fn from(err: bb8::RunError<redis::RedisError>) -> Self {
        QueueError::ConnectionError(format!("Pool error: {}", err))
    }
}

impl From<QueueError> for crate::error::AppError {
    fn from(err: QueueError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        match err {
            QueueError::Ledger(db) => db.into(),
            QueueError::InvalidPayload(reason) => AppError::invalid_field("payload", reason),
            other => AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Queue {
                message: other.to_string(),
            })),
        }
    }
}

/// Result type alias for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
