use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    NotFound { entity: String, id: String },
    UniqueViolation { constraint: String },
    /// A conditional write kept losing to concurrent writers.
    Conflict { entity: String, id: String },
    ConnectionError { message: String },
    PoolExhausted,
    QueryError { message: String },
    Decode { message: String },
    Unknown { message: String },
}

impl fmt::Display for DatabaseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseErrorKind::NotFound { entity, id } => write!(f, "{} not found: {}", entity, id),
            DatabaseErrorKind::UniqueViolation { constraint } => {
                write!(f, "unique constraint violated: {}", constraint)
            }
            DatabaseErrorKind::Conflict { entity, id } => {
                write!(f, "concurrent update on {} {}", entity, id)
            }
            DatabaseErrorKind::ConnectionError { message } => {
                write!(f, "connection error: {}", message)
            }
            DatabaseErrorKind::PoolExhausted => f.write_str("connection pool exhausted"),
            DatabaseErrorKind::QueryError { message } => write!(f, "query failed: {}", message),
            DatabaseErrorKind::Decode { message } => write!(f, "row decode failed: {}", message),
            DatabaseErrorKind::Unknown { message } => write!(f, "{}", message),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("database error: {kind}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }

    pub fn conflict(entity: &str, id: &str) -> Self {
        Self::new(DatabaseErrorKind::Conflict {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::Decode {
            message: message.into(),
        })
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: String::new(),
            },
            sqlx::Error::PoolTimedOut => DatabaseErrorKind::PoolExhausted,
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                DatabaseErrorKind::ConnectionError {
                    message: err.to_string(),
                }
            }
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DatabaseErrorKind::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                }
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => DatabaseErrorKind::Decode {
                message: err.to_string(),
            },
            _ => DatabaseErrorKind::QueryError {
                message: err.to_string(),
            },
        };
        Self { kind }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::ConnectionError { .. }
                | DatabaseErrorKind::PoolExhausted
                | DatabaseErrorKind::Conflict { .. }
        )
    }
}

impl From<DatabaseError> for crate::error::AppError {
    fn from(err: DatabaseError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};

        match err.kind {
            DatabaseErrorKind::UniqueViolation { constraint } => {
                AppError::new(AppErrorKind::Domain(DomainError::Duplicate {
                    constraint,
                }))
            }
            kind => {
                let is_retryable = matches!(
                    kind,
                    DatabaseErrorKind::ConnectionError { .. }
                        | DatabaseErrorKind::PoolExhausted
                        | DatabaseErrorKind::Conflict { .. }
                );
                AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message: kind.to_string(),
                    is_retryable,
                }))
            }
        }
    }
}
