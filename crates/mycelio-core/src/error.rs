//! Escrow engine errors
//!
//! Every engine operation returns [`EscrowResult`]. Business rejections carry
//! enough context for logs; [`EscrowError::client_message`] is what callers
//! may show. Database and internal failures never expose their detail.

use mycelio_auth::AuthError;
use mycelio_db::DbError;
use mycelio_ledger::LedgerError;
use mycelio_types::{ErrorCode, TaskId, TaskStatus};
use thiserror::Error;

pub type EscrowResult<T> = Result<T, EscrowError>;

#[derive(Error, Debug)]
pub enum EscrowError {
    // =========================================================================
    // Actor Errors
    // =========================================================================
    #[error("Caller is not permitted to perform this action")]
    Forbidden,

    #[error("Agent not found")]
    AgentNotFound,

    // =========================================================================
    // Task State Errors
    // =========================================================================
    #[error("Task {0} not found")]
    TaskNotFound(TaskId),

    #[error("Task {task_id} is already claimed (status {status})")]
    TaskAlreadyClaimed { task_id: TaskId, status: TaskStatus },

    #[error("Task {task_id} cannot be submitted in status {status}")]
    TaskNotSubmittable { task_id: TaskId, status: TaskStatus },

    #[error("Task {task_id} cannot be settled in status {status}")]
    TaskNotSettlable { task_id: TaskId, status: TaskStatus },

    #[error("Task {task_id} cannot be cancelled in status {status}")]
    TaskNotCancelable { task_id: TaskId, status: TaskStatus },

    // =========================================================================
    // Input Errors
    // =========================================================================
    #[error("Bounty {bounty} is below the minimum of {min}")]
    BountyTooLow { bounty: u64, min: u64 },

    #[error("Insufficient Karma: have {available}, need {required}")]
    InsufficientKarma { available: u64, required: u64 },

    #[error("Payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        details: Option<serde_json::Value>,
    },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EscrowError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Forbidden => ErrorCode::Forbidden,
            Self::AgentNotFound => ErrorCode::NotFound,
            Self::TaskNotFound(_) => ErrorCode::TaskNotFound,
            Self::TaskAlreadyClaimed { .. } => ErrorCode::TaskAlreadyClaimed,
            Self::TaskNotSubmittable { .. } => ErrorCode::TaskNotSubmittable,
            Self::TaskNotSettlable { .. } => ErrorCode::TaskNotSettlable,
            Self::TaskNotCancelable { .. } => ErrorCode::TaskNotCancelable,
            Self::BountyTooLow { .. } => ErrorCode::BountyTooLow,
            Self::InsufficientKarma { .. } => ErrorCode::InsufficientKarma,
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.error_code().is_server_error()
    }

    /// Message safe to return to the caller
    pub fn client_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Internal(_) => self.error_code().message().to_string(),
            _ => self.to_string(),
        }
    }

    /// Field-level detail, if any
    pub fn details(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Validation { details, .. } => details.as_ref(),
            _ => None,
        }
    }
}

impl From<DbError> for EscrowError {
    fn from(err: DbError) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<LedgerError> for EscrowError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance {
                available,
                required,
            } => Self::InsufficientKarma {
                available,
                required,
            },
            LedgerError::DatabaseError { message } => Self::Database(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<AuthError> for EscrowError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Forbidden => Self::Forbidden,
            AuthError::Database(message) => Self::Database(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for EscrowError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation {
            message: "Invalid request".to_string(),
            details: serde_json::to_value(&errors).ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let id = TaskId::new();
        assert_eq!(
            EscrowError::TaskAlreadyClaimed { task_id: id, status: TaskStatus::Locked }
                .error_code()
                .http_status(),
            409
        );
        assert_eq!(EscrowError::TaskNotFound(id).error_code().http_status(), 404);
        assert_eq!(
            EscrowError::PayloadTooLarge { size: 70_000, max: 65_536 }
                .error_code()
                .http_status(),
            413
        );
        assert_eq!(EscrowError::BountyTooLow { bounty: 5, min: 10 }.error_code().http_status(), 400);
    }

    #[test]
    fn test_internal_detail_is_hidden() {
        let err = EscrowError::from(DbError::Connection("host db.internal:5432".into()));
        assert!(err.is_server_error());
        assert!(!err.client_message().contains("db.internal"));
    }

    #[test]
    fn test_ledger_shortfall_maps_to_insufficient_karma() {
        let err = EscrowError::from(LedgerError::InsufficientBalance {
            available: 20,
            required: 30,
        });
        assert_eq!(err.error_code(), ErrorCode::InsufficientKarma);
        assert!(err.client_message().contains("20"));
    }
}
