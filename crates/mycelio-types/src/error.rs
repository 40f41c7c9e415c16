//! Machine-readable error taxonomy
//!
//! Every failure a client can observe maps to exactly one [`ErrorCode`].
//! Each code carries a fixed, client-safe message and an HTTP status; internal
//! detail never travels with it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Client-facing error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // =========================================================================
    // Authentication & Authorization
    // =========================================================================
    Unauthorized,
    Forbidden,

    // =========================================================================
    // Resources
    // =========================================================================
    NotFound,
    TaskNotFound,

    // =========================================================================
    // Business rejections
    // =========================================================================
    TaskAlreadyClaimed,
    BountyTooLow,
    InsufficientKarma,
    TaskNotSubmittable,
    TaskNotSettlable,
    TaskNotCancelable,

    // =========================================================================
    // Input
    // =========================================================================
    PayloadTooLarge,
    ValidationError,
    RateLimited,

    // =========================================================================
    // Server
    // =========================================================================
    DatabaseError,
    InternalError,
    NotConfigured,
    WeakSecret,
}

impl ErrorCode {
    /// Wire representation, e.g. `TASK_ALREADY_CLAIMED`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::TaskNotFound => "TASK_NOT_FOUND",
            Self::TaskAlreadyClaimed => "TASK_ALREADY_CLAIMED",
            Self::BountyTooLow => "BOUNTY_TOO_LOW",
            Self::InsufficientKarma => "INSUFFICIENT_KARMA",
            Self::TaskNotSubmittable => "TASK_NOT_SUBMITTABLE",
            Self::TaskNotSettlable => "TASK_NOT_SETTLABLE",
            Self::TaskNotCancelable => "TASK_NOT_CANCELABLE",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::RateLimited => "RATE_LIMITED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::NotConfigured => "NOT_CONFIGURED",
            Self::WeakSecret => "WEAK_SECRET",
        }
    }

    /// Fixed client-safe message
    pub fn message(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Invalid or missing API key",
            Self::Forbidden => "Insufficient permissions",
            Self::NotFound => "Resource not found",
            Self::TaskNotFound => "Task not found",
            Self::TaskAlreadyClaimed => "Task has already been claimed",
            Self::BountyTooLow => "Bounty is below the minimum",
            Self::InsufficientKarma => "Insufficient karma balance",
            Self::TaskNotSubmittable => "Task is not in submittable state",
            Self::TaskNotSettlable => "Task is not in settlable state",
            Self::TaskNotCancelable => "Task cannot be cancelled",
            Self::PayloadTooLarge => "Payload exceeds 64KB limit",
            Self::ValidationError => "Invalid input data",
            Self::RateLimited => "Too many requests, please try again later",
            Self::DatabaseError => "Database operation failed",
            Self::InternalError => "An unexpected error occurred",
            Self::NotConfigured => "Service not properly configured",
            Self::WeakSecret => "Service configuration error",
        }
    }

    /// HTTP status code for this error
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BountyTooLow
            | Self::InsufficientKarma
            | Self::TaskNotSubmittable
            | Self::TaskNotSettlable
            | Self::TaskNotCancelable => 400,

            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound | Self::TaskNotFound => 404,
            Self::TaskAlreadyClaimed => 409,
            Self::PayloadTooLarge => 413,
            Self::ValidationError => 422,
            Self::RateLimited => 429,
            Self::DatabaseError | Self::InternalError => 500,
            Self::NotConfigured | Self::WeakSecret => 503,
        }
    }

    /// Whether the failure originates on the server side
    pub fn is_server_error(&self) -> bool {
        self.http_status() >= 500
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
