//! Authentication error types
//!
//! Errors are informative for logs, safe for external exposure, and map onto
//! the shared [`ErrorCode`] taxonomy.

use mycelio_types::ErrorCode;
use thiserror::Error;

/// Result type alias for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Authentication error types
#[derive(Debug, Error)]
pub enum AuthError {
    // =========================================================================
    // Credential Errors
    // =========================================================================
    /// Missing, malformed or unknown credential. Deliberately uninformative.
    #[error("Invalid or missing API key")]
    Unauthorized,

    /// Authenticated, but the credential tier or identity is not permitted
    #[error("Insufficient permissions")]
    Forbidden,

    /// Source address is not on the allowlist
    #[error("Source address not allowed")]
    IpNotAllowed,

    // =========================================================================
    // Rate Limiting Errors
    // =========================================================================
    /// Rate limit exceeded
    #[error("Rate limit exceeded, try again in {retry_after} seconds")]
    RateLimitExceeded {
        /// Seconds until the oldest request leaves the window
        retry_after: u64,
    },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Cron secret is not configured
    #[error("Cron secret not configured")]
    NotConfigured,

    /// Cron secret is shorter than the production minimum
    #[error("Cron secret is too weak")]
    WeakSecret,

    #[error("Configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Credential hashing failed
    #[error("Credential hashing failed")]
    HashingFailed,

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Internal error (should not be exposed to clients)
    #[error("Internal error")]
    Internal(String),
}

impl AuthError {
    /// Machine-readable error code
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Unauthorized => ErrorCode::Unauthorized,
            Self::Forbidden | Self::IpNotAllowed => ErrorCode::Forbidden,
            Self::RateLimitExceeded { .. } => ErrorCode::RateLimited,
            Self::NotConfigured => ErrorCode::NotConfigured,
            Self::WeakSecret => ErrorCode::WeakSecret,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Config(_) | Self::HashingFailed | Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        self.error_code().http_status()
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Get safe message for client (doesn't leak internal details)
    pub fn client_message(&self) -> String {
        match self {
            Self::RateLimitExceeded { .. } => self.to_string(),
            _ => self.error_code().message().to_string(),
        }
    }

    /// Create a rate limit error with retry-after duration
    pub fn rate_limited(duration: std::time::Duration) -> Self {
        Self::RateLimitExceeded {
            retry_after: duration.as_secs().max(1),
        }
    }
}

impl From<mycelio_db::DbError> for AuthError {
    fn from(err: mycelio_db::DbError) -> Self {
        Self::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::Unauthorized.status_code(), 401);
        assert_eq!(AuthError::Forbidden.status_code(), 403);
        assert_eq!(AuthError::IpNotAllowed.status_code(), 403);
        assert_eq!(AuthError::RateLimitExceeded { retry_after: 60 }.status_code(), 429);
        assert_eq!(AuthError::NotConfigured.status_code(), 503);
        assert_eq!(AuthError::WeakSecret.status_code(), 503);
        assert_eq!(AuthError::Database("test".to_string()).status_code(), 500);
    }

    #[test]
    fn test_client_message_hides_internals() {
        let err = AuthError::Database("password authentication failed for user".to_string());
        assert_eq!(err.error_code(), ErrorCode::DatabaseError);
        assert!(!err.client_message().contains("password"));

        let err = AuthError::Internal("argon2 params".to_string());
        assert!(!err.client_message().contains("argon2"));
    }

    #[test]
    fn test_rate_limited_rounds_up_to_one_second() {
        let err = AuthError::rate_limited(std::time::Duration::from_millis(200));
        assert!(matches!(err, AuthError::RateLimitExceeded { retry_after: 1 }));
    }
}
