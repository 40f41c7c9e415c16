//! API Error Types
//!
//! Every failure leaves the API as the uniform envelope
//! `{"success": false, "error": {"code", "message", "details"?}}` with the
//! status implied by its [`ErrorCode`].
//!
//! Field-level validation details are rendered only when the router exposes
//! them (see [`crate::middleware::expose_error_details`]); the body produced
//! here never carries them.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use mycelio_auth::AuthError;
use mycelio_core::EscrowError;
use mycelio_types::{ApiResponse, ErrorBody, ErrorCode};
use thiserror::Error;

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// API error
#[derive(Debug, Error)]
pub enum ApiError {
    // =========================================================================
    // Domain Errors
    // =========================================================================
    #[error(transparent)]
    Escrow(#[from] EscrowError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    // =========================================================================
    // Request Errors
    // =========================================================================
    /// Body or query string could not be decoded
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Body exceeds the configured limit
    #[error("Request body too large")]
    BodyTooLarge,

    /// No route for this path
    #[error("Resource not found")]
    NotFound,
}

/// Full error body, kept aside for [`crate::middleware::expose_error_details`]
#[derive(Debug, Clone)]
pub struct DetailedError(pub ErrorBody);

impl ApiError {
    /// Machine-readable error code
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Escrow(err) => err.error_code(),
            Self::Auth(err) => err.error_code(),
            Self::InvalidRequest(_) => ErrorCode::ValidationError,
            Self::BodyTooLarge => ErrorCode::PayloadTooLarge,
            Self::NotFound => ErrorCode::NotFound,
        }
    }

    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.error_code().http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Message safe to return to the caller
    pub fn client_message(&self) -> String {
        match self {
            Self::Escrow(err) => err.client_message(),
            Self::Auth(err) => err.client_message(),
            other => other.to_string(),
        }
    }

    /// Seconds the caller should wait before retrying
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Auth(AuthError::RateLimitExceeded { retry_after }) => Some(*retry_after),
            _ => None,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Escrow(err) => err.details().cloned(),
            Self::InvalidRequest(reason) => Some(serde_json::json!({ "reason": reason })),
            _ => None,
        }
    }

    fn log(&self) {
        if self.error_code().is_server_error() {
            tracing::error!(error = %self, code = %self.error_code(), "Request failed");
        } else {
            tracing::debug!(error = %self, code = %self.error_code(), "Request rejected");
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.status_code();
        let mut body = ErrorBody::new(self.error_code());
        body.message = self.client_message();

        let detailed = self
            .details()
            .map(|details| DetailedError(body.clone().with_details(details)));

        let mut response = (status, Json(ApiResponse::<()>::err(body))).into_response();

        if let Some(retry_after) = self.retry_after() {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        if let Some(detailed) = detailed {
            response.extensions_mut().insert(detailed);
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mycelio_types::{TaskId, TaskStatus};

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::Auth(AuthError::Unauthorized).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::InvalidRequest("bad".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ApiError::BodyTooLarge.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            ApiError::Escrow(EscrowError::TaskAlreadyClaimed {
                task_id: TaskId::new(),
                status: TaskStatus::Locked,
            })
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Escrow(EscrowError::BountyTooLow { bounty: 5, min: 10 }).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_internal_detail_is_hidden() {
        let err = ApiError::Escrow(EscrowError::Database("relation \"agents\" does not exist".into()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.client_message().contains("agents"));
    }

    #[test]
    fn test_rate_limit_sets_retry_after() {
        let response = ApiError::Auth(AuthError::RateLimitExceeded { retry_after: 42 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }

    #[test]
    fn test_details_are_kept_out_of_band() {
        let response = ApiError::InvalidRequest("missing field `bounty`".into()).into_response();
        let detailed = response.extensions().get::<DetailedError>().unwrap();
        assert_eq!(detailed.0.code, ErrorCode::ValidationError);
        assert!(detailed.0.details.is_some());
    }
}
