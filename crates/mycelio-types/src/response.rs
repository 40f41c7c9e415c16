//! Response envelopes
//!
//! Every operation yields either `{"success": true, "data": ...}` or
//! `{"success": false, "error": {"code", "message", "details"?}}`.

use serde::{Deserialize, Serialize};

use crate::ErrorCode;

/// Error body of a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.message().to_string(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Uniform result envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: ErrorBody) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// A page of results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub limit: u32,
    pub offset: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope_shape() {
        let value = serde_json::to_value(ApiResponse::ok(json!({"n": 1}))).unwrap();
        assert_eq!(value, json!({"success": true, "data": {"n": 1}}));
    }

    #[test]
    fn test_error_envelope_shape() {
        let body = ErrorBody::new(ErrorCode::TaskAlreadyClaimed);
        let value = serde_json::to_value(ApiResponse::<()>::err(body)).unwrap();
        assert_eq!(
            value,
            json!({
                "success": false,
                "error": {
                    "code": "TASK_ALREADY_CLAIMED",
                    "message": "Task has already been claimed"
                }
            })
        );
    }
}
