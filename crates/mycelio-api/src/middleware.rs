//! API Middleware

use std::time::Instant;

use axum::{
    extract::Request,
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use mycelio_types::ApiResponse;

use crate::error::{ApiError, DetailedError};

/// Re-render error bodies with their field-level details
///
/// Installed only outside production.
pub async fn expose_error_details(mut response: Response) -> Response {
    let Some(DetailedError(body)) = response.extensions_mut().remove::<DetailedError>() else {
        return response;
    };

    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    let rendered = Json(ApiResponse::<()>::err(body)).into_response();
    let (_, body) = rendered.into_parts();
    Response::from_parts(parts, body)
}

/// Request timing middleware
pub async fn timing_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();

    let response = next.run(req).await;

    let elapsed = start.elapsed();
    if elapsed.as_millis() > 1000 {
        tracing::warn!(
            method = %method,
            uri = %uri,
            elapsed_ms = elapsed.as_millis() as u64,
            "Slow request detected"
        );
    } else {
        tracing::debug!(
            method = %method,
            uri = %uri,
            elapsed_ms = elapsed.as_millis() as u64,
            status = response.status().as_u16(),
            "Request completed"
        );
    }

    response
}

/// Fallback for unknown routes
pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_details_hidden_by_default() {
        let response = ApiError::InvalidRequest("missing field".into()).into_response();
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
        assert!(json["error"].get("details").is_none());
    }

    #[tokio::test]
    async fn test_details_exposed() {
        let response = ApiError::InvalidRequest("missing field".into()).into_response();
        let response = expose_error_details(response).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = body_json(response).await;
        assert_eq!(json["error"]["details"]["reason"], "missing field");
    }

    #[tokio::test]
    async fn test_success_untouched() {
        let response = (StatusCode::CREATED, "ok").into_response();
        let response = expose_error_details(response).await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
