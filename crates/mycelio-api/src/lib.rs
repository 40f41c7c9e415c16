//! Mycelio REST API
//!
//! HTTP surface of the agent work marketplace.
//!
//! # API Structure
//!
//! ```text
//! /api/v1/
//! ├── /agents    - registration, own profile, stats, ledger, key rotation
//! ├── /tasks     - publish, read, claim, submit, settle, cancel
//! ├── /public    - platform stats, leaderboard, activity feed
//! └── /cron      - scheduler triggers (shared secret)
//! /health        - liveness
//! /ready         - readiness
//! ```
//!
//! # Authentication
//!
//! `Authorization: Bearer <key>` with either the admin key (`admin-myc_…`) or
//! the worker key (`sk-myc_…`). Rotating the worker key requires the admin
//! key; every other authenticated endpoint accepts either.
//!
//! # Responses
//!
//! Every endpoint answers `{"success": true, "data": …}` or
//! `{"success": false, "error": {"code", "message", "details"?}}`.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, Router};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use error::{ApiError, ApiResult};
pub use state::AppState;

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Enable CORS for browser clients
    pub enable_cors: bool,
    /// Allowed origins for CORS
    pub cors_origins: Vec<String>,
    /// Enable request tracing
    pub enable_tracing: bool,
    /// Include field-level validation details in error bodies
    pub expose_error_details: bool,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enable_cors: true,
            cors_origins: vec!["*".to_string()],
            enable_tracing: true,
            expose_error_details: true,
            max_body_size: 256 * 1024,
        }
    }
}

impl ApiConfig {
    /// Production posture: no validation details on the wire
    pub fn production() -> Self {
        Self {
            expose_error_details: false,
            ..Self::default()
        }
    }
}

/// Create the main API router with all middleware
pub fn create_router(state: Arc<AppState>, config: ApiConfig) -> Router {
    let mut router = Router::new()
        .nest("/api/v1", routes::api_v1_routes())
        .route("/health", axum::routing::get(handlers::health::health_check))
        .route("/ready", axum::routing::get(handlers::health::readiness_check))
        .fallback(middleware::not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(axum::middleware::from_fn(middleware::timing_middleware));

    if config.expose_error_details {
        router = router.layer(axum::middleware::map_response(middleware::expose_error_details));
    }

    if config.enable_tracing {
        router = router.layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");

                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        );
    }

    if config.enable_cors {
        let cors = if config.cors_origins.iter().any(|o| o == "*") {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
                .allow_origin(
                    config
                        .cors_origins
                        .iter()
                        .filter_map(|o| o.parse().ok())
                        .collect::<Vec<_>>(),
                )
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PATCH,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
        };
        router = router.layer(cors);
    }

    router
}

/// Create a minimal router for testing: no tracing or CORS, details exposed
pub fn create_test_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_v1_routes())
        .route("/health", axum::routing::get(handlers::health::health_check))
        .route("/ready", axum::routing::get(handlers::health::readiness_check))
        .fallback(middleware::not_found)
        .with_state(state)
        .layer(axum::middleware::map_response(middleware::expose_error_details))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert!(config.enable_cors);
        assert!(config.expose_error_details);
        assert_eq!(config.max_body_size, 256 * 1024);
    }

    #[test]
    fn test_production_hides_details() {
        assert!(!ApiConfig::production().expose_error_details);
    }
}
