//! Health Check Handlers

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub database: ComponentStatus,
    pub scheduler_triggers: ComponentStatus,
}

/// Component status
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub name: String,
    /// healthy / unhealthy / disabled
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentStatus {
    fn new(name: &str, status: &str, error: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            status: status.to_string(),
            error,
        }
    }
}

/// Liveness: the process is up; dependencies are not checked
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().timestamp_millis(),
    })
}

/// Readiness: the store answers
///
/// An unconfigured cron secret is reported but does not fail readiness,
/// since in-process sweeps may be doing the work.
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let database = match state.engine.store().health_check().await {
        Ok(true) => ComponentStatus::new("store", "healthy", None),
        Ok(false) => ComponentStatus::new(
            "store",
            "unhealthy",
            Some("Store health check failed".to_string()),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            ComponentStatus::new("store", "unhealthy", Some("Store unreachable".to_string()))
        }
    };
    let ready = database.status == "healthy";

    let scheduler_triggers = if state.cron.is_configured() {
        ComponentStatus::new("cron", "healthy", None)
    } else {
        ComponentStatus::new("cron", "disabled", None)
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            status: if ready { "ready" } else { "not_ready" }.to_string(),
            database,
            scheduler_triggers,
        }),
    )
}
