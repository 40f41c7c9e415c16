//! Scheduler Trigger Handlers
//!
//! External schedulers drive one sweep per call. Both GET and POST are
//! accepted, since hosted cron services differ in the method they use.

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use mycelio_types::ApiResponse;
use serde::Serialize;

use crate::error::ApiResult;
use crate::extractors::Caller;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ReclaimResponse {
    pub reclaimed_count: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AutoSettleResponse {
    pub settled_count: usize,
    pub timestamp: DateTime<Utc>,
}

fn guard(state: &AppState, caller: &Caller) -> ApiResult<()> {
    let source = state.cron.source_address(caller.peer, caller.forwarded);
    state.cron.verify(caller.authorization(), source)?;
    Ok(())
}

/// Return expired claims to the open pool
///
/// /api/v1/cron/reclaim
pub async fn reclaim(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> ApiResult<Json<ApiResponse<ReclaimResponse>>> {
    guard(&state, &caller)?;
    let reclaimed_count = state.reclaimer.run_once().await?;
    Ok(Json(ApiResponse::ok(ReclaimResponse {
        reclaimed_count,
        timestamp: state.engine.clock().now(),
    })))
}

/// Accept submissions whose publisher never settled
///
/// /api/v1/cron/auto-settle
pub async fn auto_settle(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> ApiResult<Json<ApiResponse<AutoSettleResponse>>> {
    guard(&state, &caller)?;
    let settled_count = state.settler.run_once().await?;
    Ok(Json(ApiResponse::ok(AutoSettleResponse {
        settled_count,
        timestamp: state.engine.clock().now(),
    })))
}
