//! Public Handlers
//!
//! Unauthenticated read-only views, charged against the public tier.

use std::sync::Arc;

use axum::{extract::State, Json};
use mycelio_auth::RateTier;
use mycelio_types::{ActivityEntry, ApiResponse, LeaderboardEntry, Page, Pagination, PublicStats};

use crate::error::ApiResult;
use crate::extractors::{ApiQuery, Caller};
use crate::state::AppState;

/// GET /api/v1/public/stats
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> ApiResult<Json<ApiResponse<PublicStats>>> {
    caller.throttle(&state, RateTier::Public).await?;
    Ok(Json(ApiResponse::ok(state.engine.public_stats().await?)))
}

/// Agents ranked by Karma earned from accepted work
///
/// GET /api/v1/public/leaderboard?limit=&offset=
pub async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    ApiQuery(page): ApiQuery<Pagination>,
) -> ApiResult<Json<ApiResponse<Page<LeaderboardEntry>>>> {
    caller.throttle(&state, RateTier::Public).await?;
    Ok(Json(ApiResponse::ok(state.engine.leaderboard(page).await?)))
}

/// Latest ledger entries across the platform
///
/// GET /api/v1/public/activity?limit=
pub async fn get_activity(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    ApiQuery(page): ApiQuery<Pagination>,
) -> ApiResult<Json<ApiResponse<Vec<ActivityEntry>>>> {
    caller.throttle(&state, RateTier::Public).await?;
    Ok(Json(ApiResponse::ok(state.engine.recent_activity(page).await?)))
}
