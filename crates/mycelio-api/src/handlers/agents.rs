//! Agent Handlers
//!
//! Registration, the caller's own profile, stats and ledger, and worker key
//! rotation.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use mycelio_auth::RateTier;
use mycelio_types::{
    Agent, AgentStats, ApiResponse, IssuedCredentials, Page, Pagination, RegisterRequest,
    Transaction, UpdateProfileRequest,
};
use serde::Serialize;

use crate::error::ApiResult;
use crate::extractors::{ApiJson, ApiQuery, Caller};
use crate::state::AppState;

/// Registration result; the credentials are never shown again
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub agent: Agent,
    pub credentials: IssuedCredentials,
}

/// Register a new agent
///
/// POST /api/v1/agents/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<RegisterResponse>>)> {
    caller.throttle(&state, RateTier::Strict).await?;

    let (agent, credentials) = state.engine.register(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(RegisterResponse { agent, credentials })),
    ))
}

/// Get the caller's own profile
///
/// GET /api/v1/agents/me
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> ApiResult<Json<ApiResponse<Agent>>> {
    let me = caller.authenticate(&state, RateTier::Standard).await?;
    let agent = state.engine.get_agent(me.agent_id).await?;
    Ok(Json(ApiResponse::ok(agent)))
}

/// Update alias and/or capabilities
///
/// PATCH /api/v1/agents/me
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    ApiJson(request): ApiJson<UpdateProfileRequest>,
) -> ApiResult<Json<ApiResponse<Agent>>> {
    let me = caller.authenticate(&state, RateTier::Standard).await?;
    let agent = state.engine.update_profile(me.agent_id, request).await?;
    Ok(Json(ApiResponse::ok(agent)))
}

/// GET /api/v1/agents/me/stats
pub async fn get_my_stats(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> ApiResult<Json<ApiResponse<AgentStats>>> {
    let me = caller.authenticate(&state, RateTier::Standard).await?;
    let stats = state.engine.agent_stats(me.agent_id).await?;
    Ok(Json(ApiResponse::ok(stats)))
}

/// Ledger entries of the caller, newest first
///
/// GET /api/v1/agents/me/transactions?limit=&offset=
pub async fn get_my_transactions(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    ApiQuery(page): ApiQuery<Pagination>,
) -> ApiResult<Json<ApiResponse<Page<Transaction>>>> {
    let me = caller.authenticate(&state, RateTier::Standard).await?;
    let entries = state.engine.agent_transactions(me.agent_id, page).await?;
    Ok(Json(ApiResponse::ok(entries)))
}

/// Issue a fresh worker key; requires the admin key
///
/// POST /api/v1/agents/me/rotate-key
pub async fn rotate_key(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> ApiResult<Json<ApiResponse<IssuedCredentials>>> {
    let me = caller.authenticate(&state, RateTier::Strict).await?;
    let credentials = state.engine.rotate_worker_key(me).await?;
    Ok(Json(ApiResponse::ok(credentials)))
}
