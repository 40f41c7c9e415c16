//! Task Handlers
//!
//! Publish, read, and the four lifecycle transitions. Every transition answers
//! with the authoritative task; `replayed` is true when the request repeated
//! an effect that already held.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use mycelio_auth::RateTier;
use mycelio_core::Outcome;
use mycelio_types::{ApiResponse, PublishTaskRequest, SettleTaskRequest, SubmitTaskRequest, Task};
use serde::Serialize;

use crate::error::ApiResult;
use crate::extractors::{parse_task_id, ApiJson, Caller};
use crate::state::AppState;

/// A task plus whether this response is a replay
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    #[serde(flatten)]
    pub task: Task,
    pub replayed: bool,
}

impl From<Outcome<Task>> for TaskResponse {
    fn from(outcome: Outcome<Task>) -> Self {
        Self {
            task: outcome.value,
            replayed: outcome.replayed,
        }
    }
}

type TaskReply = ApiResult<Json<ApiResponse<TaskResponse>>>;

fn reply(outcome: Outcome<Task>) -> TaskReply {
    Ok(Json(ApiResponse::ok(outcome.into())))
}

/// Publish a task, escrowing its bounty
///
/// POST /api/v1/tasks
///
/// 201 on creation, 200 when an idempotency key replays an earlier publish.
pub async fn publish_task(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    ApiJson(request): ApiJson<PublishTaskRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<TaskResponse>>)> {
    let me = caller.authenticate(&state, RateTier::Task).await?;
    let outcome = state.engine.publish(me.agent_id, request).await?;
    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(ApiResponse::ok(outcome.into()))))
}

/// GET /api/v1/tasks/:task_id
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(task_id): Path<String>,
) -> ApiResult<Json<ApiResponse<Task>>> {
    caller.authenticate(&state, RateTier::Standard).await?;
    let task = state.engine.get_task(parse_task_id(&task_id)?).await?;
    Ok(Json(ApiResponse::ok(task)))
}

/// POST /api/v1/tasks/:task_id/claim
pub async fn claim_task(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(task_id): Path<String>,
) -> TaskReply {
    let me = caller.authenticate(&state, RateTier::Task).await?;
    reply(state.engine.claim(me.agent_id, parse_task_id(&task_id)?).await?)
}

/// POST /api/v1/tasks/:task_id/submit
pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(task_id): Path<String>,
    ApiJson(request): ApiJson<SubmitTaskRequest>,
) -> TaskReply {
    let me = caller.authenticate(&state, RateTier::Task).await?;
    let task_id = parse_task_id(&task_id)?;
    reply(state.engine.submit(me.agent_id, task_id, request.result).await?)
}

/// POST /api/v1/tasks/:task_id/settle
pub async fn settle_task(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(task_id): Path<String>,
    ApiJson(request): ApiJson<SettleTaskRequest>,
) -> TaskReply {
    let me = caller.authenticate(&state, RateTier::Task).await?;
    let task_id = parse_task_id(&task_id)?;
    reply(state.engine.settle(me.agent_id, task_id, request.accept).await?)
}

/// POST /api/v1/tasks/:task_id/cancel
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(task_id): Path<String>,
) -> TaskReply {
    let me = caller.authenticate(&state, RateTier::Task).await?;
    reply(state.engine.cancel(me.agent_id, parse_task_id(&task_id)?).await?)
}
