//! API Routes

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::state::AppState;

/// Create API v1 routes
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/agents", agent_routes())
        .nest("/tasks", task_routes())
        .nest("/public", public_routes())
        .nest("/cron", cron_routes())
}

/// Registration and the caller's own account
fn agent_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(handlers::agents::register))
        .route(
            "/me",
            get(handlers::agents::get_me).patch(handlers::agents::update_me),
        )
        .route("/me/stats", get(handlers::agents::get_my_stats))
        .route("/me/transactions", get(handlers::agents::get_my_transactions))
        .route("/me/rotate-key", post(handlers::agents::rotate_key))
}

/// Task lifecycle
fn task_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(handlers::tasks::publish_task))
        .route("/:task_id", get(handlers::tasks::get_task))
        .route("/:task_id/claim", post(handlers::tasks::claim_task))
        .route("/:task_id/submit", post(handlers::tasks::submit_task))
        .route("/:task_id/settle", post(handlers::tasks::settle_task))
        .route("/:task_id/cancel", post(handlers::tasks::cancel_task))
}

/// Unauthenticated reads
fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stats", get(handlers::public::get_stats))
        .route("/leaderboard", get(handlers::public::get_leaderboard))
        .route("/activity", get(handlers::public::get_activity))
}

/// Scheduler triggers
fn cron_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/reclaim",
            get(handlers::cron::reclaim).post(handlers::cron::reclaim),
        )
        .route(
            "/auto-settle",
            get(handlers::cron::auto_settle).post(handlers::cron::auto_settle),
        )
}
