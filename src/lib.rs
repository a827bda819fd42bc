//! paysettle: payment webhook settlement, two-person approvals and an AI
//! spend circuit breaker over SQLite.

pub mod approvals;
pub mod budget;
pub mod commerce;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod handlers;
pub mod id;
pub mod idempotency;
pub mod jobs;
pub mod lock;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod util;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::db::AppState;

/// The full HTTP surface, ready to serve.
pub fn app(state: AppState) -> Router {
    let max_body = state.config.max_webhook_body_bytes;
    Router::new()
        .merge(handlers::public_router())
        .merge(handlers::webhook_router(max_body))
        .merge(handlers::admin_router(state.clone()))
        .merge(handlers::ai_router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
