pub mod approvals;
pub mod budget;
pub mod health;
pub mod webhooks;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};

use crate::budget::guard::check_budget;
use crate::db::AppState;
use crate::middleware::admin_auth;

/// Provider callbacks. Bodies up to twice the configured limit reach the
/// handler so oversize deliveries get a JSON `PAYLOAD_TOO_LARGE`.
pub fn webhook_router(max_body_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/webhooks/payment/{provider}",
            post(webhooks::handle_payment_webhook),
        )
        .layer(DefaultBodyLimit::max(max_body_bytes.saturating_mul(2)))
}

pub fn admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/approvals", post(approvals::request_approval))
        .route("/admin/approvals/{approval_id}", get(approvals::get_approval))
        .route(
            "/admin/approvals/{approval_id}/approve",
            post(approvals::approve_approval),
        )
        .route(
            "/admin/approvals/{approval_id}/execute",
            post(approvals::execute_approval),
        )
        .route(
            "/admin/webhooks/{provider}/dry-run",
            post(webhooks::dry_run_payment_webhook),
        )
        .route(
            "/admin/budget/usage",
            get(budget::get_usage).post(budget::record_usage),
        )
        .layer(middleware::from_fn_with_state(state, admin_auth))
}

pub fn ai_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/ai/preflight", post(budget::preflight))
        .layer(middleware::from_fn_with_state(state, check_budget))
}

pub fn public_router() -> Router<AppState> {
    Router::new().route("/health", get(health::health))
}
