//! Request middleware that refuses AI work once a subject's budget is spent.

use axum::{
    Json,
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::{Value, json};

use super::{BudgetError, BudgetScope, Period};
use crate::db::AppState;
use crate::error::{ErrorCode, msg};

pub const MAX_ESTIMATED_TOKENS: i64 = 20_000;

/// Check the day and month buckets before the request runs.
pub async fn check_budget(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let config = state.budget.config();
    if !config.enabled {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, state.config.max_webhook_body_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                ErrorCode::PayloadTooLarge.as_ref(),
                msg::PAYLOAD_TOO_LARGE,
            );
        }
    };
    let input: Option<Value> = serde_json::from_slice(&bytes).ok();

    let subject = resolve_subject(&parts.headers, input.as_ref());
    let tokens = estimate_tokens(&bytes, input.as_ref());
    let cost = estimate_cost(tokens, config.cost_per_1k_tokens_usd);
    let scope = BudgetScope {
        provider: &config.provider,
        model: &config.model,
        subject: &subject,
    };

    let now = Utc::now();
    let checked = state
        .budget
        .check_and_throw(&scope, tokens, cost, Period::Day, now)
        .and_then(|_| {
            state
                .budget
                .check_and_throw(&scope, tokens, cost, Period::Month, now)
        });
    if let Err(e) = checked {
        return budget_error_response(&e);
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

/// `user:{id}` from `x-user-id`, else `anon:{id}` from `x-anon-id` or the
/// body's `anon_id`, else `unknown`.
pub fn resolve_subject(headers: &HeaderMap, input: Option<&Value>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    if let Some(user_id) = header("x-user-id") {
        return format!("user:{}", user_id);
    }
    let anon_id = header("x-anon-id").or_else(|| {
        input
            .and_then(|v| v.get("anon_id"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    });
    match anon_id {
        Some(anon_id) => format!("anon:{}", anon_id),
        None => "unknown".to_string(),
    }
}

/// An explicit `estimated_tokens` wins; otherwise one token per four bytes
/// of body. Always within `1..=MAX_ESTIMATED_TOKENS`.
pub fn estimate_tokens(body: &[u8], input: Option<&Value>) -> i64 {
    let explicit = input
        .and_then(|v| v.get("estimated_tokens"))
        .and_then(Value::as_i64)
        .filter(|t| *t > 0);
    let tokens = explicit.unwrap_or_else(|| (body.len() as i64 + 3) / 4);
    tokens.clamp(1, MAX_ESTIMATED_TOKENS)
}

pub fn estimate_cost(tokens: i64, rate_per_1k: f64) -> f64 {
    if rate_per_1k <= 0.0 {
        return 0.0;
    }
    let cost = tokens as f64 / 1000.0 * rate_per_1k;
    (cost * 1_000_000.0).round() / 1_000_000.0
}

fn budget_error_response(error: &BudgetError) -> Response {
    match error {
        BudgetError::Exceeded { .. } => error_response(
            StatusCode::TOO_MANY_REQUESTS,
            error.code().as_ref(),
            "AI budget exceeded. Try again later.",
        ),
        BudgetError::LedgerUnavailable(_) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            error.code().as_ref(),
            "AI budget ledger unavailable.",
        ),
    }
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "ok": false,
            "error": code,
            "error_code": code,
            "message": message,
        })),
    )
        .into_response()
}
