//! AI budget endpoints: a guarded preflight plus admin usage reporting.

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::budget::guard::{estimate_cost, estimate_tokens, resolve_subject};
use crate::budget::{BudgetError, BudgetScope, Period};
use crate::db::AppState;

/// Reached only when `check_budget` let the call through.
pub async fn preflight(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    let config = state.budget.config();
    let input: Option<Value> = serde_json::from_slice(&body).ok();
    let tokens = estimate_tokens(&body, input.as_ref());
    Json(json!({
        "ok": true,
        "subject": resolve_subject(&headers, input.as_ref()),
        "provider": config.provider,
        "model": config.model,
        "estimated_tokens": tokens,
        "estimated_cost_usd": estimate_cost(tokens, config.cost_per_1k_tokens_usd),
    }))
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub subject: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordUsage {
    pub subject: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tokens_in: i64,
    #[serde(default)]
    pub tokens_out: i64,
    #[serde(default)]
    pub cost_usd: f64,
}

pub async fn get_usage(State(state): State<AppState>, Query(query): Query<UsageQuery>) -> Response {
    let config = state.budget.config();
    let scope = BudgetScope {
        provider: query.provider.as_deref().unwrap_or(&config.provider),
        model: query.model.as_deref().unwrap_or(&config.model),
        subject: &query.subject,
    };
    let now = Utc::now();
    let usage = state
        .budget
        .get_usage(&scope, Period::Day, now)
        .and_then(|day| {
            let month = state.budget.get_usage(&scope, Period::Month, now)?;
            Ok((day, month))
        });
    match usage {
        Ok((day, month)) => Json(json!({
            "ok": true,
            "subject": query.subject,
            "day": day,
            "month": month,
            "limits": {
                "daily_tokens": config.daily_tokens,
                "daily_usd": config.daily_usd,
                "monthly_tokens": config.monthly_tokens,
                "monthly_usd": config.monthly_usd,
            },
        }))
        .into_response(),
        Err(e) => ledger_error(&e),
    }
}

/// Record a finished AI call against both buckets.
pub async fn record_usage(State(state): State<AppState>, Json(input): Json<RecordUsage>) -> Response {
    let config = state.budget.config();
    let scope = BudgetScope {
        provider: input.provider.as_deref().unwrap_or(&config.provider),
        model: input.model.as_deref().unwrap_or(&config.model),
        subject: &input.subject,
    };
    match state.budget.increment_tokens(
        &scope,
        input.tokens_in,
        input.tokens_out,
        input.cost_usd,
        Utc::now(),
    ) {
        Ok(snapshot) => Json(json!({ "ok": true, "usage": snapshot })).into_response(),
        Err(e) => ledger_error(&e),
    }
}

fn ledger_error(error: &BudgetError) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "ok": false,
            "error_code": error.code().as_ref(),
            "message": error.to_string(),
        })),
    )
        .into_response()
}
