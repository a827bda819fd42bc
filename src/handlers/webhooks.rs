//! `POST /webhooks/payment/{provider}`: the provider-facing entry point.
//!
//! The handler only deals with transport concerns (size, JSON, signature,
//! org lookup). Settlement belongs to `WebhookProcessor`.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::Value;

use crate::commerce::{HandleOptions, WebhookOutcome, WebhookProcessor};
use crate::db::{AppState, queries};
use crate::error::{ErrorCode, msg};
use crate::payments::PaymentGateway;
use crate::util::summarize_payload;

/// Org used when no order matches the delivery; the processor then
/// records the event as an orphan.
const UNKNOWN_ORG: i64 = 0;

pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let provider = provider.trim().to_lowercase();
    let (gateway, payload) = match accept(&state, &provider, &body) {
        Ok(accepted) => accepted,
        Err(outcome) => return outcome.into_response(),
    };

    let signature_ok = gateway.verify_signature(&headers, &body, queries::now());
    let event = gateway.normalize(&payload);
    let org_id = resolve_org(&state, &event.order_no);

    tracing::debug!(
        provider = %provider,
        order_no = %event.order_no,
        provider_event_id = %event.provider_event_id,
        signature_ok,
        "Payment webhook received"
    );

    let options = HandleOptions {
        signature_ok,
        amount_bypass: false,
        payload_meta: Some(summarize_payload(&body)),
    };
    WebhookProcessor::new(&state)
        .handle(&provider, &payload, org_id, options)
        .await
        .into_response()
}

/// `POST /admin/webhooks/{provider}/dry-run`: validate without writing.
pub async fn dry_run_payment_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let provider = provider.trim().to_lowercase();
    let (gateway, payload) = match accept(&state, &provider, &body) {
        Ok(accepted) => accepted,
        Err(outcome) => return outcome.into_response(),
    };
    let signature_ok = gateway.verify_signature(&headers, &body, queries::now());
    WebhookProcessor::new(&state)
        .evaluate_dry_run(&provider, &payload, signature_ok)
        .into_response()
}

/// Size limit, provider lookup and JSON parsing, in that order.
fn accept<'a>(
    state: &'a AppState,
    provider: &str,
    body: &[u8],
) -> Result<(&'a dyn PaymentGateway, Value), WebhookOutcome> {
    if body.len() > state.config.max_webhook_body_bytes {
        tracing::warn!(
            provider,
            size = body.len(),
            "Webhook rejected: payload too large"
        );
        return Err(WebhookOutcome::failure(
            ErrorCode::PayloadTooLarge,
            msg::PAYLOAD_TOO_LARGE,
            StatusCode::PAYLOAD_TOO_LARGE,
        ));
    }

    let Some(gateway) = state.gateways.get(provider) else {
        return Err(WebhookOutcome::failure(
            ErrorCode::NotFound,
            msg::PROVIDER_NOT_SUPPORTED,
            StatusCode::NOT_FOUND,
        ));
    };

    match serde_json::from_slice::<Value>(body) {
        Ok(payload) if payload.is_object() => Ok((gateway, payload)),
        _ => Err(WebhookOutcome::failure(
            ErrorCode::InvalidJson,
            msg::INVALID_JSON,
            StatusCode::BAD_REQUEST,
        )),
    }
}

fn resolve_org(state: &AppState, order_no: &str) -> i64 {
    let order_no = order_no.trim();
    if order_no.is_empty() {
        return UNKNOWN_ORG;
    }
    let lookup = state
        .db
        .get()
        .map_err(crate::error::AppError::from)
        .and_then(|conn| queries::find_order_by_no(&conn, order_no));
    match lookup {
        Ok(Some(order)) => order.org_id,
        Ok(None) => UNKNOWN_ORG,
        Err(e) => {
            tracing::warn!(order_no, "Org lookup for webhook failed: {}", e);
            UNKNOWN_ORG
        }
    }
}
