use axum::http::HeaderMap;
use serde_json::Value;

use super::signature::verify_timestamped;
use super::{
    DEFAULT_EVENT_TYPE, NormalizedEvent, PaymentGateway, PaymentProvider, header_values,
    int_field, normalize_currency, str_field, timestamp_field,
};
use crate::config::WebhookSecrets;

const ALLOWED_EVENT_TYPES: &[&str] = &[
    "payment_succeeded",
    "payment.success",
    "payment_completed",
    "paid",
];

/// Generic billing provider. Signed with `X-Webhook-Timestamp` and
/// `X-Webhook-Signature` (comma-separated candidates allowed).
pub struct BillingGateway {
    secrets: WebhookSecrets,
    allow_unsigned: bool,
}

impl BillingGateway {
    pub fn new(secrets: WebhookSecrets, allow_unsigned: bool) -> Self {
        Self {
            secrets,
            allow_unsigned,
        }
    }
}

/// Field aliases shared with the stub provider.
pub(super) fn normalize_flat(payload: &Value) -> NormalizedEvent {
    let refund_amount_cents = int_field(
        payload,
        &[
            "refund_amount_cents",
            "refund_amount",
            "amount_refunded",
            "refund_amount_total",
        ],
    )
    .unwrap_or(0)
    .max(0);

    let event_type = str_field(payload, &["event_type", "eventType", "type"])
        .map(|t| t.to_lowercase())
        .unwrap_or_else(|| {
            if refund_amount_cents > 0 {
                "refund_succeeded".to_string()
            } else {
                DEFAULT_EVENT_TYPE.to_string()
            }
        });

    NormalizedEvent {
        provider_event_id: str_field(payload, &["provider_event_id", "event_id", "id"])
            .unwrap_or_default(),
        order_no: str_field(payload, &["order_no", "orderNo", "order"]).unwrap_or_default(),
        event_type,
        external_trade_no: str_field(payload, &["external_trade_no", "trade_no", "transaction_id"]),
        amount_cents: int_field(payload, &["amount_cents", "amount", "amount_total"]),
        currency: normalize_currency(str_field(payload, &["currency"])),
        refund_amount_cents,
        refund_reason: str_field(payload, &["refund_reason", "reason"]),
        paid_at: timestamp_field(payload, &["paid_at", "paidAt", "paid_time", "paidTime"]),
    }
}

impl PaymentGateway for BillingGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Billing
    }

    fn verify_signature(&self, headers: &HeaderMap, body: &[u8], now: i64) -> bool {
        if !self.secrets.is_configured() {
            if !self.allow_unsigned {
                tracing::warn!("Billing webhook rejected: no webhook secret configured");
            }
            return self.allow_unsigned;
        }

        let Some(timestamp) = headers
            .get("x-webhook-timestamp")
            .and_then(|v| v.to_str().ok())
        else {
            tracing::warn!("Billing webhook rejected: missing X-Webhook-Timestamp header");
            return false;
        };

        let candidates = header_values(headers, "x-webhook-signature");
        if candidates.is_empty() {
            tracing::warn!("Billing webhook rejected: missing X-Webhook-Signature header");
            return false;
        }

        verify_timestamped(&self.secrets, timestamp, &candidates, body, now)
    }

    fn normalize(&self, payload: &Value) -> NormalizedEvent {
        normalize_flat(payload)
    }

    fn allowed_event_types(&self) -> &'static [&'static str] {
        ALLOWED_EVENT_TYPES
    }
}
