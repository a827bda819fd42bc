use axum::http::HeaderMap;
use serde_json::Value;

use super::signature::verify_timestamped;
use super::{
    DEFAULT_EVENT_TYPE, NormalizedEvent, PaymentGateway, PaymentProvider, int_field,
    normalize_currency, str_field, timestamp_field,
};
use crate::config::WebhookSecrets;

const ALLOWED_EVENT_TYPES: &[&str] = &[
    "payment_succeeded",
    "payment_intent.succeeded",
    "charge.succeeded",
    "checkout.session.completed",
    "invoice.payment_succeeded",
];

pub struct StripeGateway {
    secrets: WebhookSecrets,
    allow_unsigned: bool,
}

impl StripeGateway {
    pub fn new(secrets: WebhookSecrets, allow_unsigned: bool) -> Self {
        Self {
            secrets,
            allow_unsigned,
        }
    }
}

/// `Stripe-Signature: t=timestamp,v1=sig[,v1=sig]`
fn parse_signature_header(header: &str) -> (Option<&str>, Vec<&str>) {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(s) = part.strip_prefix("v1=") {
            signatures.push(s);
        }
    }
    (timestamp, signatures)
}

impl PaymentGateway for StripeGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    fn verify_signature(&self, headers: &HeaderMap, body: &[u8], now: i64) -> bool {
        if !self.secrets.is_configured() {
            if !self.allow_unsigned {
                tracing::warn!("Stripe webhook rejected: no webhook secret configured");
            }
            return self.allow_unsigned;
        }

        let Some(header) = headers
            .get("stripe-signature")
            .and_then(|v| v.to_str().ok())
        else {
            tracing::warn!("Stripe webhook rejected: missing Stripe-Signature header");
            return false;
        };

        let (timestamp, signatures) = parse_signature_header(header);
        match timestamp {
            Some(ts) if !signatures.is_empty() => {
                verify_timestamped(&self.secrets, ts, &signatures, body, now)
            }
            _ => {
                tracing::warn!("Stripe webhook rejected: malformed Stripe-Signature header");
                false
            }
        }
    }

    fn normalize(&self, payload: &Value) -> NormalizedEvent {
        let empty = Value::Object(Default::default());
        let object = payload
            .get("data")
            .and_then(|d| d.get("object"))
            .unwrap_or(&empty);
        let metadata = object.get("metadata").unwrap_or(&empty);

        let provider_event_id = str_field(payload, &["id"])
            .or_else(|| str_field(object, &["id", "charge", "payment_intent"]))
            .unwrap_or_default();

        let order_no = str_field(payload, &["order_no", "orderNo", "order"])
            .or_else(|| str_field(metadata, &["order_no", "orderNo"]))
            .unwrap_or_default();

        let refunds = object
            .get("refunds")
            .and_then(|r| r.get("data"))
            .and_then(Value::as_array);

        let refund_amount_cents = int_field(object, &["amount_refunded"])
            .filter(|a| *a > 0)
            .or_else(|| {
                refunds
                    .map(|list| {
                        list.iter()
                            .filter_map(|r| int_field(r, &["amount"]))
                            .sum::<i64>()
                    })
                    .filter(|sum| *sum > 0)
            })
            .or_else(|| int_field(payload, &["refund_amount_cents"]))
            .unwrap_or(0)
            .max(0);

        let refund_reason = refunds
            .and_then(|list| list.first())
            .and_then(|r| str_field(r, &["reason"]));

        let event_type = str_field(payload, &["type", "event_type"])
            .map(|t| t.to_lowercase())
            .unwrap_or_else(|| {
                if refund_amount_cents > 0 {
                    "charge.refunded".to_string()
                } else {
                    DEFAULT_EVENT_TYPE.to_string()
                }
            });

        NormalizedEvent {
            provider_event_id,
            order_no,
            event_type,
            external_trade_no: str_field(object, &["id", "charge", "payment_intent"]),
            amount_cents: int_field(object, &["amount", "amount_total", "amount_captured"])
                .or_else(|| int_field(payload, &["amount_cents"])),
            currency: normalize_currency(
                str_field(object, &["currency"]).or_else(|| str_field(payload, &["currency"])),
            ),
            refund_amount_cents,
            refund_reason,
            paid_at: timestamp_field(object, &["created"]),
        }
    }

    fn allowed_event_types(&self) -> &'static [&'static str] {
        ALLOWED_EVENT_TYPES
    }
}
