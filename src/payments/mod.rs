//! Payment providers: signature verification and payload normalization.
//!
//! Each provider implements `PaymentGateway`. The settlement engine only sees
//! the provider-agnostic `NormalizedEvent`.

mod billing;
pub mod signature;
mod stripe;
mod stub;

pub use billing::BillingGateway;
pub use stripe::StripeGateway;
pub use stub::StubGateway;

use std::collections::BTreeMap;

use axum::http::HeaderMap;
use serde::Serialize;
use serde_json::Value;
use strum::{AsRefStr, EnumString};

use crate::config::Config;

pub const DEFAULT_EVENT_TYPE: &str = "payment_succeeded";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentProvider {
    Stripe,
    Billing,
    Stub,
}

impl PaymentProvider {
    /// Trimmed, case-insensitive lookup.
    pub fn parse(name: &str) -> Option<Self> {
        name.trim().to_lowercase().parse().ok()
    }
}

/// Provider-agnostic view of a webhook payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizedEvent {
    pub provider_event_id: String,
    pub order_no: String,
    pub event_type: String,
    pub external_trade_no: Option<String>,
    pub amount_cents: Option<i64>,
    /// Uppercased; empty when the payload carried none.
    pub currency: String,
    pub refund_amount_cents: i64,
    pub refund_reason: Option<String>,
    pub paid_at: Option<i64>,
}

impl NormalizedEvent {
    pub fn is_refund(&self) -> bool {
        self.event_type.contains("refund") || self.refund_amount_cents > 0
    }

    pub fn has_identity(&self) -> bool {
        !self.provider_event_id.is_empty() && !self.order_no.is_empty()
    }
}

pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Verify the request signature. Returns false on any failure, including
    /// a missing secret outside environments that allow unsigned webhooks.
    fn verify_signature(&self, headers: &HeaderMap, body: &[u8], now: i64) -> bool;

    fn normalize(&self, payload: &Value) -> NormalizedEvent;

    /// Event types that may settle an order.
    fn allowed_event_types(&self) -> &'static [&'static str];

    fn is_allowed_event_type(&self, event_type: &str) -> bool {
        let event_type = event_type.trim().to_lowercase();
        self.allowed_event_types().iter().any(|t| *t == event_type)
    }
}

/// Registered gateways, keyed by provider.
pub struct GatewayRegistry {
    gateways: BTreeMap<PaymentProvider, Box<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn empty() -> Self {
        Self {
            gateways: BTreeMap::new(),
        }
    }

    /// Stripe and billing are always present; the stub gateway only in
    /// non-production environments.
    pub fn from_config(config: &Config) -> Self {
        let allow_unsigned = config.environment.allows_unsigned_webhooks();
        let mut registry = Self::empty()
            .with(StripeGateway::new(config.stripe.clone(), allow_unsigned))
            .with(BillingGateway::new(config.billing.clone(), allow_unsigned));
        if config.environment.allows_stub_provider() {
            registry = registry.with(StubGateway);
        }
        registry
    }

    pub fn with(mut self, gateway: impl PaymentGateway + 'static) -> Self {
        self.gateways.insert(gateway.provider(), Box::new(gateway));
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn PaymentGateway> {
        let provider = PaymentProvider::parse(name)?;
        self.gateways.get(&provider).map(|g| g.as_ref())
    }

    pub fn providers(&self) -> Vec<PaymentProvider> {
        self.gateways.keys().copied().collect()
    }
}

// ============ JSON field helpers ============

/// First non-empty string (or number rendered as string) among `keys`.
pub(crate) fn str_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// First integer (or integer-valued string) among `keys`.
pub(crate) fn int_field(value: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| match value.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Unix seconds from an integer or an RFC 3339 string.
pub(crate) fn timestamp_field(value: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| match value.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok().or_else(|| {
            chrono::DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.timestamp())
        }),
        _ => None,
    })
}

pub(crate) fn normalize_currency(raw: Option<String>) -> String {
    raw.map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "USD".to_string())
}

/// All values of a comma-separated header, trimmed.
pub(crate) fn header_values<'a>(headers: &'a HeaderMap, name: &str) -> Vec<&'a str> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect()
}
