use axum::http::HeaderMap;
use serde_json::Value;

use super::billing::normalize_flat;
use super::{DEFAULT_EVENT_TYPE, NormalizedEvent, PaymentGateway, PaymentProvider};

/// Development provider. Accepts every delivery; only registered outside
/// production.
pub struct StubGateway;

impl PaymentGateway for StubGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stub
    }

    fn verify_signature(&self, _headers: &HeaderMap, _body: &[u8], _now: i64) -> bool {
        true
    }

    fn normalize(&self, payload: &Value) -> NormalizedEvent {
        normalize_flat(payload)
    }

    fn allowed_event_types(&self) -> &'static [&'static str] {
        &[DEFAULT_EVENT_TYPE]
    }
}
