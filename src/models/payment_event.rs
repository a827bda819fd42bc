use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventStatus {
    Received,
    Processed,
    Rejected,
    Orphan,
    Failed,
    ReprocessRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HandleStatus {
    Received,
    Processed,
    Failed,
    Queued,
    Reprocessed,
    Duplicate,
    ReprocessFailed,
}

/// One row per (provider, provider_event_id). Re-deliveries update this row
/// in place; it is the idempotency anchor for webhooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: String,
    pub org_id: i64,
    pub provider: String,
    pub provider_event_id: String,
    pub order_no: String,
    pub event_type: String,
    pub status: EventStatus,
    pub handle_status: HandleStatus,
    pub signature_ok: bool,
    pub attempts: i64,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    #[serde(skip_serializing)]
    pub payload_json: Option<String>,
    pub payload_sha256: Option<String>,
    pub payload_size_bytes: Option<i64>,
    pub payload_excerpt: Option<String>,
    pub received_at: i64,
    pub processed_at: Option<i64>,
    pub handled_at: Option<i64>,
    pub updated_at: i64,
}

/// Digest of the raw request body kept alongside the event.
#[derive(Debug, Clone, Default)]
pub struct PayloadSummary {
    pub sha256: String,
    pub size_bytes: i64,
    pub excerpt: String,
}

/// Everything needed to insert the first row for a delivery.
#[derive(Debug, Clone)]
pub struct NewPaymentEvent<'a> {
    pub org_id: i64,
    pub provider: &'a str,
    pub provider_event_id: &'a str,
    pub order_no: &'a str,
    pub event_type: &'a str,
    pub signature_ok: bool,
    pub payload_json: &'a str,
    pub summary: &'a PayloadSummary,
}
