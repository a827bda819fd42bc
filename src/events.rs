//! Outbound settlement events.
//!
//! When `SETTLEMENT_EVENTS_WEBHOOK_URL` is set, every fulfilled or refunded
//! order is posted there as JSON. Delivery is fire-and-forget: failures are
//! logged and never reach the webhook response.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use reqwest::Client;
use serde::Serialize;

/// Quick retries so a flaky receiver does not pile up tasks.
const EVENT_RETRY_DELAYS: &[u64] = &[100, 200];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
    Fulfilled,
    Refunded,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementEvent {
    pub event: SettlementKind,
    pub org_id: i64,
    pub order_no: String,
    pub provider: String,
    /// Doubles as the receiver's idempotency key.
    pub provider_event_id: String,
    /// Negative for refunds.
    pub amount_cents: i64,
    pub currency: String,
    pub timestamp: i64,
}

#[derive(Clone, Default)]
pub struct EventSink {
    client: Client,
    url: Option<String>,
}

impl EventSink {
    pub fn new(url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Spawn delivery in the background. No-op when no URL is configured.
    /// Panics in the task are logged rather than silently swallowed.
    pub fn emit(&self, event: SettlementEvent) {
        let Some(url) = self.url.clone() else {
            return;
        };
        let client = self.client.clone();
        let order_no = event.order_no.clone();
        tokio::spawn(
            AssertUnwindSafe(async move {
                send_event(&client, &url, &event).await;
            })
            .catch_unwind()
            .map(move |result| {
                if let Err(panic) = result {
                    let panic_msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(
                        "Settlement event task panicked for order '{}': {}",
                        order_no,
                        panic_msg
                    );
                }
            }),
        );
    }
}

async fn send_event(client: &Client, url: &str, event: &SettlementEvent) {
    for (attempt, delay_ms) in std::iter::once(&0u64)
        .chain(EVENT_RETRY_DELAYS.iter())
        .enumerate()
    {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
        }

        match client
            .post(url)
            .json(event)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                if attempt > 0 {
                    tracing::debug!("Settlement event delivered after {} retries", attempt);
                }
                return;
            }
            Ok(resp) => {
                tracing::debug!("Settlement event receiver returned {}", resp.status());
            }
            Err(e) => {
                tracing::debug!("Settlement event delivery failed: {}", e);
            }
        }
    }

    tracing::warn!(
        order_no = %event.order_no,
        "Settlement event dropped after {} attempts",
        EVENT_RETRY_DELAYS.len() + 1
    );
}
