//! End-to-end webhook settlement.
//!
//! `handle` resolves the gateway, normalizes the payload, serializes on an
//! order-scoped lease lock and settles the order inside one IMMEDIATE
//! transaction: the payment event row, the order transition, the grant and
//! the `payment_webhook_processed` audit row commit together or not at all.
//! Outbound settlement events run after commit and never change the outcome.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use serde_json::{Value, json};

use super::{CommerceError, entitlements, orders, wallet};
use crate::db::queries::{self, OrderTransitionFields};
use crate::db::{AppState, DbPool};
use crate::error::{AppError, ErrorCode, msg};
use crate::events::{EventSink, SettlementEvent, SettlementKind};
use crate::idempotency::IdempotencyLedger;
use crate::lock::{DistributedLock, LockError};
use crate::models::{
    ActorType, AuditAction, EventStatus, GrantOutcome, GrantRequest, NewPaymentEvent, Order,
    OrderStatus, PayloadSummary, PaymentEvent, SkuKind, WalletOutcome,
};
use crate::payments::{GatewayRegistry, NormalizedEvent, PaymentGateway};
use crate::util::{AuditLogBuilder, summarize_payload};

/// Webhook deliveries share one idempotency bucket per event id.
const WEBHOOK_RECORDED_AT: i64 = 0;

#[derive(Debug, Clone, Default)]
pub struct HandleOptions {
    /// Result of signature verification at the boundary.
    pub signature_ok: bool,
    /// Skip event-type, amount and currency guards. Trusted callers only.
    pub amount_bypass: bool,
    /// Digest of the raw body; computed from the payload when absent.
    pub payload_meta: Option<PayloadSummary>,
}

impl HandleOptions {
    pub fn verified() -> Self {
        Self {
            signature_ok: true,
            ..Default::default()
        }
    }
}

fn is_ok_status(status: &u16) -> bool {
    *status == 200
}

/// Processor result. Failures always carry `error_code` and `status` and
/// never a free-form `error` key.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WebhookOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "is_ok_status")]
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_refund: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_status: Option<OrderStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benefit_grant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_balance: Option<i64>,
}

impl WebhookOutcome {
    pub fn failure(code: ErrorCode, message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            ok: false,
            error_code: Some(code.as_ref().to_string()),
            message: Some(message.into()),
            status: status.as_u16(),
            ..Default::default()
        }
    }

    fn from_error(error: &CommerceError) -> Self {
        match error {
            CommerceError::Rejected { code, message } => {
                Self::failure(*code, message.clone(), error.status())
            }
            CommerceError::App(e) => {
                tracing::error!("Webhook settlement failed: {}", e);
                Self::failure(
                    ErrorCode::WebhookInternalError,
                    msg::WEBHOOK_INTERNAL_ERROR,
                    StatusCode::INTERNAL_SERVER_ERROR,
                )
            }
        }
    }

    fn success(event: &NormalizedEvent) -> Self {
        Self {
            ok: true,
            status: 200,
            order_no: Some(event.order_no.clone()),
            provider_event_id: Some(event.provider_event_id.clone()),
            ..Default::default()
        }
    }

    pub fn http_status(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn is_duplicate(&self) -> bool {
        self.duplicate == Some(true)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "ok": self.ok }))
    }
}

impl IntoResponse for WebhookOutcome {
    fn into_response(self) -> Response {
        (self.http_status(), Json(self)).into_response()
    }
}

enum Settlement {
    Duplicate,
    Refunded {
        order: Order,
        revoked: usize,
    },
    Fulfilled {
        order: Order,
        grant: Option<GrantOutcome>,
        wallet: Option<WalletOutcome>,
    },
}

/// Refused before any domain write. The event row records why and the
/// transaction still commits.
struct Rejection {
    event_id: String,
    error: CommerceError,
    event_status: EventStatus,
    event_error_code: String,
    details: Option<Value>,
}

enum Halt {
    Reject(Box<Rejection>),
    /// Failed mid-settlement; the transaction rolls back.
    Abort(CommerceError),
}

impl From<CommerceError> for Halt {
    fn from(e: CommerceError) -> Self {
        Halt::Abort(e)
    }
}

impl From<AppError> for Halt {
    fn from(e: AppError) -> Self {
        Halt::Abort(e.into())
    }
}

impl From<rusqlite::Error> for Halt {
    fn from(e: rusqlite::Error) -> Self {
        Halt::Abort(e.into())
    }
}

impl From<r2d2::Error> for Halt {
    fn from(e: r2d2::Error) -> Self {
        Halt::Abort(e.into())
    }
}

fn rejection(
    event: &PaymentEvent,
    code: ErrorCode,
    message: &str,
    event_status: EventStatus,
    event_error_code: &str,
) -> Box<Rejection> {
    Box::new(Rejection {
        event_id: event.id.clone(),
        error: CommerceError::rejected(code, message),
        event_status,
        event_error_code: event_error_code.to_string(),
        details: None,
    })
}

fn reject(
    event: &PaymentEvent,
    code: ErrorCode,
    message: &str,
    event_status: EventStatus,
    event_error_code: &str,
) -> Halt {
    Halt::Reject(rejection(event, code, message, event_status, event_error_code))
}

#[derive(Clone)]
pub struct WebhookProcessor {
    pub(super) db: DbPool,
    gateways: Arc<GatewayRegistry>,
    pub(super) lock: DistributedLock,
    pub(super) lock_wait: Duration,
    pub(super) lock_ttl: Duration,
    pub(super) audit_enabled: bool,
    pub(super) events: EventSink,
}

/// Lock name shared by webhook settlement and admin refunds for one order.
pub fn order_lock_key(provider: &str, order_no: &str) -> String {
    format!("webhook_pay:{}:{}", provider, order_no)
}

impl WebhookProcessor {
    pub fn new(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
            gateways: state.gateways.clone(),
            lock: DistributedLock::new(state.db.clone()),
            lock_wait: Duration::from_secs(state.config.lock_wait_secs),
            lock_ttl: Duration::from_secs(state.config.lock_ttl_secs),
            audit_enabled: state.config.audit_log_enabled,
            events: state.events.clone(),
        }
    }

    pub fn with_lock_timing(mut self, wait: Duration, ttl: Duration) -> Self {
        self.lock_wait = wait;
        self.lock_ttl = ttl;
        self
    }

    pub async fn handle(
        &self,
        provider: &str,
        payload: &Value,
        org_id: i64,
        options: HandleOptions,
    ) -> WebhookOutcome {
        let provider = provider.trim().to_lowercase();
        let Some(gateway) = self.gateways.get(&provider) else {
            return WebhookOutcome::failure(
                ErrorCode::ProviderNotSupported,
                msg::PROVIDER_NOT_SUPPORTED,
                StatusCode::BAD_REQUEST,
            );
        };

        if !options.signature_ok {
            tracing::warn!(provider = %provider, "Webhook rejected: signature invalid");
            return WebhookOutcome::failure(
                ErrorCode::SignatureInvalid,
                msg::SIGNATURE_INVALID,
                StatusCode::BAD_REQUEST,
            );
        }

        let event = gateway.normalize(payload);
        if !event.has_identity() {
            return WebhookOutcome::failure(
                ErrorCode::InvalidPayload,
                msg::INVALID_PAYLOAD,
                StatusCode::BAD_REQUEST,
            );
        }

        let lock_key = order_lock_key(&provider, &event.order_no);
        let guard = match self.lock.acquire(&lock_key, self.lock_wait, self.lock_ttl).await {
            Ok(guard) => guard,
            Err(LockError::Timeout(_)) => {
                tracing::warn!(
                    provider = %provider,
                    order_no = %event.order_no,
                    "Webhook lock wait timed out"
                );
                return WebhookOutcome::failure(
                    ErrorCode::WebhookBusy,
                    msg::WEBHOOK_BUSY,
                    StatusCode::INTERNAL_SERVER_ERROR,
                );
            }
            Err(e) => {
                tracing::error!(key = %lock_key, "Webhook lock backend failed: {}", e);
                return WebhookOutcome::failure(
                    ErrorCode::WebhookInternalError,
                    msg::WEBHOOK_INTERNAL_ERROR,
                    StatusCode::INTERNAL_SERVER_ERROR,
                );
            }
        };

        let result = self.settle_locked(gateway, &provider, &event, payload, org_id, &options);

        if let Err(e) = guard.release() {
            tracing::warn!(key = %lock_key, "Webhook lock release failed: {}", e);
        }

        match result {
            Ok(settlement) => self.finish(&provider, org_id, &event, settlement),
            Err(Halt::Reject(rejection)) => {
                tracing::warn!(
                    provider = %provider,
                    order_no = %event.order_no,
                    provider_event_id = %event.provider_event_id,
                    code = rejection.error.code().as_ref(),
                    "Webhook rejected"
                );
                let mut outcome = WebhookOutcome::from_error(&rejection.error);
                outcome.details = rejection.details;
                outcome
            }
            Err(Halt::Abort(error)) => WebhookOutcome::from_error(&error),
        }
    }

    /// Validate a payload without touching storage.
    pub fn evaluate_dry_run(
        &self,
        provider: &str,
        payload: &Value,
        signature_ok: bool,
    ) -> WebhookOutcome {
        let provider = provider.trim().to_lowercase();
        let Some(gateway) = self.gateways.get(&provider) else {
            return WebhookOutcome::failure(
                ErrorCode::ProviderNotSupported,
                msg::PROVIDER_NOT_SUPPORTED,
                StatusCode::BAD_REQUEST,
            );
        };
        if !signature_ok {
            return WebhookOutcome::failure(
                ErrorCode::SignatureInvalid,
                msg::SIGNATURE_INVALID,
                StatusCode::BAD_REQUEST,
            );
        }

        let event = gateway.normalize(payload);
        if !event.has_identity() {
            return WebhookOutcome::failure(
                ErrorCode::InvalidPayload,
                msg::INVALID_PAYLOAD,
                StatusCode::BAD_REQUEST,
            );
        }
        let is_refund = event.is_refund();
        if !is_refund && !gateway.is_allowed_event_type(&event.event_type) {
            return WebhookOutcome::failure(
                ErrorCode::EventTypeNotAllowed,
                msg::EVENT_TYPE_NOT_ALLOWED,
                StatusCode::NOT_FOUND,
            );
        }

        WebhookOutcome {
            dry_run: Some(true),
            provider: Some(provider),
            event_type: Some(event.event_type.clone()),
            is_refund: Some(is_refund),
            ..WebhookOutcome::success(&event)
        }
    }

    fn settle_locked(
        &self,
        gateway: &dyn PaymentGateway,
        provider: &str,
        event: &NormalizedEvent,
        payload: &Value,
        org_id: i64,
        options: &HandleOptions,
    ) -> Result<Settlement, Halt> {
        let payload_json = payload.to_string();
        let summary = options
            .payload_meta
            .clone()
            .unwrap_or_else(|| summarize_payload(payload_json.as_bytes()));
        let new_event = NewPaymentEvent {
            org_id,
            provider,
            provider_event_id: &event.provider_event_id,
            order_no: &event.order_no,
            event_type: &event.event_type,
            signature_ok: options.signature_ok,
            payload_json: &payload_json,
            summary: &summary,
        };

        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let settled = settle(&tx, gateway, event, &new_event, options.amount_bypass)
            .and_then(|settlement| {
                audit_settlement(&tx, self.audit_enabled, provider, org_id, event, &settlement)?;
                Ok(settlement)
            });
        match settled {
            Ok(settlement) => {
                tx.commit()?;
                Ok(settlement)
            }
            Err(Halt::Reject(rejection)) => {
                queries::mark_payment_event(
                    &tx,
                    &rejection.event_id,
                    rejection.event_status,
                    Some((
                        rejection.event_error_code.as_str(),
                        rejection.error.message().as_str(),
                    )),
                )?;
                tx.commit()?;
                Err(Halt::Reject(rejection))
            }
            Err(Halt::Abort(error)) => {
                drop(tx);
                record_failure(&conn, &new_event, &error);
                Err(Halt::Abort(error))
            }
        }
    }

    fn finish(
        &self,
        provider: &str,
        org_id: i64,
        event: &NormalizedEvent,
        settlement: Settlement,
    ) -> WebhookOutcome {
        let mut outcome = WebhookOutcome::success(event);
        let (order, kind) = match settlement {
            Settlement::Duplicate => {
                tracing::info!(
                    provider,
                    provider_event_id = %event.provider_event_id,
                    "Duplicate webhook delivery"
                );
                outcome.duplicate = Some(true);
                return outcome;
            }
            Settlement::Refunded { order, revoked } => {
                outcome.refunded = Some(true);
                outcome.revoked = Some(revoked);
                (order, SettlementKind::Refunded)
            }
            Settlement::Fulfilled {
                order,
                grant,
                wallet,
            } => {
                outcome.duplicate = Some(false);
                outcome.benefit_grant_id = grant.map(|g| g.grant.id);
                outcome.wallet_balance = wallet.map(|w| w.wallet.balance);
                (order, SettlementKind::Fulfilled)
            }
        };
        outcome.order_status = Some(order.status);

        tracing::info!(
            provider,
            order_no = %order.order_no,
            provider_event_id = %event.provider_event_id,
            status = order.status.as_ref(),
            "Webhook settled"
        );

        let amount = match kind {
            SettlementKind::Fulfilled => order.amount_cents,
            SettlementKind::Refunded => -order.refund_amount_cents.unwrap_or(order.amount_cents),
        };
        self.events.emit(SettlementEvent {
            event: kind,
            org_id,
            order_no: order.order_no.clone(),
            provider: provider.to_string(),
            provider_event_id: event.provider_event_id.clone(),
            amount_cents: amount,
            currency: order.currency.clone(),
            timestamp: queries::now(),
        });

        outcome
    }
}

/// Money-moving settlements are audited inside the settling transaction,
/// so a failed audit write rolls the settlement back.
fn audit_settlement(
    conn: &Connection,
    enabled: bool,
    provider: &str,
    org_id: i64,
    event: &NormalizedEvent,
    settlement: &Settlement,
) -> crate::error::Result<()> {
    let (order, revoked) = match settlement {
        Settlement::Duplicate => return Ok(()),
        Settlement::Refunded { order, revoked } => (order, Some(*revoked)),
        Settlement::Fulfilled { order, .. } => (order, None),
    };
    let meta = json!({
        "provider": provider,
        "provider_event_id": event.provider_event_id,
        "event_type": event.event_type,
        "order_status": order.status,
        "revoked": revoked,
    });
    AuditLogBuilder::new(conn, enabled)
        .actor(ActorType::Provider, Some(provider))
        .action(AuditAction::PaymentWebhookProcessed)
        .target("Order", &order.order_no)
        .org(org_id)
        .meta(&meta)
        .save()?;
    Ok(())
}

fn settle(
    conn: &Connection,
    gateway: &dyn PaymentGateway,
    event: &NormalizedEvent,
    new_event: &NewPaymentEvent,
    amount_bypass: bool,
) -> Result<Settlement, Halt> {
    let provider = new_event.provider;
    let inserted = queries::insert_payment_event_if_absent(conn, new_event)?;
    let stored = queries::get_payment_event(conn, provider, &event.provider_event_id)?
        .ok_or_else(|| AppError::Internal("payment event missing after insert".into()))?;

    if !inserted {
        if stored.status == EventStatus::Processed && stored.order_no == event.order_no {
            return Ok(Settlement::Duplicate);
        }
        queries::touch_payment_event_redelivery(conn, &stored.id, new_event)?;
    }

    IdempotencyLedger::new(conn).record(
        provider,
        &event.provider_event_id,
        WEBHOOK_RECORDED_AT,
        &new_event.summary.sha256,
        None,
    )?;

    let Some(order) = queries::get_order(conn, new_event.org_id, &event.order_no)? else {
        return Err(reject(
            &stored,
            ErrorCode::OrderNotFound,
            msg::ORDER_NOT_FOUND,
            EventStatus::Orphan,
            ErrorCode::OrderNotFound.as_ref(),
        ));
    };

    if order.provider != provider {
        return Err(reject(
            &stored,
            ErrorCode::ProviderMismatch,
            msg::PROVIDER_MISMATCH,
            EventStatus::Rejected,
            "rejected_provider_mismatch",
        ));
    }

    if event.is_refund() {
        return settle_refund(conn, &stored, &order, event, provider);
    }

    if order.status.is_settled() {
        queries::mark_payment_event(conn, &stored.id, EventStatus::Processed, None)?;
        return Ok(Settlement::Duplicate);
    }

    if !amount_bypass {
        check_guards(gateway, &stored, &order, event)?;
    }

    let Some(sku) = queries::get_active_sku(conn, &order.sku)? else {
        return Err(reject(
            &stored,
            ErrorCode::SkuNotFound,
            msg::SKU_NOT_FOUND,
            EventStatus::Failed,
            ErrorCode::SkuNotFound.as_ref(),
        ));
    };

    let attempt_id = order
        .target_attempt_id
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty());
    if sku.kind == SkuKind::ReportUnlock && attempt_id.is_none() {
        return Err(reject(
            &stored,
            ErrorCode::AttemptRequired,
            msg::ATTEMPT_REQUIRED,
            EventStatus::Failed,
            ErrorCode::AttemptRequired.as_ref(),
        ));
    }

    let paid = orders::transition(
        conn,
        &order,
        OrderStatus::Paid,
        &OrderTransitionFields {
            external_trade_no: event.external_trade_no.as_deref(),
            paid_at: event.paid_at,
            ..Default::default()
        },
    )?;

    let (grant, wallet) = match sku.kind {
        SkuKind::CreditPack => {
            let key = wallet::topup_key(provider, &event.provider_event_id);
            let outcome = wallet::top_up(
                conn,
                &wallet::WalletPosting {
                    org_id: order.org_id,
                    benefit_code: &sku.benefit_code,
                    quantity: sku.unit_qty * order.quantity,
                    idempotency_key: &key,
                    order_no: Some(order.order_no.as_str()),
                    attempt_id,
                    meta: None,
                },
            )?;
            (None, Some(outcome))
        }
        SkuKind::ReportUnlock => {
            let outcome = entitlements::grant_attempt_unlock(
                conn,
                &GrantRequest {
                    org_id: order.org_id,
                    user_id: order.user_id.as_deref(),
                    anon_id: order.anon_id.as_deref(),
                    benefit_code: &sku.benefit_code,
                    attempt_id: attempt_id.unwrap_or_default(),
                    order_no: Some(order.order_no.as_str()),
                    ..Default::default()
                },
            )?;
            (Some(outcome), None)
        }
    };

    let fulfilled = orders::transition(conn, &paid, OrderStatus::Fulfilled, &Default::default())?;
    queries::mark_payment_event(conn, &stored.id, EventStatus::Processed, None)?;

    Ok(Settlement::Fulfilled {
        order: fulfilled,
        grant,
        wallet,
    })
}

fn check_guards(
    gateway: &dyn PaymentGateway,
    stored: &PaymentEvent,
    order: &Order,
    event: &NormalizedEvent,
) -> Result<(), Halt> {
    if !gateway.is_allowed_event_type(&event.event_type) {
        return Err(reject(
            stored,
            ErrorCode::EventTypeNotAllowed,
            msg::EVENT_TYPE_NOT_ALLOWED,
            EventStatus::Rejected,
            ErrorCode::EventTypeNotAllowed.as_ref(),
        ));
    }

    if event.amount_cents != Some(order.amount_cents) {
        let mut rejection = rejection(
            stored,
            ErrorCode::AmountMismatch,
            msg::AMOUNT_MISMATCH,
            EventStatus::Rejected,
            ErrorCode::AmountMismatch.as_ref(),
        );
        rejection.details = Some(json!({
            "expected": order.amount_cents,
            "received": event.amount_cents,
        }));
        return Err(Halt::Reject(rejection));
    }

    let currency = event.currency.trim().to_uppercase();
    if currency.is_empty() || currency != order.currency.trim().to_uppercase() {
        return Err(reject(
            stored,
            ErrorCode::CurrencyMismatch,
            msg::CURRENCY_MISMATCH,
            EventStatus::Rejected,
            ErrorCode::CurrencyMismatch.as_ref(),
        ));
    }

    Ok(())
}

fn settle_refund(
    conn: &Connection,
    stored: &PaymentEvent,
    order: &Order,
    event: &NormalizedEvent,
    provider: &str,
) -> Result<Settlement, Halt> {
    if order.status == OrderStatus::Refunded {
        queries::mark_payment_event(conn, &stored.id, EventStatus::Processed, None)?;
        return Ok(Settlement::Duplicate);
    }

    let refund_amount = if event.refund_amount_cents > 0 {
        event.refund_amount_cents
    } else {
        order.amount_cents
    };
    let refunded = orders::transition(
        conn,
        order,
        OrderStatus::Refunded,
        &OrderTransitionFields {
            refund_amount_cents: Some(refund_amount),
            refund_reason: event.refund_reason.as_deref(),
            ..Default::default()
        },
    )?;

    let revoke = entitlements::revoke_by_order(
        conn,
        order.org_id,
        &order.order_no,
        Some(event.refund_reason.as_deref().unwrap_or("refund")),
    )?;

    // Only a settled order ever had credits posted.
    let sku = if order.status.is_settled() {
        queries::get_active_sku(conn, &order.sku)?
    } else {
        None
    };
    if let Some(sku) = sku.filter(|s| s.kind == SkuKind::CreditPack) {
        let key = wallet::reversal_key(provider, &event.provider_event_id);
        wallet::reverse(
            conn,
            &wallet::WalletPosting {
                org_id: order.org_id,
                benefit_code: &sku.benefit_code,
                quantity: sku.unit_qty * order.quantity,
                idempotency_key: &key,
                order_no: Some(order.order_no.as_str()),
                attempt_id: order.target_attempt_id.as_deref(),
                meta: None,
            },
        )?;
    }

    queries::mark_payment_event(conn, &stored.id, EventStatus::Processed, None)?;

    Ok(Settlement::Refunded {
        order: refunded,
        revoked: revoke.revoked,
    })
}

/// The settlement transaction rolled back, possibly taking a brand new event
/// row with it. Re-anchor the row and record the failure in its own write.
fn record_failure(conn: &Connection, new_event: &NewPaymentEvent, error: &CommerceError) {
    let code = error.code();
    let message = error.message();
    let result = queries::insert_payment_event_if_absent(conn, new_event)
        .and_then(|_| {
            queries::get_payment_event(conn, new_event.provider, new_event.provider_event_id)
        })
        .and_then(|stored| match stored {
            Some(stored) => queries::mark_payment_event(
                conn,
                &stored.id,
                EventStatus::Failed,
                Some((code.as_ref(), message.as_str())),
            ),
            None => Ok(()),
        });
    if let Err(e) = result {
        tracing::warn!(
            provider_event_id = new_event.provider_event_id,
            "Failed to record webhook failure: {}",
            e
        );
    }
}
