//! Operator-initiated refunds, applied by the background refund job.
//!
//! Runs under the same order lock as webhook settlement so a provider
//! refund and an admin refund for one order never interleave.

use rusqlite::TransactionBehavior;
use serde::Serialize;
use serde_json::json;

use super::processor::order_lock_key;
use super::{CommerceError, CommerceResult, WebhookProcessor, entitlements, orders, wallet};
use crate::db::queries::{self, OrderTransitionFields};
use crate::error::{AppError, ErrorCode, msg};
use crate::events::{SettlementEvent, SettlementKind};
use crate::lock::LockError;
use crate::models::{ActorType, AuditAction, OrderStatus, SkuKind};
use crate::util::AuditLogBuilder;

/// Provider label used for ledger keys of admin refunds.
const ADMIN_PROVIDER: &str = "admin";

#[derive(Debug, Clone)]
pub struct AdminRefund {
    pub org_id: i64,
    pub order_no: String,
    pub reason: String,
    pub correlation_id: String,
    pub actor_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundApplied {
    pub order_no: String,
    pub already_refunded: bool,
    pub revoked: usize,
}

impl WebhookProcessor {
    pub async fn apply_admin_refund(&self, request: &AdminRefund) -> CommerceResult<RefundApplied> {
        let provider = {
            let conn = self.db.get()?;
            orders::find(&conn, request.org_id, &request.order_no)?.provider
        };

        let lock_key = order_lock_key(&provider, request.order_no.trim());
        let guard = match self.lock.acquire(&lock_key, self.lock_wait, self.lock_ttl).await {
            Ok(guard) => guard,
            Err(LockError::Timeout(_)) => {
                return Err(CommerceError::rejected(ErrorCode::WebhookBusy, msg::WEBHOOK_BUSY));
            }
            Err(e) => return Err(AppError::Internal(e.to_string()).into()),
        };

        let result = self.refund_locked(request);

        if let Err(e) = guard.release() {
            tracing::warn!(key = %lock_key, "Refund lock release failed: {}", e);
        }

        let (applied, amount_cents, currency) = result?;
        if !applied.already_refunded {
            tracing::info!(
                org_id = request.org_id,
                order_no = %applied.order_no,
                revoked = applied.revoked,
                "Admin refund applied"
            );
            self.events.emit(SettlementEvent {
                event: SettlementKind::Refunded,
                org_id: request.org_id,
                order_no: applied.order_no.clone(),
                provider: ADMIN_PROVIDER.to_string(),
                provider_event_id: format!("{}:{}", ADMIN_PROVIDER, request.correlation_id),
                amount_cents: -amount_cents,
                currency,
                timestamp: queries::now(),
            });
        }
        Ok(applied)
    }

    fn refund_locked(&self, request: &AdminRefund) -> CommerceResult<(RefundApplied, i64, String)> {
        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let order = orders::find(&tx, request.org_id, &request.order_no)?;
        if order.status == OrderStatus::Refunded {
            return Ok((
                RefundApplied {
                    order_no: order.order_no,
                    already_refunded: true,
                    revoked: 0,
                },
                0,
                String::new(),
            ));
        }

        let refunded = orders::transition(
            &tx,
            &order,
            OrderStatus::Refunded,
            &OrderTransitionFields {
                refund_amount_cents: Some(order.amount_cents),
                refund_reason: Some(request.reason.as_str()),
                ..Default::default()
            },
        )?;

        let revoke = entitlements::revoke_by_order(
            &tx,
            order.org_id,
            &order.order_no,
            Some(request.reason.as_str()),
        )?;

        let sku = if order.status.is_settled() {
            queries::get_active_sku(&tx, &order.sku)?
        } else {
            None
        };
        if let Some(sku) = sku.filter(|s| s.kind == SkuKind::CreditPack) {
            let key = wallet::reversal_key(ADMIN_PROVIDER, &order.order_no);
            wallet::reverse(
                &tx,
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

        let meta = json!({
            "order_no": order.order_no,
            "reason": request.reason,
            "correlation_id": request.correlation_id,
            "refund_amount_cents": order.amount_cents,
            "revoked": revoke.revoked,
        });
        let actor_type = if request.actor_id.is_some() {
            ActorType::Admin
        } else {
            ActorType::System
        };
        AuditLogBuilder::new(&tx, self.audit_enabled)
            .actor(actor_type, request.actor_id.as_deref())
            .action(AuditAction::RefundOrderApplied)
            .target("Order", &order.id)
            .org(order.org_id)
            .meta(&meta)
            .save()?;

        tx.commit()?;

        Ok((
            RefundApplied {
                order_no: refunded.order_no,
                already_refunded: false,
                revoked: revoke.revoked,
            },
            order.amount_cents,
            order.currency,
        ))
    }
}
