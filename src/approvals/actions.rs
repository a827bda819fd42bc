//! Domain actions behind each approval type.
//!
//! Every action checks its inputs, finds its target inside the approval's
//! org, checks the actor's permission and then writes its change together
//! with a mandatory audit row in one IMMEDIATE transaction. Refunds and
//! event reprocessing only enqueue a job here; the job does the work.

use rusqlite::{Connection, TransactionBehavior};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{ActionResult, OrgContext};
use crate::commerce::{CommerceError, CommerceResult, entitlements, orders};
use crate::db::DbPool;
use crate::db::queries::{self, NewContentRelease};
use crate::error::{ErrorCode, Result, msg};
use crate::jobs;
use crate::models::{
    ActorType, ApprovalType, AuditAction, EventStatus, GrantRequest, HandleStatus, JobType, Order,
    OrderStatus, PERM_CONTENT_RELEASE, PERM_FINANCE_WRITE, PERM_OPS_WRITE,
};
use crate::util::AuditLogBuilder;

const DEFAULT_REGION: &str = "GLOBAL";
const DEFAULT_LOCALE: &str = "en";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OrderPayload {
    order_no: String,
    benefit_code: Option<String>,
    attempt_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReprocessPayload {
    payment_event_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RollbackPayload {
    region: Option<String>,
    locale: Option<String>,
    dir_alias: Option<String>,
    from_version_id: Option<String>,
    to_version_id: Option<String>,
    from_pack_id: Option<String>,
    to_pack_id: Option<String>,
}

#[derive(Clone)]
pub struct Actions {
    db: DbPool,
    audit_enabled: bool,
}

impl Actions {
    pub fn new(db: DbPool, audit_enabled: bool) -> Self {
        Self { db, audit_enabled }
    }

    /// Run the action for `approval_type`. Business rejections come back as
    /// a failed `ActionResult`; storage errors propagate.
    pub fn run(
        &self,
        approval_type: ApprovalType,
        payload: &Value,
        ctx: &OrgContext,
    ) -> Result<ActionResult> {
        let result = match approval_type {
            ApprovalType::ManualGrant => self.manual_grant(payload, ctx),
            ApprovalType::RevokeBenefit => self.revoke_benefit(payload, ctx),
            ApprovalType::Refund => self.refund_order(payload, ctx),
            ApprovalType::ReprocessEvent => self.reprocess_event(payload, ctx),
            ApprovalType::RollbackRelease => self.rollback_release(payload, ctx),
        };

        match result {
            Ok(data) => Ok(ActionResult::success(data)),
            Err(CommerceError::Rejected { code, message }) => {
                Ok(ActionResult::failure(code, message))
            }
            Err(CommerceError::App(e)) => Err(e),
        }
    }

    pub fn manual_grant(&self, payload: &Value, ctx: &OrgContext) -> CommerceResult<Value> {
        let input: OrderPayload = parse(payload)?;
        let order_no = require_order_and_reason(&input.order_no, ctx)?;

        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let order = orders::find(&tx, ctx.org_id, order_no)?;
        authorize(ctx, PERM_OPS_WRITE)?;

        let attempt_id = input
            .attempt_id
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .or(order.target_attempt_id.as_deref())
            .map(str::to_string)
            .ok_or_else(|| {
                CommerceError::rejected(ErrorCode::AttemptRequired, msg::ATTEMPT_REQUIRED)
            })?;

        let benefit_code = match input
            .benefit_code
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
        {
            Some(code) => code.to_uppercase(),
            None => queries::get_active_sku(&tx, &order.sku)?
                .map(|sku| sku.benefit_code.trim().to_uppercase())
                .filter(|b| !b.is_empty())
                .ok_or_else(|| {
                    CommerceError::rejected(ErrorCode::BenefitRequired, msg::BENEFIT_REQUIRED)
                })?,
        };

        let outcome = entitlements::grant_attempt_unlock(
            &tx,
            &GrantRequest {
                org_id: ctx.org_id,
                user_id: order.user_id.as_deref(),
                anon_id: order.anon_id.as_deref(),
                benefit_code: &benefit_code,
                attempt_id: &attempt_id,
                order_no: Some(order.order_no.as_str()),
                scope: None,
                expires_at: None,
            },
        )?;

        self.audit(
            &tx,
            ctx,
            AuditAction::ManualGrantBenefit,
            ("Order", &order.id),
            &order,
            json!({
                "attempt_id": attempt_id,
                "benefit_code": benefit_code,
                "grant_id": outcome.grant.id,
                "idempotent": outcome.idempotent,
            }),
        )?;
        tx.commit()?;

        Ok(json!({
            "order_no": order.order_no,
            "attempt_id": attempt_id,
            "benefit_code": benefit_code,
            "grant_id": outcome.grant.id,
            "idempotent": outcome.idempotent,
            "correlation_id": ctx.correlation_id,
        }))
    }

    pub fn revoke_benefit(&self, payload: &Value, ctx: &OrgContext) -> CommerceResult<Value> {
        let input: OrderPayload = parse(payload)?;
        let order_no = require_order_and_reason(&input.order_no, ctx)?;

        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let order = orders::find(&tx, ctx.org_id, order_no)?;
        authorize(ctx, PERM_OPS_WRITE)?;

        let outcome = entitlements::revoke_by_order(
            &tx,
            ctx.org_id,
            &order.order_no,
            Some(ctx.reason.as_str()),
        )?;

        self.audit(
            &tx,
            ctx,
            AuditAction::RevokeBenefit,
            ("Order", &order.id),
            &order,
            json!({
                "revoked": outcome.revoked,
                "benefit_code": outcome.benefit_code,
                "attempt_id": outcome.attempt_id,
            }),
        )?;
        tx.commit()?;

        Ok(json!({
            "order_no": order.order_no,
            "revoked": outcome.revoked,
            "correlation_id": ctx.correlation_id,
        }))
    }

    pub fn refund_order(&self, payload: &Value, ctx: &OrgContext) -> CommerceResult<Value> {
        let input: OrderPayload = parse(payload)?;
        let order_no = require_order_and_reason(&input.order_no, ctx)?;

        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let order = orders::find(&tx, ctx.org_id, order_no)?;
        authorize(ctx, PERM_FINANCE_WRITE)?;

        if order.status == OrderStatus::Refunded {
            return Ok(json!({
                "order_no": order.order_no,
                "already_refunded": true,
                "correlation_id": ctx.correlation_id,
            }));
        }

        self.audit(
            &tx,
            ctx,
            AuditAction::RefundOrderRequested,
            ("Order", &order.id),
            &order,
            json!({ "amount_cents": order.amount_cents, "currency": order.currency }),
        )?;
        let job = jobs::enqueue_on(
            &tx,
            JobType::RefundOrder,
            &json!({
                "org_id": ctx.org_id,
                "order_no": order.order_no,
                "reason": ctx.reason,
                "correlation_id": ctx.correlation_id,
                "actor_id": ctx.actor.id,
            }),
        )?;
        tx.commit()?;

        Ok(json!({
            "order_no": order.order_no,
            "queued": true,
            "job_id": job.id,
            "correlation_id": ctx.correlation_id,
        }))
    }

    pub fn reprocess_event(&self, payload: &Value, ctx: &OrgContext) -> CommerceResult<Value> {
        let input: ReprocessPayload = parse(payload)?;
        let event_id = input.payment_event_id.trim();
        if event_id.is_empty() || ctx.reason.trim().is_empty() {
            return Err(CommerceError::rejected(
                ErrorCode::InvalidArgument,
                msg::EVENT_AND_REASON_REQUIRED,
            ));
        }

        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let event = queries::get_payment_event_for_org(&tx, event_id, ctx.org_id)?
            .ok_or_else(|| CommerceError::rejected(ErrorCode::EventNotFound, msg::EVENT_NOT_FOUND))?;
        authorize(ctx, PERM_OPS_WRITE)?;

        queries::set_payment_event_handle_status(
            &tx,
            &event.id,
            Some(EventStatus::ReprocessRequested),
            HandleStatus::Queued,
        )?;

        let meta = json!({
            "actor": ctx.actor.id,
            "org_id": ctx.org_id,
            "reason": ctx.reason,
            "correlation_id": ctx.correlation_id,
            "provider": event.provider,
            "provider_event_id": event.provider_event_id,
            "order_no": event.order_no,
        });
        AuditLogBuilder::new(&tx, self.audit_enabled)
            .actor(ActorType::Admin, Some(&ctx.actor.id))
            .action(AuditAction::ReprocessPaymentEvent)
            .target("PaymentEvent", &event.id)
            .org(ctx.org_id)
            .meta(&meta)
            .request(&ctx.request)
            .save()?;

        let job = jobs::enqueue_on(
            &tx,
            JobType::ReprocessPaymentEvent,
            &json!({
                "payment_event_id": event.id,
                "org_id": ctx.org_id,
                "reason": ctx.reason,
                "correlation_id": ctx.correlation_id,
            }),
        )?;
        tx.commit()?;

        Ok(json!({
            "payment_event_id": event.id,
            "provider_event_id": event.provider_event_id,
            "order_no": event.order_no,
            "correlation_id": ctx.correlation_id,
            "queued": true,
            "job_id": job.id,
        }))
    }

    pub fn rollback_release(&self, payload: &Value, ctx: &OrgContext) -> CommerceResult<Value> {
        let input: RollbackPayload = parse(payload)?;
        if ctx.reason.trim().is_empty() {
            return Err(CommerceError::rejected(
                ErrorCode::InvalidArgument,
                msg::REASON_REQUIRED,
            ));
        }
        authorize(ctx, PERM_CONTENT_RELEASE)?;

        let region = non_empty(input.region.as_deref()).unwrap_or(DEFAULT_REGION);
        let locale = non_empty(input.locale.as_deref()).unwrap_or(DEFAULT_LOCALE);
        let dir_alias = non_empty(input.dir_alias.as_deref()).unwrap_or("");

        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let release = queries::create_content_release(
            &tx,
            &NewContentRelease {
                action: "rollback",
                region,
                locale,
                dir_alias,
                from_version_id: non_empty(input.from_version_id.as_deref()),
                to_version_id: non_empty(input.to_version_id.as_deref()),
                from_pack_id: non_empty(input.from_pack_id.as_deref()),
                to_pack_id: non_empty(input.to_pack_id.as_deref()),
                status: "success",
                message: Some(ctx.reason.trim()),
                created_by: &ctx.actor.id,
            },
        )?;

        let meta = json!({
            "actor": ctx.actor.id,
            "org_id": ctx.org_id,
            "reason": ctx.reason,
            "correlation_id": ctx.correlation_id,
            "release_id": release.id,
            "region": release.region,
            "locale": release.locale,
            "dir_alias": release.dir_alias,
            "from_version_id": release.from_version_id,
            "to_version_id": release.to_version_id,
            "from_pack_id": release.from_pack_id,
            "to_pack_id": release.to_pack_id,
        });
        AuditLogBuilder::new(&tx, self.audit_enabled)
            .actor(ActorType::Admin, Some(&ctx.actor.id))
            .action(AuditAction::ContentReleaseRollback)
            .target("AdminApproval", &ctx.approval_id)
            .org(ctx.org_id)
            .meta(&meta)
            .request(&ctx.request)
            .save()?;
        tx.commit()?;

        Ok(json!({
            "approval_id": ctx.approval_id,
            "type": ApprovalType::RollbackRelease.as_ref(),
            "release_id": release.id,
        }))
    }

    /// Mandatory audit row for an order-scoped action, written on the
    /// action's transaction.
    fn audit(
        &self,
        conn: &Connection,
        ctx: &OrgContext,
        action: AuditAction,
        target: (&str, &str),
        order: &Order,
        extra: Value,
    ) -> Result<()> {
        let mut meta = json!({
            "actor": ctx.actor.id,
            "org_id": ctx.org_id,
            "order_no": order.order_no,
            "reason": ctx.reason,
            "correlation_id": ctx.correlation_id,
        });
        if let (Some(meta), Value::Object(extra)) = (meta.as_object_mut(), extra) {
            meta.extend(extra);
        }
        AuditLogBuilder::new(conn, self.audit_enabled)
            .actor(ActorType::Admin, Some(&ctx.actor.id))
            .action(action)
            .target(target.0, target.1)
            .org(ctx.org_id)
            .meta(&meta)
            .request(&ctx.request)
            .save()?;
        Ok(())
    }
}

fn parse<T: DeserializeOwned + Default>(payload: &Value) -> CommerceResult<T> {
    if payload.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(payload.clone()).map_err(|e| {
        tracing::debug!("Approval payload rejected: {}", e);
        CommerceError::rejected(ErrorCode::InvalidArgument, msg::APPROVAL_PAYLOAD_INVALID)
    })
}

fn require_order_and_reason<'a>(order_no: &'a str, ctx: &OrgContext) -> CommerceResult<&'a str> {
    let order_no = order_no.trim();
    if order_no.is_empty() || ctx.reason.trim().is_empty() {
        return Err(CommerceError::rejected(
            ErrorCode::InvalidArgument,
            msg::ORDER_AND_REASON_REQUIRED,
        ));
    }
    Ok(order_no)
}

fn authorize(ctx: &OrgContext, permission: &str) -> CommerceResult<()> {
    if ctx.actor.has_permission(permission) {
        Ok(())
    } else {
        tracing::warn!(
            actor = %ctx.actor.id,
            permission,
            approval_id = %ctx.approval_id,
            "Approval actor lacks permission"
        );
        Err(CommerceError::rejected(ErrorCode::Forbidden, msg::FORBIDDEN))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
