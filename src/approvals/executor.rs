use std::panic::{self, AssertUnwindSafe};

use rusqlite::TransactionBehavior;
use serde_json::{Value, json};
use uuid::Uuid;

use super::actions::Actions;
use super::{ActionResult, OrgContext};
use crate::db::{AppState, DbPool, queries};
use crate::error::{AppError, ErrorCode, Result, msg};
use crate::models::{
    ActorType, AdminApproval, AdminUser, ApprovalStatus, AuditAction, CreateApproval,
};
use crate::util::{AuditLogBuilder, RequestMeta, normalize_error_code, sanitize_message};

/// An EXECUTING approval untouched for this long is considered abandoned
/// and may be executed again.
pub const EXECUTION_LEASE_SECS: i64 = 300;

/// Runs the approval state machine:
/// PENDING -> APPROVED -> EXECUTING -> EXECUTED | FAILED.
#[derive(Clone)]
pub struct ApprovalExecutor {
    db: DbPool,
    actions: Actions,
    audit_enabled: bool,
}

impl ApprovalExecutor {
    pub fn new(db: DbPool, audit_enabled: bool) -> Self {
        Self {
            actions: Actions::new(db.clone(), audit_enabled),
            db,
            audit_enabled,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(state.db.clone(), state.config.audit_log_enabled)
    }

    pub fn actions(&self) -> &Actions {
        &self.actions
    }

    /// File a PENDING approval on behalf of an active operator.
    pub fn request_approval(
        &self,
        input: &CreateApproval,
        request: &RequestMeta,
    ) -> Result<AdminApproval> {
        if input.reason.trim().is_empty() {
            return Err(AppError::BadRequest(msg::REASON_REQUIRED.into()));
        }

        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let requester = queries::get_active_admin_user(&tx, &input.requested_by)?
            .ok_or_else(|| AppError::Forbidden(msg::ACTOR_NOT_FOUND.into()))?;

        let mut input = input.clone();
        let correlation_id = input
            .correlation_id
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        input.correlation_id = Some(correlation_id.clone());

        let approval = queries::create_approval(&tx, &input)?;

        let meta = json!({
            "actor": requester.id,
            "org_id": approval.org_id,
            "reason": approval.reason,
            "correlation_id": correlation_id,
            "type": approval.approval_type.as_ref(),
        });
        AuditLogBuilder::new(&tx, self.audit_enabled)
            .actor(ActorType::Admin, Some(&requester.id))
            .action(AuditAction::RequestApproval)
            .target("AdminApproval", &approval.id)
            .org(approval.org_id)
            .meta(&meta)
            .request(request)
            .save()?;
        tx.commit()?;

        tracing::info!(
            approval_id = %approval.id,
            approval_type = approval.approval_type.as_ref(),
            requested_by = %requester.id,
            "Approval requested"
        );
        Ok(approval)
    }

    /// Move a PENDING or FAILED approval to APPROVED.
    pub fn approve(
        &self,
        approval_id: &str,
        reviewer_id: &str,
        request: &RequestMeta,
    ) -> Result<AdminApproval> {
        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let approval = queries::get_approval(&tx, approval_id)?
            .ok_or_else(|| AppError::NotFound(msg::APPROVAL_NOT_FOUND.into()))?;
        let reviewer = queries::get_active_admin_user(&tx, reviewer_id)?
            .ok_or_else(|| AppError::Forbidden(msg::ACTOR_NOT_FOUND.into()))?;

        if !approval.status.can_approve()
            || !queries::approve_approval(&tx, approval_id, &reviewer.id)?
        {
            return Err(AppError::Conflict(format!(
                "approval is {}",
                approval.status.as_ref()
            )));
        }

        let meta = json!({
            "actor": reviewer.id,
            "org_id": approval.org_id,
            "reason": approval.reason,
            "correlation_id": approval.correlation_id,
            "type": approval.approval_type.as_ref(),
            "previous_status": approval.status.as_ref(),
        });
        AuditLogBuilder::new(&tx, self.audit_enabled)
            .actor(ActorType::Admin, Some(&reviewer.id))
            .action(AuditAction::ApproveApproval)
            .target("AdminApproval", &approval.id)
            .org(approval.org_id)
            .meta(&meta)
            .request(request)
            .save()?;

        let approved = queries::get_approval(&tx, approval_id)?
            .ok_or_else(|| AppError::Internal("approval missing after approve".into()))?;
        tx.commit()?;
        Ok(approved)
    }

    pub fn get(&self, approval_id: &str) -> Result<Option<AdminApproval>> {
        let conn = self.db.get()?;
        queries::get_approval(&conn, approval_id)
    }

    /// Execute an approved request exactly once.
    ///
    /// Business failures are recorded on the approval and returned as a
    /// failed `ActionResult`. Once the approval is EXECUTING, storage errors
    /// are recorded as FAILED/`EXCEPTION` too. `Err` is returned only when
    /// nothing could be written; the approval then stays EXECUTING until
    /// `EXECUTION_LEASE_SECS` pass and a retry picks it up.
    pub fn execute(&self, approval_id: &str) -> Result<ActionResult> {
        let approval = {
            let mut conn = self.db.get()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let Some(approval) = queries::get_approval(&tx, approval_id)? else {
                return Ok(ActionResult::failure(
                    ErrorCode::ApprovalNotFound,
                    msg::APPROVAL_NOT_FOUND,
                ));
            };
            let stale_before = queries::now() - EXECUTION_LEASE_SECS;
            let abandoned = approval.status == ApprovalStatus::Executing
                && approval.updated_at <= stale_before;
            if approval.status.is_terminal_or_running() && !abandoned {
                return Ok(ActionResult::success(json!({
                    "approval_id": approval.id,
                    "idempotent": true,
                    "status": approval.status.as_ref(),
                })));
            }
            if (approval.status != ApprovalStatus::Approved && !abandoned)
                || !queries::begin_approval_execution(&tx, approval_id, stale_before)?
            {
                return Ok(ActionResult::failure_with(
                    ErrorCode::ApprovalStatusInvalid.as_ref(),
                    msg::APPROVAL_STATUS_INVALID,
                    json!({ "approval_id": approval.id, "status": approval.status.as_ref() }),
                ));
            }
            tx.commit()?;
            if abandoned {
                tracing::warn!(
                    approval_id = %approval.id,
                    "Resuming approval abandoned in EXECUTING"
                );
            }
            approval
        };

        tracing::info!(
            approval_id = %approval.id,
            approval_type = approval.approval_type.as_ref(),
            "Executing approval"
        );

        match self.run_and_finish(&approval) {
            Ok(result) => Ok(result),
            Err(e) => self.record_exception(&approval, &e),
        }
    }

    fn run_and_finish(&self, approval: &AdminApproval) -> Result<ActionResult> {
        let Some(actor) = self.resolve_actor(approval)? else {
            return self.finish_failure(
                approval,
                None,
                ErrorCode::ActorNotFound.as_ref(),
                msg::ACTOR_NOT_FOUND,
            );
        };

        let ctx = OrgContext {
            org_id: approval.org_id.max(0),
            actor,
            reason: approval.reason.clone(),
            correlation_id: approval
                .correlation_id
                .clone()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            approval_id: approval.id.clone(),
            request: RequestMeta::default(),
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.actions
                .run(approval.approval_type, &approval.payload, &ctx)
        }));

        match outcome {
            Ok(Ok(result)) if result.ok => self.finish_success(approval, &ctx, result.data),
            Ok(Ok(result)) => {
                let code = result
                    .code
                    .as_deref()
                    .map(normalize_error_code)
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| ErrorCode::ApprovalExecuteFailed.as_ref().to_string());
                let message = result.message.as_deref().unwrap_or_default();
                self.finish_failure(approval, Some(&ctx), &code, message)
            }
            Ok(Err(e)) => {
                tracing::error!(approval_id = %approval.id, "Approval action errored: {}", e);
                self.finish_failure(
                    approval,
                    Some(&ctx),
                    ErrorCode::Exception.as_ref(),
                    &e.to_string(),
                )
            }
            Err(panic) => {
                let panic_msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(
                    approval_id = %approval.id,
                    "Approval action panicked: {}",
                    panic_msg
                );
                self.finish_failure(
                    approval,
                    Some(&ctx),
                    ErrorCode::Exception.as_ref(),
                    &panic_msg,
                )
            }
        }
    }

    /// Last resort after a storage error: mark the approval FAILED on its
    /// own so it can be re-approved. The audit row follows best-effort.
    fn record_exception(&self, approval: &AdminApproval, error: &AppError) -> Result<ActionResult> {
        tracing::error!(approval_id = %approval.id, "Approval execution errored: {}", error);
        let code = ErrorCode::Exception.as_ref();
        let mut message = sanitize_message(&error.to_string());
        if message.is_empty() {
            message = msg::APPROVAL_EXECUTE_FAILED.to_string();
        }

        let conn = self.db.get()?;
        if !queries::finish_approval_failure(&conn, &approval.id, code, &message)? {
            // Another worker already finished it.
            return Ok(ActionResult::failure_with(
                ErrorCode::ApprovalStatusInvalid.as_ref(),
                msg::APPROVAL_STATUS_INVALID,
                json!({ "approval_id": approval.id }),
            ));
        }

        let meta = json!({
            "actor": approval.approved_by,
            "org_id": approval.org_id,
            "reason": approval.reason,
            "correlation_id": approval.correlation_id,
            "type": approval.approval_type.as_ref(),
            "error_code": code,
            "error_message": message,
        });
        AuditLogBuilder::new(&conn, self.audit_enabled)
            .actor(ActorType::Admin, approval.approved_by.as_deref())
            .action(AuditAction::ApprovalExecutedFailed)
            .target("AdminApproval", &approval.id)
            .org(approval.org_id)
            .meta(&meta)
            .save_best_effort();

        Ok(ActionResult::failure_with(
            code,
            message,
            json!({ "approval_id": approval.id }),
        ))
    }

    fn resolve_actor(&self, approval: &AdminApproval) -> Result<Option<AdminUser>> {
        let conn = self.db.get()?;
        for candidate in [&approval.requested_by, &approval.approved_by]
            .into_iter()
            .flatten()
        {
            if let Some(user) = queries::get_active_admin_user(&conn, candidate)? {
                return Ok(Some(user));
            }
        }
        Ok(None)
    }

    fn finish_success(
        &self,
        approval: &AdminApproval,
        ctx: &OrgContext,
        data: Value,
    ) -> Result<ActionResult> {
        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        queries::finish_approval_success(&tx, &approval.id)?;

        let meta = json!({
            "actor": ctx.actor.id,
            "org_id": ctx.org_id,
            "reason": ctx.reason,
            "correlation_id": ctx.correlation_id,
            "type": approval.approval_type.as_ref(),
            "result": data,
        });
        AuditLogBuilder::new(&tx, self.audit_enabled)
            .actor(ActorType::Admin, approval.approved_by.as_deref())
            .action(AuditAction::ApprovalExecutedSuccess)
            .target("AdminApproval", &approval.id)
            .org(ctx.org_id)
            .meta(&meta)
            .save()?;
        tx.commit()?;

        tracing::info!(approval_id = %approval.id, "Approval executed");
        Ok(ActionResult::success(json!({
            "approval_id": approval.id,
            "status": ApprovalStatus::Executed.as_ref(),
            "result": data,
        })))
    }

    fn finish_failure(
        &self,
        approval: &AdminApproval,
        ctx: Option<&OrgContext>,
        code: &str,
        message: &str,
    ) -> Result<ActionResult> {
        let mut message = sanitize_message(message);
        if message.is_empty() {
            message = msg::APPROVAL_EXECUTE_FAILED.to_string();
        }

        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        queries::finish_approval_failure(&tx, &approval.id, code, &message)?;

        let actor = ctx
            .map(|c| c.actor.id.as_str())
            .or(approval.approved_by.as_deref());
        let correlation_id = ctx
            .map(|c| c.correlation_id.as_str())
            .or(approval.correlation_id.as_deref());
        let meta = json!({
            "actor": actor,
            "org_id": approval.org_id,
            "reason": approval.reason,
            "correlation_id": correlation_id,
            "type": approval.approval_type.as_ref(),
            "error_code": code,
            "error_message": message,
        });
        AuditLogBuilder::new(&tx, self.audit_enabled)
            .actor(ActorType::Admin, approval.approved_by.as_deref())
            .action(AuditAction::ApprovalExecutedFailed)
            .target("AdminApproval", &approval.id)
            .org(approval.org_id)
            .meta(&meta)
            .save()?;
        tx.commit()?;

        tracing::warn!(
            approval_id = %approval.id,
            error_code = code,
            "Approval execution failed: {}",
            message
        );
        Ok(ActionResult::failure_with(
            code,
            message,
            json!({ "approval_id": approval.id }),
        ))
    }
}
