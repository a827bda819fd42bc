//! Durable background jobs stored in the `jobs` table.
//!
//! Jobs are claimed one at a time with a compare-and-swap on their status.
//! A failing job is retried up to `MAX_ATTEMPTS` times with a growing delay,
//! then parked as `failed`.

use std::time::Duration;

use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::approvals::ApprovalExecutor;
use crate::commerce::{AdminRefund, CommerceError, HandleOptions, WebhookProcessor};
use crate::db::{AppState, DbPool, queries};
use crate::error::{AppError, ErrorCode, Result, msg};
use crate::models::{
    ActorType, AuditAction, EventStatus, HandleStatus, Job, JobType, PayloadSummary, PaymentEvent,
};
use crate::util::AuditLogBuilder;

pub const COMMERCE_QUEUE: &str = "commerce";
pub const MAX_ATTEMPTS: i64 = 3;
/// A running job not finished within this many seconds is handed to another
/// worker.
pub const JOB_LEASE_SECS: i64 = 600;

/// Delay before the next try, indexed by attempts already made.
const BACKOFF_SECS: [i64; 3] = [5, 10, 20];

pub fn backoff_secs(attempts: i64) -> i64 {
    let idx = (attempts.max(1) - 1) as usize;
    BACKOFF_SECS[idx.min(BACKOFF_SECS.len() - 1)]
}

/// Enqueue on an existing connection, typically inside the transaction that
/// decided the job is needed.
pub fn enqueue_on(conn: &Connection, job_type: JobType, payload: &Value) -> Result<Job> {
    let job = queries::enqueue_job(conn, job_type, payload, COMMERCE_QUEUE, MAX_ATTEMPTS)?;
    tracing::debug!(job_id = %job.id, job_type = job_type.as_ref(), "Job enqueued");
    Ok(job)
}

#[derive(Clone)]
pub struct JobQueue {
    db: DbPool,
}

impl JobQueue {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn enqueue(&self, job_type: JobType, payload: &Value, queue: &str) -> Result<Job> {
        let conn = self.db.get()?;
        queries::enqueue_job(&conn, job_type, payload, queue, MAX_ATTEMPTS)
    }

    pub fn claim(&self) -> Result<Option<Job>> {
        let conn = self.db.get()?;
        queries::claim_next_job(&conn, queries::now() - JOB_LEASE_SECS)
    }

    /// Fail running jobs whose lease ran out on their last attempt.
    pub fn reap_stale(&self) -> Result<usize> {
        let conn = self.db.get()?;
        queries::fail_stale_jobs(&conn, queries::now() - JOB_LEASE_SECS)
    }

    pub fn complete(&self, job: &Job) -> Result<()> {
        let conn = self.db.get()?;
        queries::complete_job(&conn, &job.id)
    }

    /// Record a failed attempt. Returns true if the job will be retried.
    pub fn fail(&self, job: &Job, error: &str) -> Result<bool> {
        let conn = self.db.get()?;
        let retry = job.attempts < job.max_attempts;
        let delay = retry.then(|| backoff_secs(job.attempts));
        queries::fail_job(&conn, &job.id, error, delay)?;
        Ok(retry)
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteApprovalPayload {
    approval_id: String,
}

#[derive(Debug, Deserialize)]
struct ReprocessEventPayload {
    payment_event_id: String,
    org_id: i64,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    correlation_id: String,
}

#[derive(Debug, Deserialize)]
struct RefundOrderPayload {
    org_id: i64,
    order_no: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    correlation_id: String,
    #[serde(default)]
    actor_id: Option<String>,
}

/// Claims due jobs and runs them.
#[derive(Clone)]
pub struct JobWorker {
    queue: JobQueue,
    db: DbPool,
    executor: ApprovalExecutor,
    processor: WebhookProcessor,
    audit_enabled: bool,
    poll_interval: Duration,
}

impl JobWorker {
    pub fn new(state: &AppState) -> Self {
        Self {
            queue: JobQueue::new(state.db.clone()),
            db: state.db.clone(),
            executor: ApprovalExecutor::from_state(state),
            processor: WebhookProcessor::new(state),
            audit_enabled: state.config.audit_log_enabled,
            poll_interval: Duration::from_secs(state.config.job_poll_secs.max(1)),
        }
    }

    /// Poll forever on a background task.
    pub fn spawn(self) {
        tracing::info!(
            "Job worker started (polls every {}s)",
            self.poll_interval.as_secs()
        );
        tokio::spawn(async move {
            loop {
                match self.run_once().await {
                    Ok(Some(_)) => continue,
                    Ok(None) => {}
                    Err(e) => tracing::warn!("Job worker poll failed: {}", e),
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        });
    }

    /// Run every job that is due right now. Returns how many ran.
    pub async fn drain(&self) -> Result<usize> {
        let mut ran = 0;
        while self.run_once().await?.is_some() {
            ran += 1;
        }
        Ok(ran)
    }

    /// Claim and run one due job. Returns the job as it was claimed.
    pub async fn run_once(&self) -> Result<Option<Job>> {
        let Some(job) = self.queue.claim()? else {
            return Ok(None);
        };

        tracing::debug!(
            job_id = %job.id,
            job_type = job.job_type.as_ref(),
            attempt = job.attempts,
            "Running job"
        );

        match self.run_job(&job).await {
            Ok(()) => self.queue.complete(&job)?,
            Err(e) => {
                let retry = self.queue.fail(&job, &e.to_string())?;
                if retry {
                    tracing::warn!(
                        job_id = %job.id,
                        attempt = job.attempts,
                        "Job failed, will retry: {}",
                        e
                    );
                } else {
                    tracing::error!(job_id = %job.id, "Job failed permanently: {}", e);
                }
            }
        }
        Ok(Some(job))
    }

    async fn run_job(&self, job: &Job) -> Result<()> {
        match job.job_type {
            JobType::ExecuteApproval => {
                let payload: ExecuteApprovalPayload = serde_json::from_value(job.payload.clone())?;
                let executor = self.executor.clone();
                let result = tokio::task::spawn_blocking(move || {
                    executor.execute(&payload.approval_id)
                })
                .await
                .map_err(|e| AppError::Internal(format!("approval task failed: {}", e)))??;
                if !result.ok {
                    tracing::info!(
                        code = result.code.as_deref().unwrap_or_default(),
                        "Queued approval finished without success"
                    );
                }
                Ok(())
            }
            JobType::ReprocessPaymentEvent => {
                let payload: ReprocessEventPayload = serde_json::from_value(job.payload.clone())?;
                self.reprocess_payment_event(&payload).await
            }
            JobType::RefundOrder => {
                let payload: RefundOrderPayload = serde_json::from_value(job.payload.clone())?;
                self.refund_order(&payload).await
            }
        }
    }

    async fn reprocess_payment_event(&self, payload: &ReprocessEventPayload) -> Result<()> {
        let event = {
            let conn = self.db.get()?;
            queries::get_payment_event_for_org(&conn, &payload.payment_event_id, payload.org_id)?
        };
        let Some(event) = event else {
            tracing::warn!(
                payment_event_id = %payload.payment_event_id,
                "Reprocess skipped: payment event not found"
            );
            return Ok(());
        };

        let stored = event
            .payload_json
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .filter(|v| v.is_object());
        let Some(stored) = stored else {
            return self.record_reprocess_failure(
                &event,
                payload,
                ErrorCode::InvalidPayload.as_ref(),
                "stored payload is missing or invalid.",
            );
        };

        let options = HandleOptions {
            signature_ok: event.signature_ok,
            amount_bypass: false,
            payload_meta: event.payload_sha256.clone().map(|sha256| PayloadSummary {
                sha256,
                size_bytes: event.payload_size_bytes.unwrap_or_default(),
                excerpt: event.payload_excerpt.clone().unwrap_or_default(),
            }),
        };
        let outcome = self
            .processor
            .handle(&event.provider, &stored, event.org_id, options)
            .await;

        if outcome.ok {
            let handle_status = if outcome.is_duplicate() {
                HandleStatus::Duplicate
            } else {
                HandleStatus::Reprocessed
            };
            let conn = self.db.get()?;
            queries::set_payment_event_handle_status(
                &conn,
                &event.id,
                Some(EventStatus::Processed),
                handle_status,
            )?;
            let meta = json!({
                "org_id": payload.org_id,
                "reason": payload.reason,
                "correlation_id": payload.correlation_id,
                "provider": event.provider,
                "provider_event_id": event.provider_event_id,
                "order_no": event.order_no,
                "handle_status": handle_status.as_ref(),
            });
            AuditLogBuilder::new(&conn, self.audit_enabled)
                .action(AuditAction::ReprocessPaymentEventExecuted)
                .target("PaymentEvent", &event.id)
                .org(payload.org_id)
                .meta(&meta)
                .save_best_effort();
            tracing::info!(payment_event_id = %event.id, "Payment event reprocessed");
            return Ok(());
        }

        let code = outcome.error_code.clone().unwrap_or_default();
        if code == ErrorCode::WebhookBusy.as_ref() {
            return Err(AppError::Internal(msg::WEBHOOK_BUSY.into()));
        }
        let message = outcome.message.clone().unwrap_or_default();
        self.record_reprocess_failure(&event, payload, &code, &message)
    }

    fn record_reprocess_failure(
        &self,
        event: &PaymentEvent,
        payload: &ReprocessEventPayload,
        code: &str,
        message: &str,
    ) -> Result<()> {
        let conn = self.db.get()?;
        queries::mark_payment_event(&conn, &event.id, EventStatus::Failed, Some((code, message)))?;
        queries::set_payment_event_handle_status(
            &conn,
            &event.id,
            None,
            HandleStatus::ReprocessFailed,
        )?;
        let meta = json!({
            "org_id": payload.org_id,
            "reason": payload.reason,
            "correlation_id": payload.correlation_id,
            "provider": event.provider,
            "provider_event_id": event.provider_event_id,
            "order_no": event.order_no,
            "error_code": code,
            "error_message": message,
        });
        AuditLogBuilder::new(&conn, self.audit_enabled)
            .actor(ActorType::System, None)
            .action(AuditAction::ReprocessPaymentEventFailed)
            .target("PaymentEvent", &event.id)
            .org(payload.org_id)
            .meta(&meta)
            .save_best_effort();
        tracing::warn!(
            payment_event_id = %event.id,
            error_code = code,
            "Payment event reprocess failed"
        );
        Ok(())
    }

    async fn refund_order(&self, payload: &RefundOrderPayload) -> Result<()> {
        let request = AdminRefund {
            org_id: payload.org_id,
            order_no: payload.order_no.clone(),
            reason: payload.reason.clone(),
            correlation_id: payload.correlation_id.clone(),
            actor_id: payload.actor_id.clone(),
        };
        match self.processor.apply_admin_refund(&request).await {
            Ok(applied) => {
                if applied.already_refunded {
                    tracing::info!(
                        order_no = %applied.order_no,
                        "Refund job found order already refunded"
                    );
                }
                Ok(())
            }
            // Lock contention is transient; let the queue retry.
            Err(CommerceError::Rejected {
                code: ErrorCode::WebhookBusy,
                message,
            }) => Err(AppError::Internal(message)),
            Err(CommerceError::Rejected { code, message }) => {
                tracing::error!(
                    order_no = %payload.order_no,
                    code = code.as_ref(),
                    "Refund job rejected: {}",
                    message
                );
                Ok(())
            }
            Err(CommerceError::App(e)) => Err(e),
        }
    }
}
