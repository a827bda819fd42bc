use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::approvals::{ActionResult, ApprovalExecutor};
use crate::db::AppState;
use crate::error::{AppError, ErrorCode, Result, msg};
use crate::id::is_valid_prefixed_id;
use crate::jobs::{COMMERCE_QUEUE, JobQueue};
use crate::middleware::AdminContext;
use crate::models::{AdminApproval, ApprovalType, CreateApproval, JobType};

#[derive(Debug, Deserialize)]
pub struct RequestApprovalBody {
    pub org_id: i64,
    #[serde(rename = "type")]
    pub approval_type: ApprovalType,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteQuery {
    #[serde(default)]
    pub sync: bool,
}

pub async fn request_approval(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
    Json(body): Json<RequestApprovalBody>,
) -> Result<(StatusCode, Json<AdminApproval>)> {
    let input = CreateApproval {
        org_id: body.org_id,
        approval_type: body.approval_type,
        payload: body.payload,
        reason: body.reason,
        correlation_id: body.correlation_id,
        requested_by: ctx.admin.id.clone(),
    };
    let approval = ApprovalExecutor::from_state(&state).request_approval(&input, &ctx.request)?;
    Ok((StatusCode::CREATED, Json(approval)))
}

fn check_approval_id(approval_id: &str) -> Result<()> {
    if is_valid_prefixed_id(approval_id) {
        Ok(())
    } else {
        Err(AppError::NotFound(msg::APPROVAL_NOT_FOUND.into()))
    }
}

pub async fn get_approval(
    State(state): State<AppState>,
    Path(approval_id): Path<String>,
) -> Result<Json<AdminApproval>> {
    check_approval_id(&approval_id)?;
    let approval = ApprovalExecutor::from_state(&state)
        .get(&approval_id)?
        .ok_or_else(|| AppError::NotFound(msg::APPROVAL_NOT_FOUND.into()))?;
    Ok(Json(approval))
}

pub async fn approve_approval(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
    Path(approval_id): Path<String>,
) -> Result<Json<AdminApproval>> {
    check_approval_id(&approval_id)?;
    let approval = ApprovalExecutor::from_state(&state).approve(
        &approval_id,
        &ctx.admin.id,
        &ctx.request,
    )?;
    Ok(Json(approval))
}

/// Runs inline with `?sync=true`; otherwise queues an `execute_approval` job
/// and answers 202.
pub async fn execute_approval(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
    Path(approval_id): Path<String>,
    Query(query): Query<ExecuteQuery>,
) -> Result<Response> {
    check_approval_id(&approval_id)?;
    let executor = ApprovalExecutor::from_state(&state);

    if query.sync {
        let result = tokio::task::spawn_blocking(move || executor.execute(&approval_id))
            .await
            .map_err(|e| AppError::Internal(format!("approval task failed: {}", e)))??;
        return Ok(action_response(result));
    }

    if executor.get(&approval_id)?.is_none() {
        return Err(AppError::NotFound(msg::APPROVAL_NOT_FOUND.into()));
    }
    let job = JobQueue::new(state.db.clone()).enqueue(
        JobType::ExecuteApproval,
        &json!({ "approval_id": approval_id }),
        COMMERCE_QUEUE,
    )?;
    tracing::info!(
        approval_id = %approval_id,
        job_id = %job.id,
        admin = %ctx.admin.id,
        "Approval execution queued"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "ok": true,
            "queued": true,
            "approval_id": approval_id,
            "job_id": job.id,
        })),
    )
        .into_response())
}

fn action_status(result: &ActionResult) -> StatusCode {
    if result.ok {
        return StatusCode::OK;
    }
    let code = result
        .code
        .as_deref()
        .and_then(|c| c.parse::<ErrorCode>().ok());
    match code {
        Some(
            ErrorCode::ApprovalNotFound | ErrorCode::OrderNotFound | ErrorCode::EventNotFound,
        ) => StatusCode::NOT_FOUND,
        Some(ErrorCode::ApprovalStatusInvalid) => StatusCode::CONFLICT,
        Some(ErrorCode::Forbidden) => StatusCode::FORBIDDEN,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn action_response(result: ActionResult) -> Response {
    (action_status(&result), Json(result)).into_response()
}
