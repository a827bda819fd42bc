use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Stable machine-readable codes returned to providers, operators and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Webhook input
    InvalidJson,
    InvalidPayload,
    PayloadTooLarge,
    SignatureInvalid,
    ProviderNotSupported,
    NotFound,
    // Reconciliation
    OrderNotFound,
    ProviderMismatch,
    AmountMismatch,
    CurrencyMismatch,
    EventTypeNotAllowed,
    SkuNotFound,
    OrderStatusInvalid,
    OrderStatusChanged,
    // Entitlements
    AttemptRequired,
    BenefitRequired,
    DeltaInvalid,
    // Contention and internal
    WebhookBusy,
    WebhookInternalError,
    // Approvals
    ApprovalNotFound,
    ApprovalStatusInvalid,
    ApprovalExecuteFailed,
    ActorNotFound,
    InvalidArgument,
    Forbidden,
    EventNotFound,
    Exception,
    // Budget
    AiBudgetExceeded,
    AiBudgetLedgerUnavailable,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    ok: bool,
    error_code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", Some(msg.clone()))
            }
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", Some(msg.clone())),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", Some(msg.clone())),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "INVALID_JSON", Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None)
            }
        };

        let body = ErrorResponse {
            ok: false,
            error_code: code,
            message,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Human-readable messages shared between the processor, actions and handlers.
pub mod msg {
    pub const PROVIDER_NOT_SUPPORTED: &str = "provider not supported.";
    pub const INVALID_PAYLOAD: &str = "provider_event_id and order_no are required.";
    pub const SIGNATURE_INVALID: &str = "invalid signature.";
    pub const WEBHOOK_BUSY: &str = "payment webhook is busy, retry later.";
    pub const ORDER_NOT_FOUND: &str = "order not found.";
    pub const PROVIDER_MISMATCH: &str = "provider mismatch.";
    pub const EVENT_TYPE_NOT_ALLOWED: &str = "event type not allowed.";
    pub const AMOUNT_MISMATCH: &str = "amount mismatch.";
    pub const CURRENCY_MISMATCH: &str = "currency mismatch.";
    pub const SKU_NOT_FOUND: &str = "sku not found.";
    pub const ATTEMPT_REQUIRED: &str = "target_attempt_id is required for report_unlock.";
    pub const BENEFIT_REQUIRED: &str = "benefit_code is required.";
    pub const DELTA_INVALID: &str = "delta must be positive.";
    pub const ORDER_STATUS_INVALID: &str = "invalid order status transition.";
    pub const ORDER_STATUS_CHANGED: &str = "order status changed.";
    pub const PAYLOAD_TOO_LARGE: &str = "payload too large.";
    pub const INVALID_JSON: &str = "invalid json payload.";
    pub const WEBHOOK_INTERNAL_ERROR: &str = "webhook internal error.";

    pub const APPROVAL_NOT_FOUND: &str = "approval not found.";
    pub const APPROVAL_STATUS_INVALID: &str = "approval must be APPROVED before execution.";
    pub const APPROVAL_EXECUTE_FAILED: &str = "approval execution failed.";
    pub const ACTOR_NOT_FOUND: &str = "approval actor not found.";
    pub const FORBIDDEN: &str = "permission denied.";
    pub const REASON_REQUIRED: &str = "reason is required.";
    pub const ORDER_AND_REASON_REQUIRED: &str = "order_no and reason are required.";
    pub const EVENT_AND_REASON_REQUIRED: &str = "payment_event_id and reason are required.";
    pub const APPROVAL_PAYLOAD_INVALID: &str = "approval payload is invalid.";
    pub const EVENT_NOT_FOUND: &str = "payment event not found.";
}
