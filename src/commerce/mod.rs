//! Commerce domain: order transitions, entitlements, wallets and the webhook
//! settlement processor.
//!
//! Domain functions take a `&Connection` so callers decide the transaction
//! boundary. Pass a `Transaction` to get all-or-nothing behavior.

pub mod entitlements;
pub mod orders;
pub mod processor;
pub mod refunds;
pub mod wallet;

pub use processor::{HandleOptions, WebhookOutcome, WebhookProcessor, order_lock_key};
pub use refunds::{AdminRefund, RefundApplied};

use axum::http::StatusCode;
use thiserror::Error;

use crate::error::{AppError, ErrorCode, msg};

/// A business rule refused the operation, or storage failed underneath it.
#[derive(Debug, Error)]
pub enum CommerceError {
    #[error("{code}: {message}")]
    Rejected { code: ErrorCode, message: String },

    #[error(transparent)]
    App(#[from] AppError),
}

impl CommerceError {
    pub fn rejected(code: ErrorCode, message: impl Into<String>) -> Self {
        CommerceError::Rejected {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CommerceError::Rejected { code, .. } => *code,
            CommerceError::App(_) => ErrorCode::WebhookInternalError,
        }
    }

    /// Storage failures are not described to callers.
    pub fn message(&self) -> String {
        match self {
            CommerceError::Rejected { message, .. } => message.clone(),
            CommerceError::App(_) => msg::WEBHOOK_INTERNAL_ERROR.to_string(),
        }
    }

    /// Status the HTTP layer reports for this failure.
    pub fn status(&self) -> StatusCode {
        match self.code() {
            ErrorCode::OrderNotFound
            | ErrorCode::SkuNotFound
            | ErrorCode::AmountMismatch
            | ErrorCode::CurrencyMismatch
            | ErrorCode::EventTypeNotAllowed => StatusCode::NOT_FOUND,
            ErrorCode::OrderStatusChanged => StatusCode::CONFLICT,
            ErrorCode::WebhookInternalError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<rusqlite::Error> for CommerceError {
    fn from(e: rusqlite::Error) -> Self {
        CommerceError::App(AppError::Database(e))
    }
}

impl From<r2d2::Error> for CommerceError {
    fn from(e: r2d2::Error) -> Self {
        CommerceError::App(AppError::Pool(e))
    }
}

pub type CommerceResult<T> = std::result::Result<T, CommerceError>;
