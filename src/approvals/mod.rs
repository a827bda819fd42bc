//! Two-person approvals for privileged operations.
//!
//! An operator files a request, a second operator approves it, and the
//! executor runs the matching domain action exactly once. Re-executing an
//! approval that already ran is a no-op that reports the stored status.

pub mod actions;
pub mod executor;

pub use executor::{ApprovalExecutor, EXECUTION_LEASE_SECS};

use serde::Serialize;
use serde_json::{Value, json};

use crate::error::ErrorCode;
use crate::models::AdminUser;
use crate::util::RequestMeta;

/// What an action or an execution produced. Business failures are values,
/// not errors, so they can be stored on the approval.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: Value,
}

impl ActionResult {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            code: None,
            message: None,
            data,
        }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::failure_with(code.as_ref(), message, json!({}))
    }

    pub fn failure_with(code: &str, message: impl Into<String>, data: Value) -> Self {
        Self {
            ok: false,
            code: Some(code.to_string()),
            message: Some(message.into()),
            data,
        }
    }
}

/// Org scope and identity an action runs under. Built by the executor from
/// the approval row and handed to the action explicitly.
#[derive(Debug, Clone)]
pub struct OrgContext {
    pub org_id: i64,
    pub actor: AdminUser,
    pub reason: String,
    pub correlation_id: String,
    pub approval_id: String,
    pub request: RequestMeta,
}
