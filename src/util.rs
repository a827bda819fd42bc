//! Shared helpers: request metadata, audit logging, message hygiene.

use axum::http::HeaderMap;
use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::db::queries;
use crate::error::Result;
use crate::models::{ActorType, AuditAction, AuditLog, PayloadSummary};

/// Stored excerpts never exceed this many bytes.
pub const PAYLOAD_EXCERPT_BYTES: usize = 8192;

const MAX_MESSAGE_CHARS: usize = 255;

/// Extract client IP address and user-agent from request headers.
///
/// Tries `x-forwarded-for` first (for proxied requests), then `x-real-ip`.
pub fn extract_request_info(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    (ip, user_agent)
}

/// Extract a Bearer token from the Authorization header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

/// Request metadata carried into audit rows. Background work has none.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
}

impl RequestMeta {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let (ip, user_agent) = extract_request_info(headers);
        let request_id = headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        Self {
            ip,
            user_agent,
            request_id,
        }
    }
}

/// Builder for creating audit log entries.
///
/// Works on any connection, including an open transaction, so mandatory
/// audits commit or roll back together with the change they describe.
///
/// # Example
/// ```ignore
/// AuditLogBuilder::new(&tx, config.audit_log_enabled)
///     .actor(ActorType::Admin, Some(&admin.id))
///     .action(AuditAction::RevokeBenefit)
///     .target("Order", &order.order_no)
///     .org(ctx.org_id)
///     .meta(&serde_json::json!({ "revoked": n }))
///     .save()?;
/// ```
pub struct AuditLogBuilder<'a> {
    conn: &'a Connection,
    enabled: bool,
    actor_type: ActorType,
    actor_id: Option<&'a str>,
    action: Option<AuditAction>,
    target_type: &'a str,
    target_id: &'a str,
    org_id: i64,
    meta: Option<&'a serde_json::Value>,
    request: Option<&'a RequestMeta>,
}

impl<'a> AuditLogBuilder<'a> {
    pub fn new(conn: &'a Connection, enabled: bool) -> Self {
        Self {
            conn,
            enabled,
            actor_type: ActorType::System,
            actor_id: None,
            action: None,
            target_type: "",
            target_id: "",
            org_id: 0,
            meta: None,
            request: None,
        }
    }

    pub fn actor(mut self, actor_type: ActorType, actor_id: Option<&'a str>) -> Self {
        self.actor_type = actor_type;
        self.actor_id = actor_id;
        self
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn target(mut self, target_type: &'a str, target_id: &'a str) -> Self {
        self.target_type = target_type;
        self.target_id = target_id;
        self
    }

    pub fn org(mut self, org_id: i64) -> Self {
        self.org_id = org_id;
        self
    }

    pub fn meta(mut self, meta: &'a serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn request(mut self, request: &'a RequestMeta) -> Self {
        self.request = Some(request);
        self
    }

    pub fn save(self) -> Result<AuditLog> {
        let action = self.action.ok_or_else(|| {
            crate::error::AppError::Internal("audit log saved without an action".into())
        })?;
        let request = self.request.cloned().unwrap_or_default();
        queries::create_audit_log(
            self.conn,
            self.enabled,
            self.actor_type,
            self.actor_id,
            self.org_id,
            action.as_ref(),
            self.target_type,
            self.target_id,
            self.meta,
            request.ip.as_deref(),
            request.user_agent.as_deref(),
            request.request_id.as_deref(),
        )
    }

    /// Best-effort variant: failures are logged and swallowed.
    pub fn save_best_effort(self) {
        let action = self.action;
        if let Err(e) = self.save() {
            tracing::warn!(action = ?action, "Failed to write audit log: {}", e);
        }
    }
}

/// Trim, collapse internal whitespace and cap at 255 characters.
pub fn sanitize_message(message: &str) -> String {
    let collapsed = message.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_MESSAGE_CHARS).collect()
}

/// Uppercase and replace anything outside `[A-Z0-9_]` with `_`.
pub fn normalize_error_code(code: &str) -> String {
    code.trim()
        .to_uppercase()
        .chars()
        .map(|c| {
            if c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Digest, size and a UTF-8 safe excerpt of a raw webhook body.
pub fn summarize_payload(raw: &[u8]) -> PayloadSummary {
    let text = String::from_utf8_lossy(raw);
    let mut end = text.len().min(PAYLOAD_EXCERPT_BYTES);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    PayloadSummary {
        sha256: sha256_hex(raw),
        size_bytes: raw.len() as i64,
        excerpt: text[..end].to_string(),
    }
}
