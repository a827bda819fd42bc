//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! Models implement `FromRow` to define how they are constructed from a row;
//! the `*_COLS` constants keep SELECT lists and column indices in sync.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum, converting parse errors to rusqlite errors
/// instead of panicking on unexpected values.
pub(crate) fn parse_enum<T: std::str::FromStr>(
    row: &Row,
    col: usize,
    col_name: &str,
) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Optional JSON text column. Malformed JSON is treated as absent.
fn parse_json(row: &Row, col: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    Ok(row
        .get::<_, Option<String>>(col)?
        .and_then(|s| serde_json::from_str(&s).ok()))
}

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const ORDER_COLS: &str = "id, org_id, order_no, user_id, anon_id, sku, quantity, target_attempt_id, amount_cents, currency, provider, status, external_trade_no, paid_at, fulfilled_at, refunded_at, refund_amount_cents, refund_reason, created_at, updated_at";

pub const SKU_COLS: &str = "sku, benefit_code, kind, unit_qty, is_active";

pub const PAYMENT_EVENT_COLS: &str = "id, org_id, provider, provider_event_id, order_no, event_type, status, handle_status, signature_ok, attempts, last_error_code, last_error_message, payload_json, payload_sha256, payload_size_bytes, payload_excerpt, received_at, processed_at, handled_at, updated_at";

pub const BENEFIT_GRANT_COLS: &str = "id, org_id, user_id, benefit_ref, benefit_code, scope, attempt_id, order_no, status, meta_json, expires_at, revoked_at, created_at, updated_at";

pub const WALLET_COLS: &str = "id, org_id, benefit_code, balance, updated_at";

pub const WALLET_LEDGER_COLS: &str = "id, org_id, benefit_code, delta, reason, order_no, attempt_id, idempotency_key, meta_json, created_at";

pub const ADMIN_USER_COLS: &str = "id, email, name, permissions, is_active, created_at";

pub const ADMIN_APPROVAL_COLS: &str = "id, org_id, type, status, payload_json, reason, correlation_id, requested_by, approved_by, retry_count, error_code, error_message, executed_at, created_at, updated_at";

pub const CONTENT_RELEASE_COLS: &str = "id, action, region, locale, dir_alias, from_version_id, to_version_id, from_pack_id, to_pack_id, status, message, created_by, created_at";

pub const IDEMPOTENCY_COLS: &str =
    "id, provider, external_id, recorded_at, hash, ingest_batch_id, first_seen_at, last_seen_at";

pub const JOB_COLS: &str = "id, job_type, queue, payload_json, status, attempts, max_attempts, available_at, last_error, created_at, updated_at";

pub const AUDIT_LOG_COLS: &str = "id, timestamp, actor_type, actor_id, org_id, action, target_type, target_id, meta_json, ip, user_agent, request_id";

// ============ FromRow Implementations ============

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get(0)?,
            org_id: row.get(1)?,
            order_no: row.get(2)?,
            user_id: row.get(3)?,
            anon_id: row.get(4)?,
            sku: row.get(5)?,
            quantity: row.get(6)?,
            target_attempt_id: row.get(7)?,
            amount_cents: row.get(8)?,
            currency: row.get(9)?,
            provider: row.get(10)?,
            status: parse_enum(row, 11, "status")?,
            external_trade_no: row.get(12)?,
            paid_at: row.get(13)?,
            fulfilled_at: row.get(14)?,
            refunded_at: row.get(15)?,
            refund_amount_cents: row.get(16)?,
            refund_reason: row.get(17)?,
            created_at: row.get(18)?,
            updated_at: row.get(19)?,
        })
    }
}

impl FromRow for Sku {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Sku {
            sku: row.get(0)?,
            benefit_code: row.get(1)?,
            kind: parse_enum(row, 2, "kind")?,
            unit_qty: row.get(3)?,
            is_active: row.get::<_, i32>(4)? != 0,
        })
    }
}

impl FromRow for PaymentEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PaymentEvent {
            id: row.get(0)?,
            org_id: row.get(1)?,
            provider: row.get(2)?,
            provider_event_id: row.get(3)?,
            order_no: row.get(4)?,
            event_type: row.get(5)?,
            status: parse_enum(row, 6, "status")?,
            handle_status: parse_enum(row, 7, "handle_status")?,
            signature_ok: row.get::<_, i32>(8)? != 0,
            attempts: row.get(9)?,
            last_error_code: row.get(10)?,
            last_error_message: row.get(11)?,
            payload_json: row.get(12)?,
            payload_sha256: row.get(13)?,
            payload_size_bytes: row.get(14)?,
            payload_excerpt: row.get(15)?,
            received_at: row.get(16)?,
            processed_at: row.get(17)?,
            handled_at: row.get(18)?,
            updated_at: row.get(19)?,
        })
    }
}

impl FromRow for BenefitGrant {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(BenefitGrant {
            id: row.get(0)?,
            org_id: row.get(1)?,
            user_id: row.get(2)?,
            benefit_ref: row.get(3)?,
            benefit_code: row.get(4)?,
            scope: row.get(5)?,
            attempt_id: row.get(6)?,
            order_no: row.get(7)?,
            status: parse_enum(row, 8, "status")?,
            meta: parse_json(row, 9)?,
            expires_at: row.get(10)?,
            revoked_at: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }
}

impl FromRow for Wallet {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Wallet {
            id: row.get(0)?,
            org_id: row.get(1)?,
            benefit_code: row.get(2)?,
            balance: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }
}

impl FromRow for WalletLedgerEntry {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WalletLedgerEntry {
            id: row.get(0)?,
            org_id: row.get(1)?,
            benefit_code: row.get(2)?,
            delta: row.get(3)?,
            reason: parse_enum(row, 4, "reason")?,
            order_no: row.get(5)?,
            attempt_id: row.get(6)?,
            idempotency_key: row.get(7)?,
            meta: parse_json(row, 8)?,
            created_at: row.get(9)?,
        })
    }
}

impl FromRow for AdminUser {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let permissions: String = row.get(3)?;
        Ok(AdminUser {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            permissions: permissions
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            is_active: row.get::<_, i32>(4)? != 0,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for AdminApproval {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(AdminApproval {
            id: row.get(0)?,
            org_id: row.get(1)?,
            approval_type: parse_enum(row, 2, "type")?,
            status: parse_enum(row, 3, "status")?,
            payload: parse_json(row, 4)?.unwrap_or_else(|| serde_json::json!({})),
            reason: row.get(5)?,
            correlation_id: row.get(6)?,
            requested_by: row.get(7)?,
            approved_by: row.get(8)?,
            retry_count: row.get(9)?,
            error_code: row.get(10)?,
            error_message: row.get(11)?,
            executed_at: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }
}

impl FromRow for ContentRelease {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ContentRelease {
            id: row.get(0)?,
            action: row.get(1)?,
            region: row.get(2)?,
            locale: row.get(3)?,
            dir_alias: row.get(4)?,
            from_version_id: row.get(5)?,
            to_version_id: row.get(6)?,
            from_pack_id: row.get(7)?,
            to_pack_id: row.get(8)?,
            status: row.get(9)?,
            message: row.get(10)?,
            created_by: row.get(11)?,
            created_at: row.get(12)?,
        })
    }
}

impl FromRow for IdempotencyRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(IdempotencyRecord {
            id: row.get(0)?,
            provider: row.get(1)?,
            external_id: row.get(2)?,
            recorded_at: row.get(3)?,
            hash: row.get(4)?,
            ingest_batch_id: row.get(5)?,
            first_seen_at: row.get(6)?,
            last_seen_at: row.get(7)?,
        })
    }
}

impl FromRow for Job {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Job {
            id: row.get(0)?,
            job_type: parse_enum(row, 1, "job_type")?,
            queue: row.get(2)?,
            payload: parse_json(row, 3)?.unwrap_or(serde_json::Value::Null),
            status: parse_enum(row, 4, "status")?,
            attempts: row.get(5)?,
            max_attempts: row.get(6)?,
            available_at: row.get(7)?,
            last_error: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl FromRow for AuditLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(AuditLog {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            actor_type: parse_enum(row, 2, "actor_type")?,
            actor_id: row.get(3)?,
            org_id: row.get(4)?,
            action: row.get(5)?,
            target_type: row.get(6)?,
            target_id: row.get(7)?,
            meta: parse_json(row, 8)?,
            ip: row.get(9)?,
            user_agent: row.get(10)?,
            request_id: row.get(11)?,
        })
    }
}
