use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params, types::Value};

use crate::error::{AppError, Result};
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    ADMIN_APPROVAL_COLS, ADMIN_USER_COLS, AUDIT_LOG_COLS, BENEFIT_GRANT_COLS,
    CONTENT_RELEASE_COLS, IDEMPOTENCY_COLS, JOB_COLS, ORDER_COLS, PAYMENT_EVENT_COLS, SKU_COLS,
    WALLET_COLS, WALLET_LEDGER_COLS, query_all, query_one,
};

pub fn now() -> i64 {
    Utc::now().timestamp()
}

/// Builder for dynamic UPDATE statements with optional fields.
/// Guards turn the update into a compare-and-swap: no row matches unless
/// every guarded column still holds the expected value.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    guards: Vec<(&'static str, Value)>,
    track_updated_at: bool,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            guards: Vec::new(),
            track_updated_at: false,
        }
    }

    fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Set a column to an explicit value (including NULL).
    fn set_nullable<V: Into<Value>>(mut self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.fields.push((column, v.into())),
            None => self.fields.push((column, Value::Null)),
        }
        self
    }

    fn guard(mut self, column: &'static str, expected: impl Into<Value>) -> Self {
        self.guards.push((column, expected.into()));
        self
    }

    fn execute(mut self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, sets.join(", "));
        for (col, _) in &self.guards {
            sql.push_str(&format!(" AND {} = ?", col));
        }
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        values.extend(self.guards.into_iter().map(|(_, v)| v));
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

fn json_text(value: Option<&serde_json::Value>) -> Option<String> {
    value.map(|v| v.to_string())
}

// ============ Skus ============

pub fn create_sku(conn: &Connection, input: &CreateSku) -> Result<Sku> {
    let sku = input.sku.trim().to_uppercase();
    let benefit_code = input.benefit_code.trim().to_uppercase();
    conn.execute(
        "INSERT INTO skus (sku, benefit_code, kind, unit_qty, is_active) VALUES (?1, ?2, ?3, ?4, 1)",
        params![&sku, &benefit_code, input.kind.as_ref(), input.unit_qty],
    )?;
    Ok(Sku {
        sku,
        benefit_code,
        kind: input.kind,
        unit_qty: input.unit_qty,
        is_active: true,
    })
}

pub fn get_active_sku(conn: &Connection, sku: &str) -> Result<Option<Sku>> {
    let sku = sku.trim().to_uppercase();
    query_one(
        conn,
        &format!("SELECT {} FROM skus WHERE sku = ?1 AND is_active = 1", SKU_COLS),
        &[&sku],
    )
}

// ============ Orders ============

pub fn create_order(conn: &Connection, input: &CreateOrder) -> Result<Order> {
    let id = EntityType::Order.gen_id();
    let now = now();
    let currency = input.currency.trim().to_uppercase();
    let provider = input.provider.trim().to_lowercase();
    let sku = input.sku.trim().to_uppercase();

    conn.execute(
        "INSERT INTO orders (id, org_id, order_no, user_id, anon_id, sku, quantity, target_attempt_id, amount_cents, currency, provider, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'created', ?12, ?12)",
        params![
            &id,
            input.org_id,
            &input.order_no,
            &input.user_id,
            &input.anon_id,
            &sku,
            input.quantity.max(1),
            &input.target_attempt_id,
            input.amount_cents,
            &currency,
            &provider,
            now,
        ],
    )?;

    Ok(Order {
        id,
        org_id: input.org_id,
        order_no: input.order_no.clone(),
        user_id: input.user_id.clone(),
        anon_id: input.anon_id.clone(),
        sku,
        quantity: input.quantity.max(1),
        target_attempt_id: input.target_attempt_id.clone(),
        amount_cents: input.amount_cents,
        currency,
        provider,
        status: OrderStatus::Created,
        external_trade_no: None,
        paid_at: None,
        fulfilled_at: None,
        refunded_at: None,
        refund_amount_cents: None,
        refund_reason: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_order(conn: &Connection, org_id: i64, order_no: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM orders WHERE org_id = ?1 AND order_no = ?2",
            ORDER_COLS
        ),
        &[&org_id, &order_no],
    )
}

/// Lookup across orgs, used to resolve the org of an inbound webhook.
pub fn find_order_by_no(conn: &Connection, order_no: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM orders WHERE order_no = ?1 ORDER BY created_at LIMIT 1",
            ORDER_COLS
        ),
        &[&order_no],
    )
}

/// Optional columns written alongside a status transition.
#[derive(Debug, Default, Clone)]
pub struct OrderTransitionFields<'a> {
    pub external_trade_no: Option<&'a str>,
    pub paid_at: Option<i64>,
    pub refund_amount_cents: Option<i64>,
    pub refund_reason: Option<&'a str>,
}

/// Compare-and-swap the order status. Returns false when the row no longer
/// holds `from`.
pub fn cas_order_status(
    conn: &Connection,
    order_id: &str,
    from: OrderStatus,
    to: OrderStatus,
    fields: &OrderTransitionFields,
) -> Result<bool> {
    let now = now();
    let mut update = UpdateBuilder::new("orders", order_id)
        .with_updated_at()
        .set("status", to.as_ref().to_string())
        .set_opt("external_trade_no", fields.external_trade_no.map(String::from))
        .set_opt("refund_amount_cents", fields.refund_amount_cents)
        .set_opt("refund_reason", fields.refund_reason.map(String::from))
        .guard("status", from.as_ref().to_string());

    update = match to {
        OrderStatus::Paid => update.set("paid_at", fields.paid_at.unwrap_or(now)),
        OrderStatus::Fulfilled => update.set("fulfilled_at", now),
        OrderStatus::Refunded => update.set("refunded_at", now),
        OrderStatus::Created => update,
    };

    update.execute(conn)
}

// ============ Payment Events ============

/// Insert the first row for a delivery. Returns false if the
/// (provider, provider_event_id) pair already exists.
pub fn insert_payment_event_if_absent(conn: &Connection, input: &NewPaymentEvent) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "INSERT OR IGNORE INTO payment_events (id, org_id, provider, provider_event_id, order_no, event_type, status, handle_status, signature_ok, attempts, payload_json, payload_sha256, payload_size_bytes, payload_excerpt, received_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'received', 'received', ?7, 1, ?8, ?9, ?10, ?11, ?12, ?12)",
        params![
            EntityType::PaymentEvent.gen_id(),
            input.org_id,
            input.provider,
            input.provider_event_id,
            input.order_no,
            input.event_type,
            input.signature_ok as i32,
            input.payload_json,
            &input.summary.sha256,
            input.summary.size_bytes,
            &input.summary.excerpt,
            now,
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_payment_event(
    conn: &Connection,
    provider: &str,
    provider_event_id: &str,
) -> Result<Option<PaymentEvent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payment_events WHERE provider = ?1 AND provider_event_id = ?2",
            PAYMENT_EVENT_COLS
        ),
        &[&provider, &provider_event_id],
    )
}

pub fn get_payment_event_by_id(conn: &Connection, id: &str) -> Result<Option<PaymentEvent>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payment_events WHERE id = ?1", PAYMENT_EVENT_COLS),
        &[&id],
    )
}

pub fn get_payment_event_for_org(
    conn: &Connection,
    id: &str,
    org_id: i64,
) -> Result<Option<PaymentEvent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payment_events WHERE id = ?1 AND org_id = ?2",
            PAYMENT_EVENT_COLS
        ),
        &[&id, &org_id],
    )
}

/// Record a re-delivery of a known event: bump attempts, clear the last error
/// and refresh the stored payload.
pub fn touch_payment_event_redelivery(
    conn: &Connection,
    id: &str,
    input: &NewPaymentEvent,
) -> Result<()> {
    conn.execute(
        "UPDATE payment_events
         SET attempts = attempts + 1, last_error_code = NULL, last_error_message = NULL,
             order_no = ?2, event_type = ?3, signature_ok = ?4, payload_json = ?5,
             payload_sha256 = ?6, payload_size_bytes = ?7, payload_excerpt = ?8,
             status = 'received', updated_at = ?9
         WHERE id = ?1",
        params![
            id,
            input.order_no,
            input.event_type,
            input.signature_ok as i32,
            input.payload_json,
            &input.summary.sha256,
            input.summary.size_bytes,
            &input.summary.excerpt,
            now(),
        ],
    )?;
    Ok(())
}

/// Set the processing outcome of an event. `processed_at` is stamped when the
/// status becomes `processed`.
pub fn mark_payment_event(
    conn: &Connection,
    id: &str,
    status: EventStatus,
    error: Option<(&str, &str)>,
) -> Result<()> {
    let mut update = UpdateBuilder::new("payment_events", id)
        .with_updated_at()
        .set("status", status.as_ref().to_string())
        .set_nullable("last_error_code", error.map(|(code, _)| code.to_string()))
        .set_nullable("last_error_message", error.map(|(_, message)| message.to_string()));
    if status == EventStatus::Processed {
        update = update
            .set("processed_at", now())
            .set("handle_status", HandleStatus::Processed.as_ref().to_string());
    }
    if status == EventStatus::Failed {
        update = update.set("handle_status", HandleStatus::Failed.as_ref().to_string());
    }
    update.execute(conn)?;
    Ok(())
}

pub fn set_payment_event_handle_status(
    conn: &Connection,
    id: &str,
    status: Option<EventStatus>,
    handle_status: HandleStatus,
) -> Result<()> {
    UpdateBuilder::new("payment_events", id)
        .with_updated_at()
        .set_opt("status", status.map(|s| s.as_ref().to_string()))
        .set("handle_status", handle_status.as_ref().to_string())
        .set("handled_at", now())
        .execute(conn)?;
    Ok(())
}

// ============ Benefit Grants ============

/// Row values for a new grant. Identity columns are already normalized.
pub struct NewBenefitGrant<'a> {
    pub org_id: i64,
    pub user_id: &'a str,
    pub benefit_ref: &'a str,
    pub benefit_code: &'a str,
    pub scope: &'a str,
    pub attempt_id: &'a str,
    pub order_no: Option<&'a str>,
    pub meta: Option<&'a serde_json::Value>,
    pub expires_at: Option<i64>,
}

/// INSERT OR IGNORE on the (org, benefit, scope, attempt) identity.
pub fn insert_benefit_grant_if_absent(conn: &Connection, input: &NewBenefitGrant) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "INSERT OR IGNORE INTO benefit_grants (id, org_id, user_id, benefit_ref, benefit_code, scope, attempt_id, order_no, status, meta_json, expires_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'active', ?9, ?10, ?11, ?11)",
        params![
            EntityType::BenefitGrant.gen_id(),
            input.org_id,
            input.user_id,
            input.benefit_ref,
            input.benefit_code,
            input.scope,
            input.attempt_id,
            input.order_no,
            json_text(input.meta),
            input.expires_at,
            now,
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_benefit_grant(
    conn: &Connection,
    org_id: i64,
    benefit_code: &str,
    scope: &str,
    attempt_id: &str,
) -> Result<Option<BenefitGrant>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM benefit_grants WHERE org_id = ?1 AND benefit_code = ?2 AND scope = ?3 AND attempt_id = ?4",
            BENEFIT_GRANT_COLS
        ),
        &[&org_id, &benefit_code, &scope, &attempt_id],
    )
}

pub fn list_grants_by_order(
    conn: &Connection,
    org_id: i64,
    order_no: &str,
) -> Result<Vec<BenefitGrant>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM benefit_grants WHERE org_id = ?1 AND order_no = ?2 ORDER BY created_at",
            BENEFIT_GRANT_COLS
        ),
        &[&org_id, &order_no],
    )
}

/// Flip active grants of an order to revoked. Returns how many changed.
pub fn revoke_grants_by_order(
    conn: &Connection,
    org_id: i64,
    order_no: &str,
    reason: Option<&str>,
) -> Result<usize> {
    let now = now();
    let meta = reason.map(|r| serde_json::json!({ "revoke_reason": r }).to_string());
    let affected = conn.execute(
        "UPDATE benefit_grants
         SET status = 'revoked', revoked_at = ?3, updated_at = ?3,
             meta_json = COALESCE(?4, meta_json)
         WHERE org_id = ?1 AND order_no = ?2 AND status = 'active'",
        params![org_id, order_no, now, meta],
    )?;
    Ok(affected)
}

// ============ Wallets ============

pub fn get_wallet(conn: &Connection, org_id: i64, benefit_code: &str) -> Result<Option<Wallet>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM benefit_wallets WHERE org_id = ?1 AND benefit_code = ?2",
            WALLET_COLS
        ),
        &[&org_id, &benefit_code],
    )
}

pub struct NewLedgerEntry<'a> {
    pub org_id: i64,
    pub benefit_code: &'a str,
    pub delta: i64,
    pub reason: LedgerReason,
    pub order_no: Option<&'a str>,
    pub attempt_id: Option<&'a str>,
    pub idempotency_key: &'a str,
    pub meta: Option<&'a serde_json::Value>,
}

/// Post a ledger row and apply its delta to the wallet. Returns false without
/// touching the balance when the idempotency key was already used.
pub fn post_wallet_entry(conn: &Connection, input: &NewLedgerEntry) -> Result<bool> {
    let now = now();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO benefit_wallet_ledgers (id, org_id, benefit_code, delta, reason, order_no, attempt_id, idempotency_key, meta_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            EntityType::WalletLedger.gen_id(),
            input.org_id,
            input.benefit_code,
            input.delta,
            input.reason.as_ref(),
            input.order_no,
            input.attempt_id,
            input.idempotency_key,
            json_text(input.meta),
            now,
        ],
    )?;
    if inserted == 0 {
        return Ok(false);
    }

    conn.execute(
        "INSERT INTO benefit_wallets (id, org_id, benefit_code, balance, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(org_id, benefit_code) DO UPDATE SET
             balance = balance + excluded.balance, updated_at = excluded.updated_at",
        params![
            EntityType::Wallet.gen_id(),
            input.org_id,
            input.benefit_code,
            input.delta,
            now,
        ],
    )?;
    Ok(true)
}

pub fn list_wallet_entries(
    conn: &Connection,
    org_id: i64,
    benefit_code: &str,
) -> Result<Vec<WalletLedgerEntry>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM benefit_wallet_ledgers WHERE org_id = ?1 AND benefit_code = ?2 ORDER BY created_at, rowid",
            WALLET_LEDGER_COLS
        ),
        &[&org_id, &benefit_code],
    )
}

// ============ Admin Users ============

pub fn create_admin_user(conn: &Connection, input: &CreateAdminUser) -> Result<AdminUser> {
    let id = EntityType::AdminUser.gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO admin_users (id, email, name, permissions, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, 1, ?5)",
        params![
            &id,
            input.email.trim().to_lowercase(),
            &input.name,
            input.permissions.join(","),
            now
        ],
    )?;
    Ok(AdminUser {
        id,
        email: input.email.trim().to_lowercase(),
        name: input.name.clone(),
        permissions: input.permissions.clone(),
        is_active: true,
        created_at: now,
    })
}

pub fn get_active_admin_user(conn: &Connection, id: &str) -> Result<Option<AdminUser>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM admin_users WHERE id = ?1 AND is_active = 1",
            ADMIN_USER_COLS
        ),
        &[&id],
    )
}

pub fn deactivate_admin_user(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE admin_users SET is_active = 0 WHERE id = ?1",
        params![id],
    )?;
    Ok(affected > 0)
}

// ============ Admin Approvals ============

pub fn create_approval(conn: &Connection, input: &CreateApproval) -> Result<AdminApproval> {
    let id = EntityType::AdminApproval.gen_id();
    let now = now();
    let payload = if input.payload.is_null() {
        serde_json::json!({})
    } else {
        input.payload.clone()
    };

    conn.execute(
        "INSERT INTO admin_approvals (id, org_id, type, status, payload_json, reason, correlation_id, requested_by, retry_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'PENDING', ?4, ?5, ?6, ?7, 0, ?8, ?8)",
        params![
            &id,
            input.org_id,
            input.approval_type.as_ref(),
            payload.to_string(),
            input.reason.trim(),
            &input.correlation_id,
            &input.requested_by,
            now,
        ],
    )?;

    get_approval(conn, &id)?
        .ok_or_else(|| AppError::Internal("approval missing after insert".into()))
}

pub fn get_approval(conn: &Connection, id: &str) -> Result<Option<AdminApproval>> {
    query_one(
        conn,
        &format!("SELECT {} FROM admin_approvals WHERE id = ?1", ADMIN_APPROVAL_COLS),
        &[&id],
    )
}

/// PENDING or FAILED -> APPROVED.
pub fn approve_approval(conn: &Connection, id: &str, reviewer_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE admin_approvals SET status = 'APPROVED', approved_by = ?2, updated_at = ?3
         WHERE id = ?1 AND status IN ('PENDING', 'FAILED')",
        params![id, reviewer_id, now()],
    )?;
    Ok(affected > 0)
}

/// APPROVED -> EXECUTING, bumping retry_count and clearing the previous error.
/// Move APPROVED, or EXECUTING last touched at or before `stale_before`,
/// to EXECUTING.
pub fn begin_approval_execution(conn: &Connection, id: &str, stale_before: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE admin_approvals
         SET status = 'EXECUTING', retry_count = retry_count + 1,
             error_code = NULL, error_message = NULL, updated_at = ?2
         WHERE id = ?1
           AND (status = 'APPROVED' OR (status = 'EXECUTING' AND updated_at <= ?3))",
        params![id, now(), stale_before],
    )?;
    Ok(affected > 0)
}

pub fn finish_approval_success(conn: &Connection, id: &str) -> Result<bool> {
    let now = now();
    UpdateBuilder::new("admin_approvals", id)
        .with_updated_at()
        .set("status", ApprovalStatus::Executed.as_ref().to_string())
        .set("executed_at", now)
        .set_nullable::<String>("error_code", None)
        .set_nullable::<String>("error_message", None)
        .guard("status", ApprovalStatus::Executing.as_ref().to_string())
        .execute(conn)
}

pub fn finish_approval_failure(
    conn: &Connection,
    id: &str,
    error_code: &str,
    error_message: &str,
) -> Result<bool> {
    UpdateBuilder::new("admin_approvals", id)
        .with_updated_at()
        .set("status", ApprovalStatus::Failed.as_ref().to_string())
        .set("error_code", error_code.to_string())
        .set("error_message", error_message.to_string())
        .guard("status", ApprovalStatus::Executing.as_ref().to_string())
        .execute(conn)
}

// ============ Content Releases ============

pub struct NewContentRelease<'a> {
    pub action: &'a str,
    pub region: &'a str,
    pub locale: &'a str,
    pub dir_alias: &'a str,
    pub from_version_id: Option<&'a str>,
    pub to_version_id: Option<&'a str>,
    pub from_pack_id: Option<&'a str>,
    pub to_pack_id: Option<&'a str>,
    pub status: &'a str,
    pub message: Option<&'a str>,
    pub created_by: &'a str,
}

pub fn create_content_release(
    conn: &Connection,
    input: &NewContentRelease,
) -> Result<ContentRelease> {
    let id = EntityType::ContentRelease.gen_id();
    conn.execute(
        "INSERT INTO content_pack_releases (id, action, region, locale, dir_alias, from_version_id, to_version_id, from_pack_id, to_pack_id, status, message, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            &id,
            input.action,
            input.region,
            input.locale,
            input.dir_alias,
            input.from_version_id,
            input.to_version_id,
            input.from_pack_id,
            input.to_pack_id,
            input.status,
            input.message,
            input.created_by,
            now(),
        ],
    )?;
    query_one::<ContentRelease>(
        conn,
        &format!(
            "SELECT {} FROM content_pack_releases WHERE id = ?1",
            CONTENT_RELEASE_COLS
        ),
        &[&id],
    )?
    .ok_or_else(|| AppError::Internal("release missing after insert".into()))
}

// ============ Idempotency Keys ============

pub fn get_idempotency_record(
    conn: &Connection,
    provider: &str,
    external_id: &str,
    recorded_at: i64,
) -> Result<Option<IdempotencyRecord>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM idempotency_keys WHERE provider = ?1 AND external_id = ?2 AND recorded_at = ?3",
            IDEMPOTENCY_COLS
        ),
        &[&provider, &external_id, &recorded_at],
    )
}

pub fn find_idempotency_by_hash(
    conn: &Connection,
    provider: &str,
    hash: &str,
) -> Result<Option<IdempotencyRecord>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM idempotency_keys WHERE provider = ?1 AND hash = ?2 ORDER BY first_seen_at LIMIT 1",
            IDEMPOTENCY_COLS
        ),
        &[&provider, &hash],
    )
}

pub fn insert_idempotency_record(
    conn: &Connection,
    provider: &str,
    external_id: &str,
    recorded_at: i64,
    hash: &str,
    ingest_batch_id: Option<&str>,
) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "INSERT OR IGNORE INTO idempotency_keys (id, provider, external_id, recorded_at, hash, ingest_batch_id, first_seen_at, last_seen_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            EntityType::IdempotencyKey.gen_id(),
            provider,
            external_id,
            recorded_at,
            hash,
            ingest_batch_id,
            now,
        ],
    )?;
    Ok(affected > 0)
}

pub fn touch_idempotency_record(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE idempotency_keys SET last_seen_at = ?2 WHERE id = ?1",
        params![id, now()],
    )?;
    Ok(())
}

// ============ Lease Locks ============

/// Take the lease if it is free or expired. Returns true when `owner` holds it.
pub fn try_acquire_lock(conn: &Connection, key: &str, owner: &str, ttl_secs: i64) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "INSERT INTO locks (key, owner, expires_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET owner = excluded.owner, expires_at = excluded.expires_at
         WHERE locks.expires_at <= ?4",
        params![key, owner, now + ttl_secs, now],
    )?;
    Ok(affected > 0)
}

/// Delete the lease only if `owner` still holds it.
pub fn release_lock(conn: &Connection, key: &str, owner: &str) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM locks WHERE key = ?1 AND owner = ?2",
        params![key, owner],
    )?;
    Ok(affected > 0)
}

pub fn purge_expired_locks(conn: &Connection) -> Result<usize> {
    let deleted = conn.execute("DELETE FROM locks WHERE expires_at <= ?1", params![now()])?;
    Ok(deleted)
}

// ============ Jobs ============

pub fn enqueue_job(
    conn: &Connection,
    job_type: JobType,
    payload: &serde_json::Value,
    queue: &str,
    max_attempts: i64,
) -> Result<Job> {
    let id = EntityType::Job.gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO jobs (id, job_type, queue, payload_json, status, attempts, max_attempts, available_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?6, ?6)",
        params![&id, job_type.as_ref(), queue, payload.to_string(), max_attempts, now],
    )?;
    get_job(conn, &id)?.ok_or_else(|| AppError::Internal("job missing after insert".into()))
}

pub fn get_job(conn: &Connection, id: &str) -> Result<Option<Job>> {
    query_one(
        conn,
        &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLS),
        &[&id],
    )
}

pub fn list_jobs(conn: &Connection, job_type: JobType) -> Result<Vec<Job>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM jobs WHERE job_type = ?1 ORDER BY created_at, rowid",
            JOB_COLS
        ),
        &[&job_type.as_ref()],
    )
}

/// Claim the oldest due job: a pending job whose delay has passed, or a
/// running job not touched since `stale_before` whose worker is presumed
/// dead. The status guard makes concurrent claims safe.
pub fn claim_next_job(conn: &Connection, stale_before: i64) -> Result<Option<Job>> {
    let now = now();
    let candidate: Option<(String, i64)> = conn
        .query_row(
            "SELECT id, updated_at FROM jobs
             WHERE (status = 'pending' AND available_at <= ?1)
                OR (status = 'running' AND updated_at <= ?2 AND attempts < max_attempts)
             ORDER BY available_at, rowid LIMIT 1",
            params![now, stale_before],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((id, seen_updated_at)) = candidate else {
        return Ok(None);
    };

    let claimed = conn.execute(
        "UPDATE jobs SET status = 'running', attempts = attempts + 1, updated_at = ?2
         WHERE id = ?1 AND updated_at = ?3
           AND (status = 'pending' OR (status = 'running' AND updated_at <= ?4))",
        params![&id, now, seen_updated_at, stale_before],
    )?;
    if claimed == 0 {
        return Ok(None);
    }
    get_job(conn, &id)
}

/// Park running jobs that outlived their lease on their last attempt.
pub fn fail_stale_jobs(conn: &Connection, stale_before: i64) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE jobs SET status = 'failed', last_error = 'lease expired', updated_at = ?1
         WHERE status = 'running' AND updated_at <= ?2 AND attempts >= max_attempts",
        params![now(), stale_before],
    )?;
    Ok(affected)
}

pub fn complete_job(conn: &Connection, id: &str) -> Result<()> {
    UpdateBuilder::new("jobs", id)
        .with_updated_at()
        .set("status", JobStatus::Done.as_ref().to_string())
        .set_nullable::<String>("last_error", None)
        .execute(conn)?;
    Ok(())
}

/// Put the job back in the queue after `retry_after` seconds, or mark it failed.
pub fn fail_job(conn: &Connection, id: &str, error: &str, retry_after: Option<i64>) -> Result<()> {
    let update = UpdateBuilder::new("jobs", id)
        .with_updated_at()
        .set("last_error", error.to_string());
    let update = match retry_after {
        Some(delay_secs) => update
            .set("status", JobStatus::Pending.as_ref().to_string())
            .set("available_at", now() + delay_secs),
        None => update.set("status", JobStatus::Failed.as_ref().to_string()),
    };
    update.execute(conn)?;
    Ok(())
}

// ============ Audit Logs ============

#[allow(clippy::too_many_arguments)]
pub fn create_audit_log(
    conn: &Connection,
    enabled: bool,
    actor_type: ActorType,
    actor_id: Option<&str>,
    org_id: i64,
    action: &str,
    target_type: &str,
    target_id: &str,
    meta: Option<&serde_json::Value>,
    ip: Option<&str>,
    user_agent: Option<&str>,
    request_id: Option<&str>,
) -> Result<AuditLog> {
    let log = AuditLog {
        id: EntityType::AuditLog.gen_id(),
        timestamp: now(),
        actor_type,
        actor_id: actor_id.map(String::from),
        org_id,
        action: action.to_string(),
        target_type: target_type.to_string(),
        target_id: target_id.to_string(),
        meta: meta.cloned(),
        ip: ip.map(String::from),
        user_agent: user_agent.map(String::from),
        request_id: request_id.map(String::from),
    };

    if !enabled {
        return Ok(log);
    }

    conn.execute(
        "INSERT INTO audit_logs (id, timestamp, actor_type, actor_id, org_id, action, target_type, target_id, meta_json, ip, user_agent, request_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            &log.id,
            log.timestamp,
            log.actor_type.as_ref(),
            &log.actor_id,
            log.org_id,
            &log.action,
            &log.target_type,
            &log.target_id,
            json_text(log.meta.as_ref()),
            &log.ip,
            &log.user_agent,
            &log.request_id,
        ],
    )?;

    Ok(log)
}

pub fn query_audit_logs(conn: &Connection, query: &AuditLogQuery) -> Result<Vec<AuditLog>> {
    let mut where_clause = String::from("WHERE 1=1");
    let mut params: Vec<Value> = Vec::new();

    if let Some(v) = query.actor_type {
        where_clause.push_str(" AND actor_type = ?");
        params.push(v.as_ref().to_string().into());
    }
    if let Some(ref v) = query.actor_id {
        where_clause.push_str(" AND actor_id = ?");
        params.push(v.clone().into());
    }
    if let Some(ref v) = query.action {
        where_clause.push_str(" AND action = ?");
        params.push(v.clone().into());
    }
    if let Some(ref v) = query.target_type {
        where_clause.push_str(" AND target_type = ?");
        params.push(v.clone().into());
    }
    if let Some(ref v) = query.target_id {
        where_clause.push_str(" AND target_id = ?");
        params.push(v.clone().into());
    }
    if let Some(v) = query.org_id {
        where_clause.push_str(" AND org_id = ?");
        params.push(v.into());
    }
    params.push(query.limit().into());
    params.push(query.offset().into());

    let sql = format!(
        "SELECT {} FROM audit_logs {} ORDER BY timestamp DESC, rowid DESC LIMIT ? OFFSET ?",
        AUDIT_LOG_COLS, where_clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), |row| {
            <AuditLog as super::from_row::FromRow>::from_row(row)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
