//! Test utilities and fixtures for paysettle integration tests

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, Response};
use rusqlite::Connection;
use serde_json::Value;
use tempfile::TempDir;

pub use paysettle::approvals::ApprovalExecutor;
pub use paysettle::budget::BudgetLedger;
pub use paysettle::commerce::{HandleOptions, WebhookOutcome, WebhookProcessor};
pub use paysettle::config::{BudgetConfig, Config, Environment, WebhookSecrets};
pub use paysettle::db::{AppState, DbPool, create_pool, init_db, queries};
pub use paysettle::events::EventSink;
pub use paysettle::jobs::JobWorker;
pub use paysettle::models::*;
pub use paysettle::payments::GatewayRegistry;
pub use paysettle::util::RequestMeta;

pub const TEST_ADMIN_TOKEN: &str = "test-admin-token";
pub const STRIPE_SECRET: &str = "whsec_test_secret";
pub const ORG_ID: i64 = 7;

/// Every test gets its own on-disk database so pooled connections share
/// state. Keep the guard alive for the duration of the test.
pub struct TestContext {
    pub state: AppState,
    _dir: TempDir,
}

impl TestContext {
    pub fn conn(&self) -> r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager> {
        self.state.db.get().expect("Failed to get test connection")
    }

    pub fn processor(&self) -> WebhookProcessor {
        WebhookProcessor::new(&self.state)
    }

    pub fn app(&self) -> axum::Router {
        paysettle::app(self.state.clone())
    }
}

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        database_path: String::new(),
        environment: Environment::Testing,
        stripe: WebhookSecrets::default(),
        billing: WebhookSecrets::default(),
        max_webhook_body_bytes: 262_144,
        lock_wait_secs: 5,
        lock_ttl_secs: 10,
        audit_log_enabled: true,
        admin_api_token: Some(TEST_ADMIN_TOKEN.to_string()),
        budget: BudgetConfig::default(),
        events_webhook_url: None,
        job_poll_secs: 1,
    }
}

/// Create an AppState for testing with a temporary SQLite database
pub fn create_test_context() -> TestContext {
    create_test_context_with(test_config())
}

pub fn create_test_context_with(config: Config) -> TestContext {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("paysettle-test.db");
    let pool = create_pool(path.to_str().expect("utf-8 temp path")).expect("Failed to create pool");
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }

    let config = Arc::new(config);
    let state = AppState {
        db: pool.clone(),
        gateways: Arc::new(GatewayRegistry::from_config(&config)),
        budget: Arc::new(BudgetLedger::sqlite(pool, config.budget.clone())),
        events: EventSink::disabled(),
        config,
    };
    TestContext { state, _dir: dir }
}

/// Signed Stripe deliveries need a configured secret.
pub fn stripe_signed_config() -> Config {
    let mut config = test_config();
    config.stripe = WebhookSecrets::new(vec![STRIPE_SECRET.to_string()], 300);
    config
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ============ Fixtures ============

pub fn create_test_sku(conn: &Connection, sku: &str, kind: SkuKind, unit_qty: i64) -> Sku {
    queries::create_sku(
        conn,
        &CreateSku {
            sku: sku.to_string(),
            benefit_code: sku.to_string(),
            kind,
            unit_qty,
        },
    )
    .expect("Failed to create test sku")
}

/// A `created` report-unlock order for user `u_1`, attempt `att_1`.
pub fn create_test_order(
    conn: &Connection,
    order_no: &str,
    sku: &str,
    amount_cents: i64,
    currency: &str,
    provider: &str,
) -> Order {
    queries::create_order(
        conn,
        &CreateOrder {
            org_id: ORG_ID,
            order_no: order_no.to_string(),
            user_id: Some("u_1".to_string()),
            anon_id: None,
            sku: sku.to_string(),
            quantity: 1,
            target_attempt_id: Some("att_1".to_string()),
            amount_cents,
            currency: currency.to_string(),
            provider: provider.to_string(),
        },
    )
    .expect("Failed to create test order")
}

pub fn create_test_admin(conn: &Connection, email: &str, permissions: &[&str]) -> AdminUser {
    queries::create_admin_user(
        conn,
        &CreateAdminUser {
            email: email.to_string(),
            name: format!("Test Admin {}", email),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        },
    )
    .expect("Failed to create test admin")
}

pub fn all_permissions() -> Vec<&'static str> {
    vec![PERM_OPS_WRITE, PERM_FINANCE_WRITE, PERM_CONTENT_RELEASE]
}

/// Stub payment payload with the fields every provider understands.
pub fn payment_payload(event_id: &str, order_no: &str, amount_cents: i64, currency: &str) -> Value {
    serde_json::json!({
        "provider_event_id": event_id,
        "order_no": order_no,
        "amount_cents": amount_cents,
        "currency": currency,
        "event_type": "payment_succeeded",
    })
}

pub fn refund_payload(event_id: &str, order_no: &str, amount_cents: i64) -> Value {
    serde_json::json!({
        "provider_event_id": event_id,
        "order_no": order_no,
        "event_type": "refund_succeeded",
        "refund_amount_cents": amount_cents,
        "refund_reason": "customer request",
    })
}

pub fn get_order(conn: &Connection, order_no: &str) -> Order {
    queries::get_order(conn, ORG_ID, order_no)
        .expect("query failed")
        .expect("order missing")
}

pub fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })
    .expect("count failed")
}

/// Make every audit insert fail until `allow_audit_writes` is called.
pub fn block_audit_writes(conn: &Connection) {
    conn.execute_batch(
        "CREATE TRIGGER block_audit BEFORE INSERT ON audit_logs
         BEGIN SELECT RAISE(ABORT, 'audit down'); END;",
    )
    .expect("create trigger failed");
}

pub fn allow_audit_writes(conn: &Connection) {
    conn.execute_batch("DROP TRIGGER IF EXISTS block_audit;")
        .expect("drop trigger failed");
}

pub fn executor(ctx: &TestContext) -> ApprovalExecutor {
    ApprovalExecutor::from_state(&ctx.state)
}

/// File an approval as `requester` and approve it as `reviewer`.
pub fn create_approved(
    ctx: &TestContext,
    approval_type: ApprovalType,
    payload: Value,
    requester: &AdminUser,
    reviewer: &AdminUser,
) -> AdminApproval {
    let executor = executor(ctx);
    let approval = executor
        .request_approval(
            &CreateApproval {
                org_id: ORG_ID,
                approval_type,
                payload,
                reason: "support ticket 42".to_string(),
                correlation_id: None,
                requested_by: requester.id.clone(),
            },
            &RequestMeta::default(),
        )
        .expect("Failed to request approval");
    executor
        .approve(&approval.id, &reviewer.id, &RequestMeta::default())
        .expect("Failed to approve")
}

/// Two active admins holding every permission.
pub fn create_admin_pair(conn: &Connection) -> (AdminUser, AdminUser) {
    (
        create_test_admin(conn, "requester@example.com", &all_permissions()),
        create_test_admin(conn, "reviewer@example.com", &all_permissions()),
    )
}

pub fn audit_actions(conn: &Connection, target_id: &str) -> Vec<String> {
    queries::query_audit_logs(
        conn,
        &AuditLogQuery {
            target_id: Some(target_id.to_string()),
            limit: Some(100),
            ..Default::default()
        },
    )
    .expect("audit query failed")
    .into_iter()
    .map(|log| log.action)
    .collect()
}

// ============ HTTP helpers ============

pub fn admin_request(method: &str, uri: &str, admin_id: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", TEST_ADMIN_TOKEN))
        .header("x-admin-user-id", admin_id)
        .header("content-type", "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
