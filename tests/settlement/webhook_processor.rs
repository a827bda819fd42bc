//! WebhookProcessor::handle against a real database

#[path = "../common/mod.rs"]
mod common;

use common::*;
use serde_json::json;

fn setup_report_order(ctx: &TestContext, order_no: &str, amount_cents: i64, currency: &str) {
    let conn = ctx.conn();
    create_test_sku(&conn, "REPORT_BASIC", SkuKind::ReportUnlock, 1);
    create_test_order(&conn, order_no, "REPORT_BASIC", amount_cents, currency, "stub");
}

// ============ Happy path and idempotency ============

#[tokio::test]
async fn test_payment_fulfills_order_and_grants_once() {
    let ctx = create_test_context();
    setup_report_order(&ctx, "ord_1", 199, "CNY");

    let payload = payment_payload("evt_1", "ord_1", 199, "CNY");
    let outcome = ctx
        .processor()
        .handle("stub", &payload, ORG_ID, HandleOptions::verified())
        .await;

    assert!(outcome.ok, "first delivery should settle: {:?}", outcome);
    assert_eq!(outcome.status, 200);
    assert_eq!(outcome.duplicate, Some(false));
    assert_eq!(outcome.order_status, Some(OrderStatus::Fulfilled));
    assert!(outcome.benefit_grant_id.is_some());

    let conn = ctx.conn();
    let order = get_order(&conn, "ord_1");
    assert_eq!(order.status, OrderStatus::Fulfilled);
    assert!(order.paid_at.is_some());
    assert!(order.fulfilled_at.is_some());
    assert_eq!(count_rows(&conn, "benefit_grants"), 1);

    let event = queries::get_payment_event(&conn, "stub", "evt_1")
        .unwrap()
        .expect("event row should exist");
    assert_eq!(event.status, EventStatus::Processed);
    assert!(event.payload_sha256.is_some());
}

#[tokio::test]
async fn test_settlement_audit_is_written_with_the_order() {
    let ctx = create_test_context();
    setup_report_order(&ctx, "ord_audit", 199, "USD");
    let payload = payment_payload("evt_audit", "ord_audit", 199, "USD");

    // Without an audit row the settlement must not stick.
    block_audit_writes(&ctx.conn());
    let blocked = ctx
        .processor()
        .handle("stub", &payload, ORG_ID, HandleOptions::verified())
        .await;
    assert!(!blocked.ok, "{:?}", blocked);
    {
        let conn = ctx.conn();
        assert_eq!(get_order(&conn, "ord_audit").status, OrderStatus::Created);
        assert_eq!(count_rows(&conn, "benefit_grants"), 0);
        let event = queries::get_payment_event(&conn, "stub", "evt_audit")
            .unwrap()
            .expect("failure is recorded on the event");
        assert_eq!(event.status, EventStatus::Failed);
    }

    allow_audit_writes(&ctx.conn());
    let settled = ctx
        .processor()
        .handle("stub", &payload, ORG_ID, HandleOptions::verified())
        .await;
    assert!(settled.ok, "{:?}", settled);

    let conn = ctx.conn();
    assert_eq!(get_order(&conn, "ord_audit").status, OrderStatus::Fulfilled);
    let actions = audit_actions(&conn, "ord_audit");
    assert_eq!(
        actions
            .iter()
            .filter(|a| a.as_str() == "payment_webhook_processed")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_redelivery_is_duplicate_and_changes_nothing() {
    let ctx = create_test_context();
    setup_report_order(&ctx, "ord_1", 199, "CNY");
    let payload = payment_payload("evt_1", "ord_1", 199, "CNY");

    let first = ctx
        .processor()
        .handle("stub", &payload, ORG_ID, HandleOptions::verified())
        .await;
    assert!(first.ok);

    let (grants, events, idempotency, order_before) = {
        let conn = ctx.conn();
        (
            count_rows(&conn, "benefit_grants"),
            count_rows(&conn, "payment_events"),
            count_rows(&conn, "idempotency_keys"),
            get_order(&conn, "ord_1"),
        )
    };

    let second = ctx
        .processor()
        .handle("stub", &payload, ORG_ID, HandleOptions::verified())
        .await;
    assert!(second.ok);
    assert!(second.is_duplicate(), "redelivery must report duplicate");

    let conn = ctx.conn();
    assert_eq!(count_rows(&conn, "benefit_grants"), grants);
    assert_eq!(count_rows(&conn, "payment_events"), events);
    assert_eq!(count_rows(&conn, "idempotency_keys"), idempotency);
    let order_after = get_order(&conn, "ord_1");
    assert_eq!(order_after.status, order_before.status);
    assert_eq!(order_after.paid_at, order_before.paid_at);
}

#[tokio::test]
async fn test_new_event_for_settled_order_does_not_grant_again() {
    let ctx = create_test_context();
    setup_report_order(&ctx, "ord_1", 199, "CNY");

    let first = ctx
        .processor()
        .handle(
            "stub",
            &payment_payload("evt_1", "ord_1", 199, "CNY"),
            ORG_ID,
            HandleOptions::verified(),
        )
        .await;
    assert!(first.ok);

    let second = ctx
        .processor()
        .handle(
            "stub",
            &payment_payload("evt_2", "ord_1", 199, "CNY"),
            ORG_ID,
            HandleOptions::verified(),
        )
        .await;
    assert!(second.ok);
    assert!(second.is_duplicate());

    let conn = ctx.conn();
    assert_eq!(count_rows(&conn, "benefit_grants"), 1);
}

#[tokio::test]
async fn test_credit_pack_tops_up_wallet() {
    let ctx = create_test_context();
    {
        let conn = ctx.conn();
        create_test_sku(&conn, "CREDITS_10", SkuKind::CreditPack, 10);
        create_test_order(&conn, "ord_c", "CREDITS_10", 990, "USD", "stub");
    }

    let outcome = ctx
        .processor()
        .handle(
            "stub",
            &payment_payload("evt_c", "ord_c", 990, "usd"),
            ORG_ID,
            HandleOptions::verified(),
        )
        .await;
    assert!(outcome.ok, "{:?}", outcome);
    assert_eq!(outcome.wallet_balance, Some(10));

    let conn = ctx.conn();
    let wallet = queries::get_wallet(&conn, ORG_ID, "CREDITS_10")
        .unwrap()
        .expect("wallet should exist");
    assert_eq!(wallet.balance, 10);
    let entries = queries::list_wallet_entries(&conn, ORG_ID, "CREDITS_10").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].reason, LedgerReason::Topup);
}

// ============ Rejections ============

#[tokio::test]
async fn test_amount_mismatch_short_circuits() {
    let ctx = create_test_context();
    setup_report_order(&ctx, "ord_m", 4990, "USD");

    let outcome = ctx
        .processor()
        .handle(
            "stub",
            &payment_payload("evt_m", "ord_m", 1, "USD"),
            ORG_ID,
            HandleOptions::verified(),
        )
        .await;

    assert!(!outcome.ok);
    assert_eq!(outcome.error_code.as_deref(), Some("AMOUNT_MISMATCH"));
    let details = outcome.details.expect("mismatch carries details");
    assert_eq!(details["expected"], json!(4990));
    assert_eq!(details["received"], json!(1));

    let conn = ctx.conn();
    assert_eq!(get_order(&conn, "ord_m").status, OrderStatus::Created);
    assert_eq!(count_rows(&conn, "benefit_grants"), 0);
    let event = queries::get_payment_event(&conn, "stub", "evt_m")
        .unwrap()
        .expect("rejected event is still recorded");
    assert_eq!(event.status, EventStatus::Rejected);
    assert_eq!(event.last_error_code.as_deref(), Some("AMOUNT_MISMATCH"));
}

#[tokio::test]
async fn test_currency_mismatch_short_circuits() {
    let ctx = create_test_context();
    setup_report_order(&ctx, "ord_cur", 199, "CNY");

    let outcome = ctx
        .processor()
        .handle(
            "stub",
            &payment_payload("evt_cur", "ord_cur", 199, "USD"),
            ORG_ID,
            HandleOptions::verified(),
        )
        .await;

    assert_eq!(outcome.error_code.as_deref(), Some("CURRENCY_MISMATCH"));
    let conn = ctx.conn();
    assert_eq!(get_order(&conn, "ord_cur").status, OrderStatus::Created);
    assert_eq!(count_rows(&conn, "benefit_grants"), 0);
}

#[tokio::test]
async fn test_provider_mismatch_short_circuits() {
    let ctx = create_test_context();
    {
        let conn = ctx.conn();
        create_test_sku(&conn, "REPORT_BASIC", SkuKind::ReportUnlock, 1);
        create_test_order(&conn, "ord_p", "REPORT_BASIC", 199, "USD", "billing");
    }

    let outcome = ctx
        .processor()
        .handle(
            "stub",
            &payment_payload("evt_p", "ord_p", 199, "USD"),
            ORG_ID,
            HandleOptions::verified(),
        )
        .await;

    assert_eq!(outcome.error_code.as_deref(), Some("PROVIDER_MISMATCH"));
    let conn = ctx.conn();
    assert_eq!(get_order(&conn, "ord_p").status, OrderStatus::Created);
    assert_eq!(count_rows(&conn, "benefit_grants"), 0);
    let event = queries::get_payment_event(&conn, "stub", "evt_p")
        .unwrap()
        .unwrap();
    assert_eq!(event.last_error_code.as_deref(), Some("rejected_provider_mismatch"));
}

#[tokio::test]
async fn test_amount_bypass_skips_guards() {
    let ctx = create_test_context();
    setup_report_order(&ctx, "ord_b", 4990, "USD");

    let options = HandleOptions {
        amount_bypass: true,
        ..HandleOptions::verified()
    };
    let outcome = ctx
        .processor()
        .handle("stub", &payment_payload("evt_b", "ord_b", 1, "EUR"), ORG_ID, options)
        .await;
    assert!(outcome.ok, "{:?}", outcome);

    let conn = ctx.conn();
    assert_eq!(get_order(&conn, "ord_b").status, OrderStatus::Fulfilled);
}

#[tokio::test]
async fn test_unknown_order_is_recorded_as_orphan() {
    let ctx = create_test_context();

    let outcome = ctx
        .processor()
        .handle(
            "stub",
            &payment_payload("evt_o", "ord_missing", 100, "USD"),
            ORG_ID,
            HandleOptions::verified(),
        )
        .await;

    assert_eq!(outcome.error_code.as_deref(), Some("ORDER_NOT_FOUND"));
    assert_eq!(outcome.status, 404);
    let conn = ctx.conn();
    let event = queries::get_payment_event(&conn, "stub", "evt_o")
        .unwrap()
        .unwrap();
    assert_eq!(event.status, EventStatus::Orphan);
}

#[tokio::test]
async fn test_invalid_signature_writes_nothing() {
    let ctx = create_test_context();
    setup_report_order(&ctx, "ord_s", 199, "USD");

    let outcome = ctx
        .processor()
        .handle(
            "stub",
            &payment_payload("evt_s", "ord_s", 199, "USD"),
            ORG_ID,
            HandleOptions::default(),
        )
        .await;

    assert_eq!(outcome.error_code.as_deref(), Some("SIGNATURE_INVALID"));
    assert_eq!(outcome.status, 400);
    let conn = ctx.conn();
    assert_eq!(count_rows(&conn, "payment_events"), 0);
}

#[tokio::test]
async fn test_missing_identity_is_invalid_payload() {
    let ctx = create_test_context();

    let outcome = ctx
        .processor()
        .handle(
            "stub",
            &json!({ "order_no": "ord_1", "amount_cents": 1 }),
            ORG_ID,
            HandleOptions::verified(),
        )
        .await;

    assert_eq!(outcome.error_code.as_deref(), Some("INVALID_PAYLOAD"));
    assert_eq!(outcome.status, 400);
}

#[tokio::test]
async fn test_unsupported_provider() {
    let ctx = create_test_context();

    let outcome = ctx
        .processor()
        .handle("paypal", &json!({}), ORG_ID, HandleOptions::verified())
        .await;

    assert_eq!(outcome.error_code.as_deref(), Some("PROVIDER_NOT_SUPPORTED"));
}

#[tokio::test]
async fn test_failure_json_has_no_generic_error_key() {
    let ctx = create_test_context();

    let outcome = ctx
        .processor()
        .handle(
            "stub",
            &payment_payload("evt_x", "ord_none", 1, "USD"),
            ORG_ID,
            HandleOptions::verified(),
        )
        .await;

    let body = outcome.to_json();
    assert_eq!(body["ok"], json!(false));
    assert_eq!(body["error_code"], json!("ORDER_NOT_FOUND"));
    assert_eq!(body["status"], json!(404));
    assert!(body.get("error").is_none());
}

// ============ Dry run ============

#[tokio::test]
async fn test_dry_run_does_not_write() {
    let ctx = create_test_context();
    setup_report_order(&ctx, "ord_d", 199, "USD");

    let outcome = ctx.processor().evaluate_dry_run(
        "stub",
        &payment_payload("evt_d", "ord_d", 199, "USD"),
        true,
    );
    assert!(outcome.ok);
    assert_eq!(outcome.dry_run, Some(true));
    assert_eq!(outcome.is_refund, Some(false));

    let conn = ctx.conn();
    assert_eq!(count_rows(&conn, "payment_events"), 0);
    assert_eq!(get_order(&conn, "ord_d").status, OrderStatus::Created);
}
