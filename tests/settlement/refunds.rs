//! Provider refunds and operator refunds

#[path = "../common/mod.rs"]
mod common;

use common::*;
use paysettle::commerce::AdminRefund;

async fn settle(ctx: &TestContext, event_id: &str, order_no: &str, amount_cents: i64) {
    let outcome = ctx
        .processor()
        .handle(
            "stub",
            &payment_payload(event_id, order_no, amount_cents, "USD"),
            ORG_ID,
            HandleOptions::verified(),
        )
        .await;
    assert!(outcome.ok, "payment should settle: {:?}", outcome);
}

#[tokio::test]
async fn test_refund_after_payment_reverses_credits_once() {
    let ctx = create_test_context();
    {
        let conn = ctx.conn();
        create_test_sku(&conn, "CREDITS_10", SkuKind::CreditPack, 10);
        create_test_order(&conn, "ord_r", "CREDITS_10", 990, "USD", "stub");
    }
    settle(&ctx, "evt_pay", "ord_r", 990).await;

    let outcome = ctx
        .processor()
        .handle(
            "stub",
            &refund_payload("evt_refund", "ord_r", 990),
            ORG_ID,
            HandleOptions::verified(),
        )
        .await;
    assert!(outcome.ok, "{:?}", outcome);
    assert_eq!(outcome.refunded, Some(true));
    assert_eq!(outcome.order_status, Some(OrderStatus::Refunded));

    {
        let conn = ctx.conn();
        let order = get_order(&conn, "ord_r");
        assert_eq!(order.status, OrderStatus::Refunded);
        assert_eq!(order.refund_amount_cents, Some(990));
        assert_eq!(order.refund_reason.as_deref(), Some("customer request"));

        let entries = queries::list_wallet_entries(&conn, ORG_ID, "CREDITS_10").unwrap();
        let reversals: Vec<_> = entries
            .iter()
            .filter(|e| e.reason == LedgerReason::Reversal)
            .collect();
        assert_eq!(reversals.len(), 1);
        assert_eq!(reversals[0].delta, -10);
        let wallet = queries::get_wallet(&conn, ORG_ID, "CREDITS_10").unwrap().unwrap();
        assert_eq!(wallet.balance, 0);
    }

    // The same refund delivered again is a no-op.
    let again = ctx
        .processor()
        .handle(
            "stub",
            &refund_payload("evt_refund", "ord_r", 990),
            ORG_ID,
            HandleOptions::verified(),
        )
        .await;
    assert!(again.ok);
    assert!(again.is_duplicate());
    let conn = ctx.conn();
    assert_eq!(count_rows(&conn, "benefit_wallet_ledgers"), 2);
}

#[tokio::test]
async fn test_refund_revokes_grant_without_creating_one() {
    let ctx = create_test_context();
    {
        let conn = ctx.conn();
        create_test_sku(&conn, "REPORT_BASIC", SkuKind::ReportUnlock, 1);
        create_test_order(&conn, "ord_rg", "REPORT_BASIC", 199, "USD", "stub");
    }
    settle(&ctx, "evt_pay_rg", "ord_rg", 199).await;

    let outcome = ctx
        .processor()
        .handle(
            "stub",
            &refund_payload("evt_refund_rg", "ord_rg", 199),
            ORG_ID,
            HandleOptions::verified(),
        )
        .await;
    assert!(outcome.ok);
    assert_eq!(outcome.revoked, Some(1));

    let conn = ctx.conn();
    assert_eq!(count_rows(&conn, "benefit_grants"), 1);
    let grants = queries::list_grants_by_order(&conn, ORG_ID, "ord_rg").unwrap();
    assert_eq!(grants[0].status, GrantStatus::Revoked);
    assert!(grants[0].revoked_at.is_some());
}

#[tokio::test]
async fn test_payment_after_refund_does_not_regrant() {
    let ctx = create_test_context();
    {
        let conn = ctx.conn();
        create_test_sku(&conn, "REPORT_BASIC", SkuKind::ReportUnlock, 1);
        create_test_order(&conn, "ord_late", "REPORT_BASIC", 199, "USD", "stub");
    }
    settle(&ctx, "evt_pay_late", "ord_late", 199).await;
    let refund = ctx
        .processor()
        .handle(
            "stub",
            &refund_payload("evt_refund_late", "ord_late", 199),
            ORG_ID,
            HandleOptions::verified(),
        )
        .await;
    assert!(refund.ok);

    // A late payment event for a refunded order must not resurrect it.
    let late = ctx
        .processor()
        .handle(
            "stub",
            &payment_payload("evt_pay_late_2", "ord_late", 199, "USD"),
            ORG_ID,
            HandleOptions::verified(),
        )
        .await;
    assert!(late.ok);
    assert!(late.is_duplicate());

    let conn = ctx.conn();
    assert_eq!(get_order(&conn, "ord_late").status, OrderStatus::Refunded);
    assert_eq!(count_rows(&conn, "benefit_grants"), 1);
}

#[tokio::test]
async fn test_admin_refund_applies_once() {
    let ctx = create_test_context();
    {
        let conn = ctx.conn();
        create_test_sku(&conn, "CREDITS_3", SkuKind::CreditPack, 3);
        create_test_order(&conn, "ord_admin", "CREDITS_3", 300, "USD", "stub");
    }
    settle(&ctx, "evt_admin_pay", "ord_admin", 300).await;

    let request = AdminRefund {
        org_id: ORG_ID,
        order_no: "ord_admin".to_string(),
        reason: "duplicate charge".to_string(),
        correlation_id: "corr-1".to_string(),
        actor_id: None,
    };
    let applied = ctx.processor().apply_admin_refund(&request).await.unwrap();
    assert!(!applied.already_refunded);

    let again = ctx.processor().apply_admin_refund(&request).await.unwrap();
    assert!(again.already_refunded);

    let conn = ctx.conn();
    let order = get_order(&conn, "ord_admin");
    assert_eq!(order.status, OrderStatus::Refunded);
    assert_eq!(order.refund_reason.as_deref(), Some("duplicate charge"));
    let wallet = queries::get_wallet(&conn, ORG_ID, "CREDITS_3").unwrap().unwrap();
    assert_eq!(wallet.balance, 0);
}

#[tokio::test]
async fn test_admin_refund_unknown_order() {
    let ctx = create_test_context();
    let request = AdminRefund {
        org_id: ORG_ID,
        order_no: "ord_nope".to_string(),
        reason: "test".to_string(),
        correlation_id: "corr-2".to_string(),
        actor_id: None,
    };

    let err = ctx.processor().apply_admin_refund(&request).await.unwrap_err();
    assert_eq!(err.code().as_ref(), "ORDER_NOT_FOUND");
}
