//! Concurrent deliveries serialize through the order lock

#[path = "../common/mod.rs"]
mod common;

use std::time::Duration;

use common::*;
use paysettle::commerce::order_lock_key;
use paysettle::lock::DistributedLock;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_event_settles_exactly_once() {
    let ctx = create_test_context();
    {
        let conn = ctx.conn();
        create_test_sku(&conn, "REPORT_BASIC", SkuKind::ReportUnlock, 1);
        create_test_order(&conn, "ord_race", "REPORT_BASIC", 199, "USD", "stub");
    }

    let payload = payment_payload("evt_race", "ord_race", 199, "USD");
    let mut handles = Vec::new();
    for _ in 0..8 {
        let processor = ctx.processor();
        let payload = payload.clone();
        handles.push(tokio::spawn(async move {
            processor
                .handle("stub", &payload, ORG_ID, HandleOptions::verified())
                .await
        }));
    }

    let mut settled = 0;
    let mut duplicates = 0;
    for handle in handles {
        let outcome = handle.await.unwrap();
        assert!(outcome.ok, "every delivery should succeed: {:?}", outcome);
        if outcome.is_duplicate() {
            duplicates += 1;
        } else {
            settled += 1;
        }
    }

    assert_eq!(settled, 1, "exactly one delivery settles the order");
    assert_eq!(duplicates, 7);

    let conn = ctx.conn();
    assert_eq!(count_rows(&conn, "benefit_grants"), 1);
    assert_eq!(count_rows(&conn, "payment_events"), 1);
    assert_eq!(get_order(&conn, "ord_race").status, OrderStatus::Fulfilled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_credit_pack_tops_up_once() {
    let ctx = create_test_context();
    {
        let conn = ctx.conn();
        create_test_sku(&conn, "CREDITS_5", SkuKind::CreditPack, 5);
        create_test_order(&conn, "ord_credit_race", "CREDITS_5", 500, "USD", "stub");
    }

    let payload = payment_payload("evt_credit_race", "ord_credit_race", 500, "USD");
    let handles: Vec<_> = (0..6)
        .map(|_| {
            let processor = ctx.processor();
            let payload = payload.clone();
            tokio::spawn(async move {
                processor
                    .handle("stub", &payload, ORG_ID, HandleOptions::verified())
                    .await
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().ok);
    }

    let conn = ctx.conn();
    let wallet = queries::get_wallet(&conn, ORG_ID, "CREDITS_5").unwrap().unwrap();
    assert_eq!(wallet.balance, 5, "wallet must be credited once");
    assert_eq!(count_rows(&conn, "benefit_wallet_ledgers"), 1);
}

#[tokio::test]
async fn test_held_lock_makes_delivery_busy() {
    let ctx = create_test_context();
    {
        let conn = ctx.conn();
        create_test_sku(&conn, "REPORT_BASIC", SkuKind::ReportUnlock, 1);
        create_test_order(&conn, "ord_busy", "REPORT_BASIC", 199, "USD", "stub");
    }

    let lock = DistributedLock::new(ctx.state.db.clone());
    let guard = lock
        .try_acquire(&order_lock_key("stub", "ord_busy"), Duration::from_secs(30))
        .unwrap()
        .expect("lock should be free");

    let outcome = ctx
        .processor()
        .with_lock_timing(Duration::from_millis(200), Duration::from_secs(10))
        .handle(
            "stub",
            &payment_payload("evt_busy", "ord_busy", 199, "USD"),
            ORG_ID,
            HandleOptions::verified(),
        )
        .await;

    assert!(!outcome.ok);
    assert_eq!(outcome.error_code.as_deref(), Some("WEBHOOK_BUSY"));
    assert_eq!(outcome.status, 500);
    {
        let conn = ctx.conn();
        assert_eq!(count_rows(&conn, "payment_events"), 0);
        assert_eq!(get_order(&conn, "ord_busy").status, OrderStatus::Created);
    }

    guard.release().unwrap();
    let retry = ctx
        .processor()
        .handle(
            "stub",
            &payment_payload("evt_busy", "ord_busy", 199, "USD"),
            ORG_ID,
            HandleOptions::verified(),
        )
        .await;
    assert!(retry.ok, "retry after release should settle: {:?}", retry);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_orders_settle_in_parallel() {
    let ctx = create_test_context();
    {
        let conn = ctx.conn();
        create_test_sku(&conn, "REPORT_BASIC", SkuKind::ReportUnlock, 1);
        for i in 0..5 {
            create_test_order(
                &conn,
                &format!("ord_par_{}", i),
                "REPORT_BASIC",
                199,
                "USD",
                "stub",
            );
        }
    }

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let processor = ctx.processor();
            tokio::spawn(async move {
                let payload = payment_payload(
                    &format!("evt_par_{}", i),
                    &format!("ord_par_{}", i),
                    199,
                    "USD",
                );
                processor
                    .handle("stub", &payload, ORG_ID, HandleOptions::verified())
                    .await
            })
        })
        .collect();

    for handle in handles {
        let outcome = handle.await.unwrap();
        assert!(outcome.ok);
        assert!(!outcome.is_duplicate());
    }
    let conn = ctx.conn();
    for i in 0..5 {
        let order = get_order(&conn, &format!("ord_par_{}", i));
        assert_eq!(order.status, OrderStatus::Fulfilled);
    }
    assert_eq!(count_rows(&conn, "payment_events"), 5);
}
