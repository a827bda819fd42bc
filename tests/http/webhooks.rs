//! `POST /webhooks/payment/{provider}` end to end

#[path = "../common/mod.rs"]
mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::*;
use paysettle::payments::signature::compute_signature;
use serde_json::{Value, json};
use tower::ServiceExt;

fn webhook_request(provider: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/webhooks/payment/{}", provider))
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

fn stripe_request(body: &str, secret: &str, timestamp: i64) -> Request<Body> {
    let sig = compute_signature(secret, &timestamp.to_string(), body.as_bytes()).unwrap();
    Request::builder()
        .method("POST")
        .uri("/webhooks/payment/stripe")
        .header("content-type", "application/json")
        .header("stripe-signature", format!("t={},v1={}", timestamp, sig))
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn stripe_payment(event_id: &str, order_no: &str, amount: i64) -> String {
    json!({
        "id": event_id,
        "type": "payment_intent.succeeded",
        "data": {"object": {
            "id": "pi_test",
            "amount": amount,
            "currency": "usd",
            "metadata": {"order_no": order_no}
        }}
    })
    .to_string()
}

fn setup_stripe_order(ctx: &TestContext, order_no: &str) {
    let conn = ctx.conn();
    create_test_sku(&conn, "REPORT_BASIC", SkuKind::ReportUnlock, 1);
    create_test_order(&conn, order_no, "REPORT_BASIC", 4990, "USD", "stripe");
}

#[tokio::test]
async fn test_stub_delivery_settles_order() {
    let ctx = create_test_context();
    {
        let conn = ctx.conn();
        create_test_sku(&conn, "REPORT_BASIC", SkuKind::ReportUnlock, 1);
        create_test_order(&conn, "ord_http", "REPORT_BASIC", 199, "USD", "stub");
    }

    let body = payment_payload("evt_http", "ord_http", 199, "USD").to_string();
    let response = ctx
        .app()
        .oneshot(webhook_request("stub", body.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ok"], json!(true));
    assert_eq!(json["order_no"], json!("ord_http"));
    assert_eq!(json["provider_event_id"], json!("evt_http"));

    {
        let conn = ctx.conn();
        assert_eq!(get_order(&conn, "ord_http").status, OrderStatus::Fulfilled);
        let event = queries::get_payment_event(&conn, "stub", "evt_http")
            .unwrap()
            .unwrap();
        assert_eq!(event.org_id, ORG_ID);
        assert_eq!(event.payload_size_bytes, Some(body.len() as i64));
    }

    let again = ctx.app().oneshot(webhook_request("stub", body)).await.unwrap();
    assert_eq!(again.status(), StatusCode::OK);
    let json = body_json(again).await;
    assert_eq!(json["duplicate"], json!(true));
}

#[tokio::test]
async fn test_unknown_provider_is_not_found() {
    let ctx = create_test_context();
    let response = ctx
        .app()
        .oneshot(webhook_request("paypal", "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["ok"], json!(false));
    assert_eq!(json["error_code"], json!("NOT_FOUND"));
}

#[tokio::test]
async fn test_stub_provider_hidden_in_production() {
    let mut config = test_config();
    config.environment = Environment::Production;
    let ctx = create_test_context_with(config);

    let body = payment_payload("evt_prod", "ord_prod", 1, "USD").to_string();
    let response = ctx.app().oneshot(webhook_request("stub", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_json_is_rejected() {
    let ctx = create_test_context();
    for body in ["{not json", "[1, 2, 3]"] {
        let response = ctx
            .app()
            .oneshot(webhook_request("stub", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error_code"], json!("INVALID_JSON"));
    }
    assert_eq!(count_rows(&ctx.conn(), "payment_events"), 0);
}

#[tokio::test]
async fn test_oversized_body_gets_json_413() {
    let mut config = test_config();
    config.max_webhook_body_bytes = 64;
    let ctx = create_test_context_with(config);

    let body = json!({ "provider_event_id": "evt_big", "padding": "x".repeat(60) }).to_string();
    assert!(body.len() > 64 && body.len() <= 128);
    let response = ctx.app().oneshot(webhook_request("stub", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let json = body_json(response).await;
    assert_eq!(json["error_code"], json!("PAYLOAD_TOO_LARGE"));
}

#[tokio::test]
async fn test_signed_stripe_delivery_settles() {
    let ctx = create_test_context_with(stripe_signed_config());
    setup_stripe_order(&ctx, "ord_stripe");

    let body = stripe_payment("evt_stripe_1", "ord_stripe", 4990);
    let response = ctx
        .app()
        .oneshot(stripe_request(&body, STRIPE_SECRET, now()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let conn = ctx.conn();
    let order = get_order(&conn, "ord_stripe");
    assert_eq!(order.status, OrderStatus::Fulfilled);
    assert_eq!(order.external_trade_no.as_deref(), Some("pi_test"));
    let event = queries::get_payment_event(&conn, "stripe", "evt_stripe_1")
        .unwrap()
        .unwrap();
    assert!(event.signature_ok);
}

#[tokio::test]
async fn test_bad_stripe_signature_writes_nothing() {
    let ctx = create_test_context_with(stripe_signed_config());
    setup_stripe_order(&ctx, "ord_forged");

    let body = stripe_payment("evt_forged", "ord_forged", 4990);
    let response = ctx
        .app()
        .oneshot(stripe_request(&body, "whsec_wrong", now()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error_code"], json!("SIGNATURE_INVALID"));

    // Signed correctly but far outside the tolerance window.
    let stale = ctx
        .app()
        .oneshot(stripe_request(&body, STRIPE_SECRET, now() - 3_600))
        .await
        .unwrap();
    assert_eq!(stale.status(), StatusCode::BAD_REQUEST);

    let conn = ctx.conn();
    assert_eq!(count_rows(&conn, "payment_events"), 0);
    assert_eq!(get_order(&conn, "ord_forged").status, OrderStatus::Created);
}

#[tokio::test]
async fn test_unknown_order_via_http_is_orphan() {
    let ctx = create_test_context();
    let body = payment_payload("evt_lost", "ord_lost", 100, "USD").to_string();

    let response = ctx.app().oneshot(webhook_request("stub", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json: Value = body_json(response).await;
    assert_eq!(json["error_code"], json!("ORDER_NOT_FOUND"));

    let conn = ctx.conn();
    let event = queries::get_payment_event(&conn, "stub", "evt_lost")
        .unwrap()
        .unwrap();
    assert_eq!(event.status, EventStatus::Orphan);
    assert_eq!(event.org_id, 0);
}
