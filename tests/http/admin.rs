//! Admin API: authentication, approvals, dry run and health

#[path = "../common/mod.rs"]
mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::*;
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn test_admin_requires_bearer_token() {
    let ctx = create_test_context();
    let (requester, _) = create_admin_pair(&ctx.conn());

    let request = Request::builder()
        .method("GET")
        .uri("/admin/approvals/apr_x")
        .header("x-admin-user-id", requester.id.as_str())
        .body(Body::empty())
        .unwrap();
    let response = ctx.app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("GET")
        .uri("/admin/approvals/apr_x")
        .header("authorization", "Bearer wrong-token")
        .header("x-admin-user-id", requester.id.as_str())
        .body(Body::empty())
        .unwrap();
    let response = ctx.app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_without_configured_token_is_closed() {
    let mut config = test_config();
    config.admin_api_token = None;
    let ctx = create_test_context_with(config);
    let (requester, _) = create_admin_pair(&ctx.conn());

    let response = ctx
        .app()
        .oneshot(admin_request("GET", "/admin/approvals/apr_x", &requester.id, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_or_inactive_admin_is_forbidden() {
    let ctx = create_test_context();
    let response = ctx
        .app()
        .oneshot(admin_request("GET", "/admin/approvals/apr_x", "adm_ghost", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let (requester, _) = create_admin_pair(&ctx.conn());
    queries::deactivate_admin_user(&ctx.conn(), &requester.id).unwrap();
    let response = ctx
        .app()
        .oneshot(admin_request("GET", "/admin/approvals/apr_x", &requester.id, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_approval_lifecycle_over_http() {
    let ctx = create_test_context();
    {
        let conn = ctx.conn();
        create_test_sku(&conn, "REPORT_BASIC", SkuKind::ReportUnlock, 1);
        create_test_order(&conn, "ord_api", "REPORT_BASIC", 199, "USD", "stub");
    }
    let (requester, reviewer) = create_admin_pair(&ctx.conn());

    let response = ctx
        .app()
        .oneshot(admin_request(
            "POST",
            "/admin/approvals",
            &requester.id,
            Some(json!({
                "org_id": ORG_ID,
                "type": "MANUAL_GRANT",
                "payload": {"order_no": "ord_api"},
                "reason": "customer was charged twice",
                "correlation_id": "corr-api-1"
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["status"], json!("PENDING"));
    assert_eq!(created["type"], json!("MANUAL_GRANT"));
    assert_eq!(created["correlation_id"], json!("corr-api-1"));
    let approval_id = created["id"].as_str().unwrap().to_string();

    // Executing before approval is a conflict.
    let response = ctx
        .app()
        .oneshot(admin_request(
            "POST",
            &format!("/admin/approvals/{}/execute?sync=true", approval_id),
            &reviewer.id,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert_eq!(json["code"], json!("APPROVAL_STATUS_INVALID"));

    let response = ctx
        .app()
        .oneshot(admin_request(
            "POST",
            &format!("/admin/approvals/{}/approve", approval_id),
            &reviewer.id,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let approved = body_json(response).await;
    assert_eq!(approved["status"], json!("APPROVED"));
    assert_eq!(approved["approved_by"], json!(reviewer.id));

    let response = ctx
        .app()
        .oneshot(admin_request(
            "POST",
            &format!("/admin/approvals/{}/execute?sync=true", approval_id),
            &reviewer.id,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let executed = body_json(response).await;
    assert_eq!(executed["ok"], json!(true));
    assert_eq!(executed["data"]["status"], json!("EXECUTED"));

    let response = ctx
        .app()
        .oneshot(admin_request(
            "GET",
            &format!("/admin/approvals/{}", approval_id),
            &requester.id,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["status"], json!("EXECUTED"));
    assert_eq!(fetched["retry_count"], json!(1));
}

#[tokio::test]
async fn test_execute_without_sync_queues_job() {
    let ctx = create_test_context();
    let (requester, reviewer) = create_admin_pair(&ctx.conn());
    let approval = create_approved(
        &ctx,
        ApprovalType::RollbackRelease,
        json!({ "to_version_id": "v1" }),
        &requester,
        &reviewer,
    );

    let response = ctx
        .app()
        .oneshot(admin_request(
            "POST",
            &format!("/admin/approvals/{}/execute", approval.id),
            &reviewer.id,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["queued"], json!(true));
    let job_id = json["job_id"].as_str().unwrap().to_string();

    {
        let conn = ctx.conn();
        let job = queries::get_job(&conn, &job_id).unwrap().unwrap();
        assert_eq!(job.job_type, JobType::ExecuteApproval);
        assert_eq!(
            queries::get_approval(&conn, &approval.id).unwrap().unwrap().status,
            ApprovalStatus::Approved
        );
    }

    JobWorker::new(&ctx.state).drain().await.unwrap();
    let conn = ctx.conn();
    assert_eq!(
        queries::get_approval(&conn, &approval.id).unwrap().unwrap().status,
        ApprovalStatus::Executed
    );
    assert_eq!(count_rows(&conn, "content_pack_releases"), 1);
}

#[tokio::test]
async fn test_missing_approval_is_not_found() {
    let ctx = create_test_context();
    let (requester, _) = create_admin_pair(&ctx.conn());

    for (method, uri) in [
        ("GET", "/admin/approvals/apr_missing"),
        ("POST", "/admin/approvals/apr_missing/approve"),
        ("POST", "/admin/approvals/apr_missing/execute"),
        ("POST", "/admin/approvals/apr_missing/execute?sync=true"),
    ] {
        let response = ctx
            .app()
            .oneshot(admin_request(method, uri, &requester.id, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{} {}", method, uri);
    }
    assert_eq!(count_rows(&ctx.conn(), "jobs"), 0);
}

#[tokio::test]
async fn test_request_without_reason_is_bad_request() {
    let ctx = create_test_context();
    let (requester, _) = create_admin_pair(&ctx.conn());

    let response = ctx
        .app()
        .oneshot(admin_request(
            "POST",
            "/admin/approvals",
            &requester.id,
            Some(json!({ "org_id": ORG_ID, "type": "REFUND", "payload": {"order_no": "o"} })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(count_rows(&ctx.conn(), "admin_approvals"), 0);
}

#[tokio::test]
async fn test_dry_run_reports_without_writing() {
    let ctx = create_test_context();
    let (requester, _) = create_admin_pair(&ctx.conn());

    let response = ctx
        .app()
        .oneshot(admin_request(
            "POST",
            "/admin/webhooks/stub/dry-run",
            &requester.id,
            Some(refund_payload("evt_dry", "ord_dry", 100)),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["dry_run"], json!(true));
    assert_eq!(json["is_refund"], json!(true));
    assert_eq!(json["provider_event_id"], json!("evt_dry"));
    assert_eq!(count_rows(&ctx.conn(), "payment_events"), 0);
}

#[tokio::test]
async fn test_health_reports_providers() {
    let ctx = create_test_context();
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = ctx.app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ok"], json!(true));
    assert_eq!(json["service"], json!("paysettle"));
    assert_eq!(json["environment"], json!("testing"));
    assert_eq!(json["providers"], json!(["stripe", "billing", "stub"]));
}
