//! Approval actions run through the executor

#[path = "../common/mod.rs"]
mod common;

use common::*;
use serde_json::json;

fn setup_report_order(ctx: &TestContext, order_no: &str) {
    let conn = ctx.conn();
    create_test_sku(&conn, "REPORT_BASIC", SkuKind::ReportUnlock, 1);
    create_test_order(&conn, order_no, "REPORT_BASIC", 199, "USD", "stub");
}

// ============ Manual grant ============

#[test]
fn test_manual_grant_is_idempotent_per_attempt() {
    let ctx = create_test_context();
    setup_report_order(&ctx, "ord_g");
    let (requester, reviewer) = create_admin_pair(&ctx.conn());
    let executor = executor(&ctx);

    for _ in 0..2 {
        let approval = create_approved(
            &ctx,
            ApprovalType::ManualGrant,
            json!({ "order_no": "ord_g" }),
            &requester,
            &reviewer,
        );
        let result = executor.execute(&approval.id).unwrap();
        assert!(result.ok, "{:?}", result);
    }

    let conn = ctx.conn();
    assert_eq!(count_rows(&conn, "benefit_grants"), 1);
    let grants = queries::list_grants_by_order(&conn, ORG_ID, "ord_g").unwrap();
    assert_eq!(grants[0].status, GrantStatus::Active);
}

#[test]
fn test_manual_grant_uses_explicit_benefit_and_attempt() {
    let ctx = create_test_context();
    setup_report_order(&ctx, "ord_g2");
    let (requester, reviewer) = create_admin_pair(&ctx.conn());
    let approval = create_approved(
        &ctx,
        ApprovalType::ManualGrant,
        json!({ "order_no": "ord_g2", "benefit_code": "report_full", "attempt_id": "att_9" }),
        &requester,
        &reviewer,
    );

    let result = executor(&ctx).execute(&approval.id).unwrap();
    assert!(result.ok, "{:?}", result);
    assert_eq!(result.data["result"]["benefit_code"], json!("REPORT_FULL"));
    assert_eq!(result.data["result"]["attempt_id"], json!("att_9"));

    let actions = audit_actions(&ctx.conn(), &get_order(&ctx.conn(), "ord_g2").id);
    assert!(actions.contains(&"manual_grant_benefit".to_string()));
}

#[test]
fn test_action_requires_permission() {
    let ctx = create_test_context();
    setup_report_order(&ctx, "ord_perm");
    let (requester, reviewer) = {
        let conn = ctx.conn();
        (
            create_test_admin(&conn, "content@example.com", &[PERM_CONTENT_RELEASE]),
            create_test_admin(&conn, "reviewer@example.com", &all_permissions()),
        )
    };
    let approval = create_approved(
        &ctx,
        ApprovalType::ManualGrant,
        json!({ "order_no": "ord_perm" }),
        &requester,
        &reviewer,
    );

    let result = executor(&ctx).execute(&approval.id).unwrap();
    assert!(!result.ok);
    assert_eq!(result.code.as_deref(), Some("FORBIDDEN"));

    let conn = ctx.conn();
    assert_eq!(count_rows(&conn, "benefit_grants"), 0);
    let stored = queries::get_approval(&conn, &approval.id).unwrap().unwrap();
    assert_eq!(stored.status, ApprovalStatus::Failed);
    assert_eq!(stored.error_code.as_deref(), Some("FORBIDDEN"));
}

#[test]
fn test_order_outside_org_is_not_found() {
    let ctx = create_test_context();
    setup_report_order(&ctx, "ord_scope");
    let (requester, reviewer) = create_admin_pair(&ctx.conn());

    let executor = executor(&ctx);
    let approval = executor
        .request_approval(
            &CreateApproval {
                org_id: ORG_ID + 1,
                approval_type: ApprovalType::ManualGrant,
                payload: json!({ "order_no": "ord_scope" }),
                reason: "wrong tenant".to_string(),
                correlation_id: None,
                requested_by: requester.id.clone(),
            },
            &RequestMeta::default(),
        )
        .unwrap();
    executor
        .approve(&approval.id, &reviewer.id, &RequestMeta::default())
        .unwrap();

    let result = executor.execute(&approval.id).unwrap();
    assert_eq!(result.code.as_deref(), Some("ORDER_NOT_FOUND"));
    assert_eq!(count_rows(&ctx.conn(), "benefit_grants"), 0);
}

#[test]
fn test_malformed_payload_is_invalid_argument() {
    let ctx = create_test_context();
    let (requester, reviewer) = create_admin_pair(&ctx.conn());
    let approval = create_approved(
        &ctx,
        ApprovalType::ManualGrant,
        json!({ "order_no": 42 }),
        &requester,
        &reviewer,
    );

    let result = executor(&ctx).execute(&approval.id).unwrap();
    assert_eq!(result.code.as_deref(), Some("INVALID_ARGUMENT"));
}

// ============ Revoke ============

#[test]
fn test_revoke_benefit_after_manual_grant() {
    let ctx = create_test_context();
    setup_report_order(&ctx, "ord_rev");
    let (requester, reviewer) = create_admin_pair(&ctx.conn());
    let executor = executor(&ctx);

    let grant = create_approved(
        &ctx,
        ApprovalType::ManualGrant,
        json!({ "order_no": "ord_rev" }),
        &requester,
        &reviewer,
    );
    assert!(executor.execute(&grant.id).unwrap().ok);

    let revoke = create_approved(
        &ctx,
        ApprovalType::RevokeBenefit,
        json!({ "order_no": "ord_rev" }),
        &requester,
        &reviewer,
    );
    let result = executor.execute(&revoke.id).unwrap();
    assert!(result.ok, "{:?}", result);
    assert_eq!(result.data["result"]["revoked"], json!(1));

    let conn = ctx.conn();
    let grants = queries::list_grants_by_order(&conn, ORG_ID, "ord_rev").unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].status, GrantStatus::Revoked);
}

// ============ Refund and reprocess enqueue ============

#[test]
fn test_refund_enqueues_job() {
    let ctx = create_test_context();
    setup_report_order(&ctx, "ord_ref");
    let (requester, reviewer) = create_admin_pair(&ctx.conn());
    let approval = create_approved(
        &ctx,
        ApprovalType::Refund,
        json!({ "order_no": "ord_ref" }),
        &requester,
        &reviewer,
    );

    let result = executor(&ctx).execute(&approval.id).unwrap();
    assert!(result.ok, "{:?}", result);
    assert_eq!(result.data["result"]["queued"], json!(true));

    let conn = ctx.conn();
    let jobs = queries::list_jobs(&conn, JobType::RefundOrder).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].payload["order_no"], json!("ord_ref"));
    assert_eq!(jobs[0].payload["org_id"], json!(ORG_ID));
    assert_eq!(jobs[0].payload["reason"], json!("support ticket 42"));
    assert_eq!(jobs[0].payload["actor_id"], json!(requester.id));
    assert_eq!(jobs[0].status, JobStatus::Pending);

    // The order itself is untouched until the job runs.
    assert_eq!(get_order(&conn, "ord_ref").status, OrderStatus::Created);
}

#[test]
fn test_reprocess_unknown_event() {
    let ctx = create_test_context();
    let (requester, reviewer) = create_admin_pair(&ctx.conn());
    let approval = create_approved(
        &ctx,
        ApprovalType::ReprocessEvent,
        json!({ "payment_event_id": "pev_missing" }),
        &requester,
        &reviewer,
    );

    let result = executor(&ctx).execute(&approval.id).unwrap();
    assert!(!result.ok);
    assert_eq!(result.code.as_deref(), Some("EVENT_NOT_FOUND"));
    assert!(queries::list_jobs(&ctx.conn(), JobType::ReprocessPaymentEvent)
        .unwrap()
        .is_empty());
}

// ============ Content rollback ============

#[test]
fn test_rollback_release_records_release() {
    let ctx = create_test_context();
    let (requester, reviewer) = create_admin_pair(&ctx.conn());
    let approval = create_approved(
        &ctx,
        ApprovalType::RollbackRelease,
        json!({ "locale": "zh-CN", "from_version_id": "v2", "to_version_id": "v1" }),
        &requester,
        &reviewer,
    );

    let result = executor(&ctx).execute(&approval.id).unwrap();
    assert!(result.ok, "{:?}", result);
    assert_eq!(result.data["result"]["type"], json!("ROLLBACK_RELEASE"));

    let conn = ctx.conn();
    assert_eq!(count_rows(&conn, "content_pack_releases"), 1);
    let (region, locale, action): (String, String, String) = conn
        .query_row(
            "SELECT region, locale, action FROM content_pack_releases",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!(region, "GLOBAL");
    assert_eq!(locale, "zh-CN");
    assert_eq!(action, "rollback");

    let actions = audit_actions(&conn, &approval.id);
    assert!(actions.contains(&"content_release_rollback".to_string()));
}
