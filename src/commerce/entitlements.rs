//! Benefit grants tied to an assessment attempt.
//!
//! A grant is identified by (org, benefit_code, scope, attempt_id). Granting
//! twice returns the first row flagged `idempotent`; revocation flips the
//! status and keeps the row.

use rusqlite::Connection;

use super::{CommerceError, CommerceResult};
use crate::db::queries::{self, NewBenefitGrant};
use crate::error::{AppError, ErrorCode, msg};
use crate::models::{GrantOutcome, GrantRequest, RevokeOutcome};

pub const DEFAULT_SCOPE: &str = "attempt";

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn grant_attempt_unlock(conn: &Connection, req: &GrantRequest) -> CommerceResult<GrantOutcome> {
    let benefit_code = req.benefit_code.trim().to_uppercase();
    if benefit_code.is_empty() {
        return Err(CommerceError::rejected(
            ErrorCode::BenefitRequired,
            msg::BENEFIT_REQUIRED,
        ));
    }
    let attempt_id = req.attempt_id.trim();
    if attempt_id.is_empty() {
        return Err(CommerceError::rejected(
            ErrorCode::AttemptRequired,
            msg::ATTEMPT_REQUIRED,
        ));
    }
    let scope = non_empty(req.scope).unwrap_or(DEFAULT_SCOPE);

    if let Some(grant) = queries::get_benefit_grant(conn, req.org_id, &benefit_code, scope, attempt_id)? {
        return Ok(GrantOutcome {
            grant,
            idempotent: true,
        });
    }

    let user_id = non_empty(req.user_id);
    let anon_id = non_empty(req.anon_id);
    let fallback = format!("attempt:{}", attempt_id);
    let owner = user_id.or(anon_id).unwrap_or(&fallback);
    let benefit_ref = anon_id.or(user_id).unwrap_or(&fallback);

    let inserted = queries::insert_benefit_grant_if_absent(
        conn,
        &NewBenefitGrant {
            org_id: req.org_id,
            user_id: owner,
            benefit_ref,
            benefit_code: &benefit_code,
            scope,
            attempt_id,
            order_no: non_empty(req.order_no),
            meta: None,
            expires_at: req.expires_at,
        },
    )?;

    let grant = queries::get_benefit_grant(conn, req.org_id, &benefit_code, scope, attempt_id)?
        .ok_or_else(|| AppError::Internal("benefit grant missing after insert".into()))?;

    if inserted {
        tracing::info!(
            org_id = req.org_id,
            benefit_code = %benefit_code,
            attempt_id,
            "Benefit granted"
        );
    }

    Ok(GrantOutcome {
        grant,
        idempotent: !inserted,
    })
}

/// Revoke every active grant attached to `order_no`.
pub fn revoke_by_order(
    conn: &Connection,
    org_id: i64,
    order_no: &str,
    reason: Option<&str>,
) -> CommerceResult<RevokeOutcome> {
    let order_no = order_no.trim();
    let first = queries::list_grants_by_order(conn, org_id, order_no)?
        .into_iter()
        .next();
    let revoked = queries::revoke_grants_by_order(conn, org_id, order_no, non_empty(reason))?;

    if revoked > 0 {
        tracing::info!(org_id, order_no, revoked, "Benefit grants revoked");
    }

    Ok(RevokeOutcome {
        revoked,
        benefit_code: first.as_ref().map(|g| g.benefit_code.clone()),
        attempt_id: first.map(|g| g.attempt_id),
    })
}
