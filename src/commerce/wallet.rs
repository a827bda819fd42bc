//! Credit wallets. Every balance change is a ledger row with an idempotency
//! key; replaying a key leaves the balance untouched.

use rusqlite::Connection;
use serde_json::Value;

use super::{CommerceError, CommerceResult};
use crate::db::queries::{self, NewLedgerEntry};
use crate::error::{AppError, ErrorCode, msg};
use crate::models::{LedgerReason, WalletOutcome};

#[derive(Debug, Clone, Copy)]
pub struct WalletPosting<'a> {
    pub org_id: i64,
    pub benefit_code: &'a str,
    /// Always positive; the reason decides the sign.
    pub quantity: i64,
    pub idempotency_key: &'a str,
    pub order_no: Option<&'a str>,
    pub attempt_id: Option<&'a str>,
    pub meta: Option<&'a Value>,
}

pub fn topup_key(provider: &str, provider_event_id: &str) -> String {
    format!("TOPUP:{}:{}", provider, provider_event_id)
}

pub fn reversal_key(provider: &str, provider_event_id: &str) -> String {
    format!("REVERSAL:{}:{}", provider, provider_event_id)
}

pub fn top_up(conn: &Connection, posting: &WalletPosting) -> CommerceResult<WalletOutcome> {
    post(conn, posting, LedgerReason::Topup)
}

/// Take back credits granted by a refunded purchase. The balance may go
/// negative if the credits were already spent.
pub fn reverse(conn: &Connection, posting: &WalletPosting) -> CommerceResult<WalletOutcome> {
    post(conn, posting, LedgerReason::Reversal)
}

fn post(conn: &Connection, posting: &WalletPosting, reason: LedgerReason) -> CommerceResult<WalletOutcome> {
    let benefit_code = posting.benefit_code.trim().to_uppercase();
    if benefit_code.is_empty() {
        return Err(CommerceError::rejected(
            ErrorCode::BenefitRequired,
            msg::BENEFIT_REQUIRED,
        ));
    }
    if posting.quantity <= 0 {
        return Err(CommerceError::rejected(
            ErrorCode::DeltaInvalid,
            msg::DELTA_INVALID,
        ));
    }

    let delta = match reason {
        LedgerReason::Topup => posting.quantity,
        LedgerReason::Reversal | LedgerReason::Consume => -posting.quantity,
    };

    let inserted = queries::post_wallet_entry(
        conn,
        &NewLedgerEntry {
            org_id: posting.org_id,
            benefit_code: &benefit_code,
            delta,
            reason,
            order_no: posting.order_no,
            attempt_id: posting.attempt_id,
            idempotency_key: posting.idempotency_key,
            meta: posting.meta,
        },
    )?;

    let wallet = queries::get_wallet(conn, posting.org_id, &benefit_code)?
        .ok_or_else(|| AppError::Internal(format!("wallet {} missing after posting", benefit_code)))?;

    if inserted {
        tracing::info!(
            org_id = posting.org_id,
            benefit_code = %benefit_code,
            delta,
            balance = wallet.balance,
            reason = reason.as_ref(),
            "Wallet ledger posted"
        );
    }

    Ok(WalletOutcome {
        wallet,
        idempotent: !inserted,
    })
}
