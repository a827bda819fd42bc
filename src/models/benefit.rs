use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GrantStatus {
    Active,
    Revoked,
}

/// An entitlement unlock tied to an order and an attempt. Unique per
/// (org_id, benefit_code, scope, attempt_id); revocation never deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenefitGrant {
    pub id: String,
    pub org_id: i64,
    pub user_id: String,
    pub benefit_ref: String,
    pub benefit_code: String,
    pub scope: String,
    pub attempt_id: String,
    pub order_no: Option<String>,
    pub status: GrantStatus,
    pub meta: Option<serde_json::Value>,
    pub expires_at: Option<i64>,
    pub revoked_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct GrantRequest<'a> {
    pub org_id: i64,
    pub user_id: Option<&'a str>,
    pub anon_id: Option<&'a str>,
    pub benefit_code: &'a str,
    pub attempt_id: &'a str,
    pub order_no: Option<&'a str>,
    pub scope: Option<&'a str>,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrantOutcome {
    pub grant: BenefitGrant,
    pub idempotent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: String,
    pub org_id: i64,
    pub benefit_code: String,
    pub balance: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LedgerReason {
    Topup,
    Reversal,
    Consume,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletLedgerEntry {
    pub id: String,
    pub org_id: i64,
    pub benefit_code: String,
    pub delta: i64,
    pub reason: LedgerReason,
    pub order_no: Option<String>,
    pub attempt_id: Option<String>,
    pub idempotency_key: String,
    pub meta: Option<serde_json::Value>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletOutcome {
    pub wallet: Wallet,
    pub idempotent: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevokeOutcome {
    pub revoked: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benefit_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<String>,
}
