//! Prefixed ID generation for settlement entities.
//!
//! All IDs use a `ps_` brand prefix so they never collide with provider IDs
//! (Stripe's `evt_`, `ch_`, `pi_`, etc.).
//!
//! Format: `ps_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &[
    "ps_ord_", "ps_evt_", "ps_grt_", "ps_wal_", "ps_led_", "ps_apr_", "ps_adm_", "ps_rel_",
    "ps_job_", "ps_aud_", "ps_idk_",
];

/// Validate that a string is a well-formed prefixed ID.
///
/// Cheap rejection of garbage path parameters before hitting the database.
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Order,
    PaymentEvent,
    BenefitGrant,
    Wallet,
    WalletLedger,
    AdminApproval,
    AdminUser,
    ContentRelease,
    Job,
    AuditLog,
    IdempotencyKey,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Order => "ps_ord",
            Self::PaymentEvent => "ps_evt",
            Self::BenefitGrant => "ps_grt",
            Self::Wallet => "ps_wal",
            Self::WalletLedger => "ps_led",
            Self::AdminApproval => "ps_apr",
            Self::AdminUser => "ps_adm",
            Self::ContentRelease => "ps_rel",
            Self::Job => "ps_job",
            Self::AuditLog => "ps_aud",
            Self::IdempotencyKey => "ps_idk",
        }
    }

    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
