use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Paid,
    Fulfilled,
    Refunded,
}

impl OrderStatus {
    /// Forward-only lifecycle; `refunded` is terminal.
    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (Created, Paid)
                | (Created, Refunded)
                | (Paid, Fulfilled)
                | (Paid, Refunded)
                | (Fulfilled, Refunded)
        )
    }

    /// A settled order has already consumed its paying event.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::Fulfilled | OrderStatus::Refunded
        )
    }
}

/// A purchase intent. Amount and currency are immutable once created and must
/// match the settling webhook exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub org_id: i64,
    pub order_no: String,
    pub user_id: Option<String>,
    pub anon_id: Option<String>,
    pub sku: String,
    pub quantity: i64,
    pub target_attempt_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub provider: String,
    pub status: OrderStatus,
    pub external_trade_no: Option<String>,
    pub paid_at: Option<i64>,
    pub fulfilled_at: Option<i64>,
    pub refunded_at: Option<i64>,
    pub refund_amount_cents: Option<i64>,
    pub refund_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Order placement happens upstream; this is used by seeding and tests.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrder {
    pub org_id: i64,
    pub order_no: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub anon_id: Option<String>,
    pub sku: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default)]
    pub target_attempt_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub provider: String,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SkuKind {
    CreditPack,
    ReportUnlock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sku {
    pub sku: String,
    pub benefit_code: String,
    pub kind: SkuKind,
    /// Credits granted per unit for credit packs.
    pub unit_qty: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSku {
    pub sku: String,
    pub benefit_code: String,
    pub kind: SkuKind,
    #[serde(default = "default_quantity")]
    pub unit_qty: i64,
}
