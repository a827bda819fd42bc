use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActorType {
    Admin,
    System,
    Provider,
}

/// Every action the settlement engine writes to the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditAction {
    PaymentWebhookProcessed,
    RequestApproval,
    ApproveApproval,
    ApprovalExecutedSuccess,
    ApprovalExecutedFailed,
    ManualGrantBenefit,
    RevokeBenefit,
    RefundOrderRequested,
    RefundOrderApplied,
    ReprocessPaymentEvent,
    ReprocessPaymentEventExecuted,
    ReprocessPaymentEventFailed,
    ContentReleaseRollback,
    SeedAdminUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: String,
    pub timestamp: i64,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub org_id: i64,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub meta: Option<serde_json::Value>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditLogQuery {
    pub actor_type: Option<ActorType>,
    pub actor_id: Option<String>,
    pub action: Option<String>,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub org_id: Option<i64>,
    /// Maximum number of items to return (default: 50, max: 100)
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditLogQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 100)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

impl AuditLog {
    /// One-line rendering for operator logs.
    ///
    /// Format: `[TIMESTAMP] [ActorType] (actor) VERB OBJECT TARGET in org N`
    pub fn formatted(&self) -> String {
        use chrono::{TimeZone, Utc};

        let timestamp = Utc
            .timestamp_opt(self.timestamp, 0)
            .single()
            .map(|dt| format!("[{}]", dt.format("%Y-%m-%d %H:%M:%S")))
            .unwrap_or_else(|| format!("[{}]", self.timestamp));

        // fixed width, [Provider] is the longest
        let actor_type = match self.actor_type {
            ActorType::Admin => "[Admin]   ",
            ActorType::System => "[System]  ",
            ActorType::Provider => "[Provider]",
        };

        let actor = self
            .actor_id
            .as_ref()
            .map(|id| format!(" ({})", id))
            .unwrap_or_default();

        format!(
            "{} {}{} {} {} in org {}",
            timestamp,
            actor_type,
            actor,
            Self::action_to_verb_phrase(&self.action, &self.target_type),
            self.target_id,
            self.org_id
        )
    }

    /// "revoke_benefit" -> "revoked benefit"
    fn action_to_verb_phrase(action: &str, target_type: &str) -> String {
        let parts: Vec<&str> = action.split('_').collect();
        let verb = Self::to_past_tense(parts[0]);
        if parts.len() > 1 {
            format!("{} {}", verb, parts[1..].join(" "))
        } else {
            format!("{} {}", verb, target_type)
        }
    }

    fn to_past_tense(verb: &str) -> &str {
        match verb {
            "request" => "requested",
            "approve" => "approved",
            "revoke" => "revoked",
            "refund" => "refunded",
            "reprocess" => "reprocessed",
            "seed" => "seeded",
            other => other,
        }
    }
}
