use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

pub const PERM_OPS_WRITE: &str = "admin.ops.write";
pub const PERM_FINANCE_WRITE: &str = "admin.finance.write";
pub const PERM_CONTENT_RELEASE: &str = "admin.content.release";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Executing,
    Executed,
    Failed,
}

impl ApprovalStatus {
    /// Execution already happened or is happening elsewhere.
    pub fn is_terminal_or_running(self) -> bool {
        matches!(self, Self::Executing | Self::Executed)
    }

    /// A reviewer may approve a pending request or re-approve a failed one.
    pub fn can_approve(self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalType {
    ManualGrant,
    RevokeBenefit,
    Refund,
    ReprocessEvent,
    RollbackRelease,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminApproval {
    pub id: String,
    pub org_id: i64,
    #[serde(rename = "type")]
    pub approval_type: ApprovalType,
    pub status: ApprovalStatus,
    pub payload: serde_json::Value,
    pub reason: String,
    pub correlation_id: Option<String>,
    pub requested_by: Option<String>,
    pub approved_by: Option<String>,
    pub retry_count: i64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub executed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateApproval {
    pub org_id: i64,
    #[serde(rename = "type")]
    pub approval_type: ApprovalType,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub reason: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub requested_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub permissions: Vec<String>,
    pub is_active: bool,
    pub created_at: i64,
}

impl AdminUser {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.is_active && self.permissions.iter().any(|p| p == permission)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAdminUser {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRelease {
    pub id: String,
    pub action: String,
    pub region: String,
    pub locale: String,
    pub dir_alias: String,
    pub from_version_id: Option<String>,
    pub to_version_id: Option<String>,
    pub from_pack_id: Option<String>,
    pub to_pack_id: Option<String>,
    pub status: String,
    pub message: Option<String>,
    pub created_by: String,
    pub created_at: i64,
}
