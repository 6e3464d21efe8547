use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::order::OrderId;
use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityAction {
    PermissionDenied,
    ForcedTransition,
    EmergencyOverride,
    ChangeReverted,
}

impl SecurityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ForcedTransition => "FORCED_TRANSITION",
            Self::EmergencyOverride => "EMERGENCY_OVERRIDE",
            Self::ChangeReverted => "CHANGE_REVERTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PERMISSION_DENIED" => Some(Self::PermissionDenied),
            "FORCED_TRANSITION" => Some(Self::ForcedTransition),
            "EMERGENCY_OVERRIDE" => Some(Self::EmergencyOverride),
            "CHANGE_REVERTED" => Some(Self::ChangeReverted),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSecurityLog {
    pub user_id: Option<UserId>,
    pub action: SecurityAction,
    pub order_id: Option<OrderId>,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl NewSecurityLog {
    pub fn new(
        user_id: Option<UserId>,
        action: SecurityAction,
        order_id: Option<OrderId>,
        detail: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self { user_id, action, order_id, detail: detail.into(), created_at }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityLog {
    pub id: i64,
    pub user_id: Option<UserId>,
    pub action: SecurityAction,
    pub order_id: Option<OrderId>,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}
