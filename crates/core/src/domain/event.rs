use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::order::OrderId;
use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderEventId(pub i64);

impl std::fmt::Display for OrderEventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEventType {
    OrderCreated,
    StageChanged,
    UrgentChanged,
    MeasurementDateChanged,
    ConstructionDateChanged,
    AssignmentChanged,
    QuestCreated,
    QuestApproved,
    QuestApprovalRevoked,
    QuestCompleted,
    QuestOverridden,
    TaskCreated,
    TaskStatusChanged,
    ChangeReverted,
}

impl OrderEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderCreated => "ORDER_CREATED",
            Self::StageChanged => "STAGE_CHANGED",
            Self::UrgentChanged => "URGENT_CHANGED",
            Self::MeasurementDateChanged => "MEASUREMENT_DATE_CHANGED",
            Self::ConstructionDateChanged => "CONSTRUCTION_DATE_CHANGED",
            Self::AssignmentChanged => "ASSIGNMENT_CHANGED",
            Self::QuestCreated => "QUEST_CREATED",
            Self::QuestApproved => "QUEST_APPROVED",
            Self::QuestApprovalRevoked => "QUEST_APPROVAL_REVOKED",
            Self::QuestCompleted => "QUEST_COMPLETED",
            Self::QuestOverridden => "QUEST_OVERRIDDEN",
            Self::TaskCreated => "TASK_CREATED",
            Self::TaskStatusChanged => "TASK_STATUS_CHANGED",
            Self::ChangeReverted => "CHANGE_REVERTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        const ALL: [OrderEventType; 14] = [
            OrderEventType::OrderCreated,
            OrderEventType::StageChanged,
            OrderEventType::UrgentChanged,
            OrderEventType::MeasurementDateChanged,
            OrderEventType::ConstructionDateChanged,
            OrderEventType::AssignmentChanged,
            OrderEventType::QuestCreated,
            OrderEventType::QuestApproved,
            OrderEventType::QuestApprovalRevoked,
            OrderEventType::QuestCompleted,
            OrderEventType::QuestOverridden,
            OrderEventType::TaskCreated,
            OrderEventType::TaskStatusChanged,
            OrderEventType::ChangeReverted,
        ];
        let normalized = value.trim().to_ascii_uppercase();
        ALL.into_iter().find(|event_type| event_type.as_str() == normalized)
    }

    /// Event types whose payload describes a single document write.
    pub fn is_revertible(&self) -> bool {
        matches!(
            self,
            Self::StageChanged
                | Self::UrgentChanged
                | Self::MeasurementDateChanged
                | Self::ConstructionDateChanged
                | Self::AssignmentChanged
        )
    }
}

impl std::fmt::Display for OrderEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Dotted document path the event wrote to.
    pub target: Option<String>,
    #[serde(default)]
    pub before: Value,
    #[serde(default)]
    pub after: Value,
    pub reason: Option<String>,
    pub reverted_event_id: Option<OrderEventId>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub detail: Map<String, Value>,
}

impl EventPayload {
    pub fn change(target: impl Into<String>, before: Value, after: Value) -> Self {
        Self { target: Some(target.into()), before, after, ..Self::default() }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewOrderEvent {
    pub order_id: OrderId,
    pub event_type: OrderEventType,
    pub payload: EventPayload,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl NewOrderEvent {
    pub fn new(
        order_id: OrderId,
        event_type: OrderEventType,
        payload: EventPayload,
        created_by: Option<UserId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self { order_id, event_type, payload, created_by, created_at }
    }

    pub fn into_event(self, id: OrderEventId) -> OrderEvent {
        OrderEvent {
            id,
            order_id: self.order_id,
            event_type: self.event_type,
            payload: self.payload,
            created_by: self.created_by,
            created_at: self.created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub id: OrderEventId,
    pub order_id: OrderId,
    pub event_type: OrderEventType,
    pub payload: EventPayload,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{EventPayload, OrderEventType};

    #[test]
    fn only_document_writes_are_revertible() {
        assert!(OrderEventType::StageChanged.is_revertible());
        assert!(OrderEventType::AssignmentChanged.is_revertible());
        assert!(!OrderEventType::QuestApproved.is_revertible());
        assert!(!OrderEventType::ChangeReverted.is_revertible());
    }

    #[test]
    fn event_type_parses_storage_code() {
        assert_eq!(
            OrderEventType::parse("measurement_date_changed"),
            Some(OrderEventType::MeasurementDateChanged)
        );
        assert_eq!(OrderEventType::parse("STAGE_MOVED"), None);
    }

    #[test]
    fn null_before_value_survives_payload_encoding() {
        let payload = EventPayload::change("schedule.measurement.date", json!(null), json!("2026-10-22"));
        let encoded = serde_json::to_value(&payload).expect("encode");
        assert_eq!(encoded["before"], json!(null));
        assert!(encoded.get("detail").is_none());

        let decoded: EventPayload = serde_json::from_value(encoded).expect("decode");
        assert_eq!(decoded, payload);
    }
}
