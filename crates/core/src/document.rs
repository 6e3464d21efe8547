//! Typed view over the free-form `structured_data` order document.
//!
//! The document is stored as JSON. Known sections are typed; anything else is
//! kept in `extra` so a round trip never drops keys written by other tools.
//! Dotted paths (`schedule.measurement.date`) address values in the JSON form
//! and back the audit trail's `target` field.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::event::OrderEventType;
use crate::domain::user::UserId;
use crate::permissions::Domain;
use crate::workflow::quest::Quest;
use crate::workflow::stage::Stage;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredData {
    #[serde(default)]
    pub workflow: WorkflowState,
    #[serde(default)]
    pub quests: Vec<Quest>,
    #[serde(default)]
    pub flags: Flags,
    #[serde(default)]
    pub assignments: BTreeMap<Domain, Vec<UserId>>,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub stage: Option<Stage>,
    pub stage_updated_at: Option<DateTime<Utc>>,
    pub stage_updated_by: Option<UserId>,
    #[serde(default)]
    pub history: Vec<StageHistoryEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageHistoryEntry {
    pub from: Option<Stage>,
    pub to: Stage,
    pub at: DateTime<Utc>,
    pub by: Option<UserId>,
    pub reason: Option<String>,
    #[serde(default)]
    pub forced: bool,
    pub reverted_event_id: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    #[serde(default)]
    pub urgent: bool,
    pub urgent_reason: Option<String>,
    pub urgent_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub measurement: ScheduleSlot,
    #[serde(default)]
    pub construction: ScheduleSlot,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Measurement,
    Construction,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Measurement => "measurement",
            Self::Construction => "construction",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "measurement" | "measure" => Some(Self::Measurement),
            "construction" => Some(Self::Construction),
            _ => None,
        }
    }

    pub fn date_path(&self) -> &'static str {
        match self {
            Self::Measurement => "schedule.measurement.date",
            Self::Construction => "schedule.construction.date",
        }
    }

    pub fn event_type(&self) -> OrderEventType {
        match self {
            Self::Measurement => OrderEventType::MeasurementDateChanged,
            Self::Construction => OrderEventType::ConstructionDateChanged,
        }
    }

    pub fn domain(&self) -> Domain {
        match self {
            Self::Measurement => Domain::Measurement,
            Self::Construction => Domain::Construction,
        }
    }

    /// Stage after which reminders for this slot stop being useful.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Measurement => Stage::Measure,
            Self::Construction => Stage::Construction,
        }
    }
}

pub const STAGE_PATH: &str = "workflow.stage";
pub const URGENT_PATH: &str = "flags.urgent";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document path must not be empty")]
    EmptyPath,
    #[error("document path `{path}` crosses non-object value at `{segment}`")]
    NotAnObject { path: String, segment: String },
    #[error("document no longer matches its schema: {0}")]
    InvalidShape(String),
}

impl StructuredData {
    pub fn current_stage(&self) -> Option<Stage> {
        self.workflow.stage
    }

    pub fn assignees(&self, domain: Domain) -> &[UserId] {
        self.assignments.get(&domain).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn schedule_slot(&self, kind: ScheduleKind) -> &ScheduleSlot {
        match kind {
            ScheduleKind::Measurement => &self.schedule.measurement,
            ScheduleKind::Construction => &self.schedule.construction,
        }
    }

    pub fn schedule_slot_mut(&mut self, kind: ScheduleKind) -> &mut ScheduleSlot {
        match kind {
            ScheduleKind::Measurement => &mut self.schedule.measurement,
            ScheduleKind::Construction => &mut self.schedule.construction,
        }
    }

    pub fn open_quest(&self, stage: Stage) -> Option<&Quest> {
        self.quests.iter().rev().find(|quest| quest.stage == stage && quest.is_open())
    }

    pub fn open_quest_mut(&mut self, stage: Stage) -> Option<&mut Quest> {
        self.quests.iter_mut().rev().find(|quest| quest.stage == stage && quest.is_open())
    }

    pub fn to_value(&self) -> Result<Value, DocumentError> {
        serde_json::to_value(self).map_err(|error| DocumentError::InvalidShape(error.to_string()))
    }

    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        serde_json::from_value(value).map_err(|error| DocumentError::InvalidShape(error.to_string()))
    }

    /// Current JSON value at `path`; missing keys read as `null`.
    pub fn value_at(&self, path: &str) -> Result<Value, DocumentError> {
        let root = self.to_value()?;
        Ok(get_path(&root, path).cloned().unwrap_or(Value::Null))
    }

    /// Writes `value` at `path` and re-validates the typed view.
    pub fn apply_path(&mut self, path: &str, value: Value) -> Result<(), DocumentError> {
        let mut root = self.to_value()?;
        set_path(&mut root, path, value)?;
        *self = Self::from_value(root)?;
        Ok(())
    }
}

fn segments(path: &str) -> Result<Vec<&str>, DocumentError> {
    let parts: Vec<&str> = path.split('.').map(str::trim).collect();
    if parts.iter().any(|part| part.is_empty()) {
        return Err(DocumentError::EmptyPath);
    }
    Ok(parts)
}

pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let parts = segments(path).ok()?;
    parts.into_iter().try_fold(root, |node, key| node.as_object()?.get(key))
}

/// Sets `value` at `path`, creating intermediate objects as needed.
///
/// A `null` value removes the key, so "missing" and "null" stay equivalent
/// for readers of the typed view.
pub fn set_path(root: &mut Value, path: &str, value: Value) -> Result<(), DocumentError> {
    let parts = segments(path)?;
    let Some((last, parents)) = parts.split_last() else {
        return Err(DocumentError::EmptyPath);
    };

    let not_an_object = |segment: &str| DocumentError::NotAnObject {
        path: path.to_string(),
        segment: segment.to_string(),
    };

    let mut object = root.as_object_mut().ok_or_else(|| not_an_object("$"))?;
    for segment in parents {
        let child =
            object.entry((*segment).to_string()).or_insert_with(|| Value::Object(Map::new()));
        if child.is_null() {
            *child = Value::Object(Map::new());
        }
        object = child.as_object_mut().ok_or_else(|| not_an_object(segment))?;
    }

    if value.is_null() {
        object.remove(*last);
    } else {
        object.insert((*last).to_string(), value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::{json, Value};

    use super::{get_path, set_path, DocumentError, ScheduleKind, StructuredData, STAGE_PATH};
    use crate::permissions::Domain;
    use crate::workflow::stage::Stage;

    #[test]
    fn unknown_keys_survive_a_round_trip() {
        let raw = json!({
            "workflow": {"stage": "DRAWING"},
            "customer_memo": {"floor": 3},
            "flags": {"urgent": true}
        });

        let data = StructuredData::from_value(raw).expect("decode");
        assert_eq!(data.current_stage(), Some(Stage::Drawing));
        assert!(data.flags.urgent);

        let encoded = data.to_value().expect("encode");
        assert_eq!(encoded["customer_memo"], json!({"floor": 3}));
    }

    #[test]
    fn set_path_creates_intermediate_objects() {
        let mut root = json!({});
        set_path(&mut root, "schedule.measurement.date", json!("2026-10-22")).expect("set");
        assert_eq!(get_path(&root, "schedule.measurement.date"), Some(&json!("2026-10-22")));
    }

    #[test]
    fn set_path_null_removes_key() {
        let mut root = json!({"flags": {"urgent_reason": "vip"}});
        set_path(&mut root, "flags.urgent_reason", Value::Null).expect("set");
        assert_eq!(root, json!({"flags": {}}));
    }

    #[test]
    fn set_path_rejects_scalar_parents() {
        let mut root = json!({"workflow": "legacy"});
        let error = set_path(&mut root, "workflow.stage", json!("CS")).expect_err("scalar parent");
        assert!(matches!(error, DocumentError::NotAnObject { ref segment, .. } if segment == "workflow"));
        assert_eq!(get_path(&root, ""), None);
    }

    #[test]
    fn apply_path_validates_typed_shape() {
        let mut data = StructuredData::default();
        data.apply_path(STAGE_PATH, json!("CONFIRM")).expect("valid stage");
        assert_eq!(data.current_stage(), Some(Stage::Confirm));

        let error = data.apply_path(STAGE_PATH, json!("SHIPPED")).expect_err("unknown stage");
        assert!(matches!(error, DocumentError::InvalidShape(_)));
        assert_eq!(data.current_stage(), Some(Stage::Confirm));
    }

    #[test]
    fn value_at_reads_missing_keys_as_null() {
        let mut data = StructuredData::default();
        assert_eq!(data.value_at(ScheduleKind::Construction.date_path()).expect("read"), Value::Null);

        data.schedule.construction.date = NaiveDate::from_ymd_opt(2026, 11, 2);
        assert_eq!(
            data.value_at(ScheduleKind::Construction.date_path()).expect("read"),
            json!("2026-11-02")
        );
    }

    #[test]
    fn assignments_are_keyed_by_domain_code() {
        let mut data = StructuredData::default();
        data.apply_path(&Domain::Drawing.assignment_path(), json!([4, 5])).expect("assign");
        assert_eq!(data.assignees(Domain::Drawing).len(), 2);
        assert!(data.assignees(Domain::Sales).is_empty());
    }
}
