//! Rule-created follow-up tasks.
//!
//! Every rule yields a stable `sla_key`; a task is proposed only when no task
//! with that key exists for the order yet, so sweeps can run repeatedly.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::document::ScheduleKind;
use crate::domain::order::Order;
use crate::domain::task::NewOrderTask;
use crate::domain::user::Team;
use crate::workflow::stage::Stage;

pub const URGENT_FOLLOWUP: &str = "URGENT_FOLLOWUP";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaPolicy {
    pub drawing_sla_hours: u32,
    /// Days-before thresholds for schedule reminders, e.g. D-4, D-3, D-2.
    pub reminder_days: Vec<u32>,
}

impl Default for SlaPolicy {
    fn default() -> Self {
        Self { drawing_sla_hours: 48, reminder_days: vec![4, 3, 2] }
    }
}

impl SlaPolicy {
    pub fn drawing_key(&self, entered_at: DateTime<Utc>) -> String {
        format!("SLA_DRAWING_{}H:{}", self.drawing_sla_hours, timestamp_key(entered_at))
    }
}

pub fn urgent_key(flagged_at: DateTime<Utc>) -> String {
    format!("{URGENT_FOLLOWUP}:{}", timestamp_key(flagged_at))
}

pub fn reminder_key(kind: ScheduleKind, threshold: u32, date: NaiveDate) -> String {
    format!("SLA_{}_D{threshold}:{}", kind.as_str().to_ascii_uppercase(), date.format("%Y-%m-%d"))
}

fn timestamp_key(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Tasks the rules call for that are not yet covered by `existing_keys`.
pub fn evaluate(
    order: &Order,
    existing_keys: &BTreeSet<String>,
    now: DateTime<Utc>,
    today: NaiveDate,
    policy: &SlaPolicy,
) -> Vec<NewOrderTask> {
    let stage = order.stage();
    if stage.is_terminal() {
        return Vec::new();
    }

    let data = &order.structured_data;
    let mut proposed: Vec<NewOrderTask> = Vec::new();
    let mut propose = |key: String, title: String, owner: Team, due: NaiveDate| {
        if existing_keys.contains(&key) || proposed.iter().any(|task| task.sla_key.as_ref() == Some(&key)) {
            return;
        }
        proposed.push(NewOrderTask {
            order_id: order.id,
            title,
            description: None,
            owner_team: Some(owner),
            owner_user_id: None,
            due_date: Some(due),
            sla_key: Some(key),
            created_by: None,
            created_at: now,
        });
    };

    if data.flags.urgent {
        let flagged_at = data.flags.urgent_at.unwrap_or(order.updated_at);
        let title = match data.flags.urgent_reason.as_deref() {
            Some(reason) => format!("Urgent follow-up: {reason}"),
            None => "Urgent follow-up".to_string(),
        };
        propose(urgent_key(flagged_at), title, Team::Cs, today);
    }

    for kind in [ScheduleKind::Measurement, ScheduleKind::Construction] {
        let Some(date) = data.schedule_slot(kind).date else {
            continue;
        };
        if stage.is_past(kind.stage()) {
            continue;
        }
        let days_until = (date - today).num_days();
        if days_until < 0 {
            continue;
        }
        for threshold in &policy.reminder_days {
            if days_until <= i64::from(*threshold) {
                propose(
                    reminder_key(kind, *threshold, date),
                    format!("{} on {date} (D-{threshold})", reminder_label(kind)),
                    kind.domain().owner_team(),
                    today,
                );
            }
        }
    }

    if stage == Stage::Drawing && data.open_quest(Stage::Drawing).is_some() {
        if let Some(entered_at) = data.workflow.stage_updated_at {
            let deadline = entered_at + Duration::hours(i64::from(policy.drawing_sla_hours));
            if now >= deadline {
                propose(
                    policy.drawing_key(entered_at),
                    format!("Drawing open longer than {}h", policy.drawing_sla_hours),
                    Team::Drawing,
                    today,
                );
            }
        }
    }

    proposed
}

fn reminder_label(kind: ScheduleKind) -> &'static str {
    match kind {
        ScheduleKind::Measurement => "Measurement",
        ScheduleKind::Construction => "Construction",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    use super::{evaluate, reminder_key, SlaPolicy};
    use crate::document::ScheduleKind;
    use crate::domain::order::{Order, OrderId};
    use crate::domain::user::{Role, Team, User, UserId};
    use crate::workflow::engine::{TransitionRequest, WorkflowEngine};
    use crate::workflow::stage::Stage;

    fn manager() -> User {
        User { id: UserId(1), name: "boss".to_string(), role: Role::Manager, team: None, active: true }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).expect("date")
    }

    fn order_at(stage: Stage) -> Order {
        let engine = WorkflowEngine::default();
        let mut order = Order::new(OrderId(3), "Customer", Utc::now());
        engine.initialize(&mut order, &manager(), Utc::now()).expect("initialize");
        if stage != Stage::Received {
            engine
                .transition(&mut order, &manager(), &TransitionRequest::forced(stage, "setup"), Utc::now())
                .expect("forced");
        }
        order
    }

    fn keys(tasks: &[crate::domain::task::NewOrderTask]) -> Vec<String> {
        tasks.iter().filter_map(|task| task.sla_key.clone()).collect()
    }

    #[test]
    fn reminders_follow_crossed_thresholds() {
        let mut order = order_at(Stage::Received);
        order.structured_data.schedule.measurement.date = Some(day(23));

        let tasks = evaluate(&order, &BTreeSet::new(), Utc::now(), day(20), &SlaPolicy::default());

        assert_eq!(
            keys(&tasks),
            vec![
                reminder_key(ScheduleKind::Measurement, 4, day(23)),
                reminder_key(ScheduleKind::Measurement, 3, day(23)),
            ]
        );
        assert_eq!(tasks[0].owner_team, Some(Team::Measure));
        assert_eq!(tasks[0].sla_key.as_deref(), Some("SLA_MEASUREMENT_D4:2026-10-23"));
    }

    #[test]
    fn existing_keys_are_not_recreated() {
        let mut order = order_at(Stage::Received);
        order.structured_data.schedule.construction.date = Some(day(22));

        let first = evaluate(&order, &BTreeSet::new(), Utc::now(), day(20), &SlaPolicy::default());
        let existing: BTreeSet<String> = keys(&first).into_iter().collect();
        let second = evaluate(&order, &existing, Utc::now(), day(20), &SlaPolicy::default());

        assert_eq!(first.len(), 3);
        assert!(second.is_empty());
    }

    #[test]
    fn passed_stage_and_completed_orders_get_nothing() {
        let mut order = order_at(Stage::Drawing);
        order.structured_data.schedule.measurement.date = Some(day(21));
        assert!(evaluate(&order, &BTreeSet::new(), Utc::now(), day(20), &SlaPolicy::default()).is_empty());

        let mut done = order_at(Stage::Completed);
        done.structured_data.flags.urgent = true;
        assert!(evaluate(&done, &BTreeSet::new(), Utc::now(), day(20), &SlaPolicy::default()).is_empty());
    }

    #[test]
    fn urgent_flag_creates_one_cs_followup() {
        let mut order = order_at(Stage::Received);
        order.structured_data.flags.urgent = true;
        order.structured_data.flags.urgent_at = Some(Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap());

        let tasks = evaluate(&order, &BTreeSet::new(), Utc::now(), day(19), &SlaPolicy::default());

        assert_eq!(keys(&tasks), vec!["URGENT_FOLLOWUP:2026-10-19T09:00:00Z".to_string()]);
        assert_eq!(tasks[0].owner_team, Some(Team::Cs));
        assert_eq!(tasks[0].due_date, Some(day(19)));
    }

    #[test]
    fn stale_drawing_gets_a_single_sla_task() {
        let order = order_at(Stage::Drawing);
        let entered = order.structured_data.workflow.stage_updated_at.expect("entered");
        let policy = SlaPolicy::default();

        let early = evaluate(&order, &BTreeSet::new(), entered + Duration::hours(47), day(20), &policy);
        assert!(early.is_empty());

        let late = evaluate(&order, &BTreeSet::new(), entered + Duration::hours(49), day(20), &policy);
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].owner_team, Some(Team::Drawing));
        assert!(late[0].sla_key.as_deref().is_some_and(|key| key.starts_with("SLA_DRAWING_48H:")));
    }
}
