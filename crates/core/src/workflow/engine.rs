use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::document::{ScheduleKind, StageHistoryEntry, STAGE_PATH, URGENT_PATH};
use crate::domain::event::{EventPayload, NewOrderEvent, OrderEventId, OrderEventType};
use crate::domain::order::Order;
use crate::domain::security::{NewSecurityLog, SecurityAction};
use crate::domain::user::{Team, User, UserId};
use crate::permissions::{can_modify_domain, Domain};
use crate::workflow::quest::{template_for, ApprovalMode, Quest, QuestStatus};
use crate::workflow::stage::{classify, Stage, TransitionKind};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("user {user_id} may not modify {domain}")]
    PermissionDenied { user_id: UserId, domain: Domain },
    #[error("user {user_id} needs a manager role for `{operation}`")]
    ManagerRequired { user_id: UserId, operation: &'static str },
    #[error("user {user_id} does not belong to team {team:?}")]
    NotTeamMember { user_id: UserId, team: Team },
    #[error("user {user_id} is not an assignee of the {stage} quest")]
    NotAssignee { user_id: UserId, stage: Stage },
    #[error("order workflow is already initialized at {stage}")]
    AlreadyInitialized { stage: Stage },
    #[error("invalid stage transition from {from} to {to}")]
    InvalidTransition { from: Stage, to: Stage },
    #[error("moving from {from} to {to} must be forced by a manager")]
    ForceRequired { from: Stage, to: Stage },
    #[error(
        "quest for {stage} is incomplete: missing teams {missing_teams:?}, missing assignees {missing_assignees:?}"
    )]
    QuestIncomplete { stage: Stage, missing_teams: Vec<Team>, missing_assignees: Vec<UserId> },
    #[error("`{operation}` requires a non-empty reason")]
    ReasonRequired { operation: &'static str },
    #[error("no open quest for {stage}")]
    NoOpenQuest { stage: Stage },
    #[error("quest for {stage} is closed")]
    QuestClosed { stage: Stage },
    #[error("quest for {stage} uses {mode:?} approval")]
    WrongApprovalMode { stage: Stage, mode: ApprovalMode },
    #[error("team {team:?} is not required by the {stage} quest")]
    TeamNotRequired { stage: Stage, team: Team },
    #[error("approval for the {stage} quest was already recorded")]
    AlreadyApproved { stage: Stage },
    #[error("team {team:?} has not approved the {stage} quest")]
    NotApproved { stage: Stage, team: Team },
}

impl WorkflowError {
    /// Errors caused by the actor lacking rights, as opposed to bad input.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. }
                | Self::ManagerRequired { .. }
                | Self::NotTeamMember { .. }
                | Self::NotAssignee { .. }
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub target: Option<Stage>,
    #[serde(default)]
    pub force: bool,
    pub reason: Option<String>,
}

impl TransitionRequest {
    pub fn to(target: Stage) -> Self {
        Self { target: Some(target), force: false, reason: None }
    }

    pub fn forced(target: Stage, reason: impl Into<String>) -> Self {
        Self { target: Some(target), force: true, reason: Some(reason.into()) }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: Stage,
    pub to: Stage,
    pub kind: TransitionKind,
    pub forced: bool,
}

/// Everything one workflow operation produced besides the document change.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkflowOutcome {
    pub transition: Option<StageTransition>,
    pub events: Vec<NewOrderEvent>,
    pub security_logs: Vec<NewSecurityLog>,
    pub completed_quests: Vec<Stage>,
}

impl WorkflowOutcome {
    pub fn is_noop(&self) -> bool {
        self.events.is_empty() && self.security_logs.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkflowPolicy {
    /// Move to the next main-line stage as soon as its quest completes.
    pub auto_advance: bool,
}

#[derive(Clone, Debug, Default)]
pub struct WorkflowEngine {
    policy: WorkflowPolicy,
}

impl WorkflowEngine {
    pub fn new(policy: WorkflowPolicy) -> Self {
        Self { policy }
    }

    /// Puts a fresh order at `Received` and opens its first quest.
    pub fn initialize(
        &self,
        order: &mut Order,
        actor: &User,
        now: DateTime<Utc>,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        if let Some(stage) = order.structured_data.current_stage() {
            return Err(WorkflowError::AlreadyInitialized { stage });
        }

        let mut outcome = WorkflowOutcome::default();
        self.enter_stage(order, Some(actor.id), Stage::Received, None, false, None, now, &mut outcome);
        outcome.events.insert(
            0,
            NewOrderEvent::new(
                order.id,
                OrderEventType::OrderCreated,
                EventPayload::default()
                    .with_detail("stage", Stage::Received.as_str())
                    .with_detail("customer_name", order.customer_name.clone()),
                Some(actor.id),
                now,
            ),
        );
        Ok(outcome)
    }

    pub fn transition(
        &self,
        order: &mut Order,
        actor: &User,
        request: &TransitionRequest,
        now: DateTime<Utc>,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let from = order.stage();
        let to = request.target.unwrap_or(from);
        let kind = classify(from, to).ok_or(WorkflowError::InvalidTransition { from, to })?;

        let permitted = match kind {
            TransitionKind::EnterAs => {
                can_modify_domain(actor, order, Domain::As)
                    || can_modify_domain(actor, order, from.domain())
            }
            _ => can_modify_domain(actor, order, from.domain()),
        };
        if !permitted {
            return Err(WorkflowError::PermissionDenied { user_id: actor.id, domain: from.domain() });
        }

        let reason = normalize_reason(request.reason.as_deref());
        if request.force {
            if !actor.is_manager() {
                return Err(WorkflowError::ManagerRequired {
                    user_id: actor.id,
                    operation: "force_transition",
                });
            }
            if reason.is_none() {
                return Err(WorkflowError::ReasonRequired { operation: "force_transition" });
            }
        } else {
            if !kind.is_regular() {
                return Err(WorkflowError::ForceRequired { from, to });
            }
            if kind.is_gated() {
                if let Some(quest) = order.structured_data.open_quest(from) {
                    let evaluation = quest.evaluate();
                    if !evaluation.all_approved {
                        return Err(WorkflowError::QuestIncomplete {
                            stage: from,
                            missing_teams: evaluation.missing_teams,
                            missing_assignees: evaluation.missing_assignees,
                        });
                    }
                }
            }
        }

        let mut outcome = WorkflowOutcome::default();
        let skipped = self.enter_stage(
            order,
            Some(actor.id),
            to,
            reason.clone(),
            request.force,
            None,
            now,
            &mut outcome,
        );

        let mut payload = EventPayload::change(STAGE_PATH, stage_value(from), stage_value(to))
            .with_reason(reason.clone())
            .with_detail("kind", transition_kind_code(kind))
            .with_detail("forced", request.force);
        if !skipped.is_empty() {
            payload = payload.with_detail(
                "skipped_quests",
                skipped.iter().map(|stage| Value::from(stage.as_str())).collect::<Vec<_>>(),
            );
        }
        outcome.events.insert(
            0,
            NewOrderEvent::new(order.id, OrderEventType::StageChanged, payload, Some(actor.id), now),
        );

        if request.force {
            outcome.security_logs.push(NewSecurityLog::new(
                Some(actor.id),
                SecurityAction::ForcedTransition,
                Some(order.id),
                format!("{from} -> {to}: {}", reason.unwrap_or_default()),
                now,
            ));
        }
        outcome.transition = Some(StageTransition { from, to, kind, forced: request.force });
        Ok(outcome)
    }

    pub fn approve_team(
        &self,
        order: &mut Order,
        actor: &User,
        team: Team,
        now: DateTime<Utc>,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        if !(actor.is_manager() || actor.belongs_to(team)) {
            return Err(WorkflowError::NotTeamMember { user_id: actor.id, team });
        }

        let stage = order.stage();
        let quest = order
            .structured_data
            .open_quest_mut(stage)
            .ok_or(WorkflowError::NoOpenQuest { stage })?;
        let completed = quest.approve_team(team, actor.id, now)?;
        let quest_id = quest.id.clone();

        let mut outcome = WorkflowOutcome::default();
        outcome.events.push(NewOrderEvent::new(
            order.id,
            OrderEventType::QuestApproved,
            quest_detail(&quest_id, stage).with_detail("team", team.as_str()),
            Some(actor.id),
            now,
        ));
        if completed {
            self.after_quest_completed(order, Some(actor.id), stage, &quest_id, now, &mut outcome);
        }
        Ok(outcome)
    }

    pub fn revoke_team_approval(
        &self,
        order: &mut Order,
        actor: &User,
        team: Team,
        now: DateTime<Utc>,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        if !(actor.is_manager() || actor.belongs_to(team)) {
            return Err(WorkflowError::NotTeamMember { user_id: actor.id, team });
        }

        let stage = order.stage();
        let quest = order
            .structured_data
            .quests
            .iter_mut()
            .rev()
            .find(|quest| quest.stage == stage && quest.status != QuestStatus::Skipped)
            .ok_or(WorkflowError::NoOpenQuest { stage })?;
        quest.revoke_team(team)?;

        let mut outcome = WorkflowOutcome::default();
        outcome.events.push(NewOrderEvent::new(
            order.id,
            OrderEventType::QuestApprovalRevoked,
            quest_detail(&quest.id, stage).with_detail("team", team.as_str()),
            Some(actor.id),
            now,
        ));
        Ok(outcome)
    }

    pub fn approve_as_assignee(
        &self,
        order: &mut Order,
        actor: &User,
        now: DateTime<Utc>,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let stage = order.stage();
        let quest = order
            .structured_data
            .open_quest_mut(stage)
            .ok_or(WorkflowError::NoOpenQuest { stage })?;
        let completed = quest.approve_assignee(actor.id, now)?;
        let quest_id = quest.id.clone();

        let mut outcome = WorkflowOutcome::default();
        outcome.events.push(NewOrderEvent::new(
            order.id,
            OrderEventType::QuestApproved,
            quest_detail(&quest_id, stage).with_detail("assignee", actor.id.0),
            Some(actor.id),
            now,
        ));
        if completed {
            self.after_quest_completed(order, Some(actor.id), stage, &quest_id, now, &mut outcome);
        }
        Ok(outcome)
    }

    pub fn emergency_override(
        &self,
        order: &mut Order,
        actor: &User,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        if !actor.is_manager() {
            return Err(WorkflowError::ManagerRequired {
                user_id: actor.id,
                operation: "emergency_override",
            });
        }

        let stage = order.stage();
        let quest = order
            .structured_data
            .open_quest_mut(stage)
            .ok_or(WorkflowError::NoOpenQuest { stage })?;
        quest.emergency_override(actor.id, reason, now)?;
        let quest_id = quest.id.clone();
        let reason = reason.trim().to_string();

        let mut outcome = WorkflowOutcome::default();
        outcome.events.push(NewOrderEvent::new(
            order.id,
            OrderEventType::QuestOverridden,
            quest_detail(&quest_id, stage).with_reason(Some(reason.clone())),
            Some(actor.id),
            now,
        ));
        outcome.security_logs.push(NewSecurityLog::new(
            Some(actor.id),
            SecurityAction::EmergencyOverride,
            Some(order.id),
            format!("{stage} quest overridden: {reason}"),
            now,
        ));
        self.after_quest_completed(order, Some(actor.id), stage, &quest_id, now, &mut outcome);
        Ok(outcome)
    }

    pub fn set_urgent(
        &self,
        order: &mut Order,
        actor: &User,
        urgent: bool,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        if !(can_modify_domain(actor, order, Domain::Sales)
            || can_modify_domain(actor, order, Domain::Cs))
        {
            return Err(WorkflowError::PermissionDenied { user_id: actor.id, domain: Domain::Sales });
        }

        let flags = &mut order.structured_data.flags;
        if flags.urgent == urgent {
            return Ok(WorkflowOutcome::default());
        }

        let reason = normalize_reason(reason);
        let before = flags.urgent;
        flags.urgent = urgent;
        flags.urgent_reason = if urgent { reason.clone() } else { None };
        flags.urgent_at = urgent.then_some(now);

        let mut outcome = WorkflowOutcome::default();
        outcome.events.push(NewOrderEvent::new(
            order.id,
            OrderEventType::UrgentChanged,
            EventPayload::change(URGENT_PATH, Value::Bool(before), Value::Bool(urgent))
                .with_reason(reason),
            Some(actor.id),
            now,
        ));
        Ok(outcome)
    }

    pub fn set_schedule_date(
        &self,
        order: &mut Order,
        actor: &User,
        kind: ScheduleKind,
        date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        if !(can_modify_domain(actor, order, kind.domain())
            || can_modify_domain(actor, order, Domain::Sales))
        {
            return Err(WorkflowError::PermissionDenied { user_id: actor.id, domain: kind.domain() });
        }

        let slot = order.structured_data.schedule_slot_mut(kind);
        if slot.date == date {
            return Ok(WorkflowOutcome::default());
        }
        let before = slot.date;
        slot.date = date;

        let mut outcome = WorkflowOutcome::default();
        outcome.events.push(NewOrderEvent::new(
            order.id,
            kind.event_type(),
            EventPayload::change(kind.date_path(), date_value(before), date_value(date)),
            Some(actor.id),
            now,
        ));
        Ok(outcome)
    }

    /// Replaces a domain's assignee list and refreshes open assignee quests.
    pub fn assign(
        &self,
        order: &mut Order,
        actor: &User,
        domain: Domain,
        user_ids: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        if !can_modify_domain(actor, order, domain) {
            return Err(WorkflowError::PermissionDenied { user_id: actor.id, domain });
        }

        let mut deduped: Vec<UserId> = Vec::with_capacity(user_ids.len());
        for id in user_ids {
            if !deduped.contains(id) {
                deduped.push(*id);
            }
        }

        let before = order.structured_data.assignees(domain).to_vec();
        if before == deduped {
            return Ok(WorkflowOutcome::default());
        }
        if deduped.is_empty() {
            order.structured_data.assignments.remove(&domain);
        } else {
            order.structured_data.assignments.insert(domain, deduped.clone());
        }

        let mut outcome = WorkflowOutcome::default();
        outcome.events.push(NewOrderEvent::new(
            order.id,
            OrderEventType::AssignmentChanged,
            EventPayload::change(domain.assignment_path(), ids_value(&before), ids_value(&deduped)),
            Some(actor.id),
            now,
        ));
        self.sync_quests(order, Some(actor.id), now, &mut outcome);
        Ok(outcome)
    }

    /// Writes the stage, appends history and reconciles quests.
    /// Returns the stages whose unfinished quests were skipped.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn enter_stage(
        &self,
        order: &mut Order,
        by: Option<UserId>,
        to: Stage,
        reason: Option<String>,
        forced: bool,
        reverted_event_id: Option<OrderEventId>,
        now: DateTime<Utc>,
        outcome: &mut WorkflowOutcome,
    ) -> Vec<Stage> {
        let workflow = &mut order.structured_data.workflow;
        let from = workflow.stage;
        workflow.stage = Some(to);
        workflow.stage_updated_at = Some(now);
        workflow.stage_updated_by = by;
        workflow.history.push(StageHistoryEntry {
            from,
            to,
            at: now,
            by,
            reason,
            forced,
            reverted_event_id: reverted_event_id.map(|id| id.0),
        });
        order.updated_at = now;

        self.sync_quests(order, by, now, outcome)
    }

    /// Closes quests left behind by a stage change and refreshes assignee
    /// snapshots. A snapshot that completes the current quest follows the
    /// normal completion path; otherwise the current quest is opened when
    /// missing.
    pub(crate) fn sync_quests(
        &self,
        order: &mut Order,
        by: Option<UserId>,
        now: DateTime<Utc>,
        outcome: &mut WorkflowOutcome,
    ) -> Vec<Stage> {
        let current = order.stage();
        let data = &mut order.structured_data;

        let mut skipped = Vec::new();
        for quest in data.quests.iter_mut().filter(|quest| quest.is_open() && quest.stage != current) {
            quest.status = QuestStatus::Skipped;
            skipped.push(quest.stage);
        }

        let mut refreshed = Vec::new();
        for quest in data
            .quests
            .iter_mut()
            .filter(|quest| quest.is_open() && quest.mode == ApprovalMode::Assignee)
        {
            let assignees = data.assignments.get(&quest.stage.domain()).cloned().unwrap_or_default();
            if quest.refresh_assignees(&assignees, now) {
                refreshed.push(quest.id.clone());
            }
        }
        if !refreshed.is_empty() {
            for quest_id in refreshed {
                self.after_quest_completed(order, by, current, &quest_id, now, outcome);
            }
            return skipped;
        }

        let data = &mut order.structured_data;
        if let Some(template) = template_for(current) {
            if data.open_quest(current).is_none() {
                let quest = Quest::from_template(template, data.assignees(current.domain()), now);
                outcome.events.push(NewOrderEvent::new(
                    order.id,
                    OrderEventType::QuestCreated,
                    quest_detail(&quest.id, current).with_detail("title", quest.title.clone()),
                    by,
                    now,
                ));
                data.quests.push(quest);
            }
        }

        skipped
    }

    fn after_quest_completed(
        &self,
        order: &mut Order,
        by: Option<UserId>,
        stage: Stage,
        quest_id: &str,
        now: DateTime<Utc>,
        outcome: &mut WorkflowOutcome,
    ) {
        outcome.events.push(NewOrderEvent::new(
            order.id,
            OrderEventType::QuestCompleted,
            quest_detail(quest_id, stage),
            by,
            now,
        ));
        outcome.completed_quests.push(stage);

        if !self.policy.auto_advance {
            return;
        }
        let Some(next) = stage.next() else {
            return;
        };

        let reason = Some("quest completed".to_string());
        self.enter_stage(order, by, next, reason.clone(), false, None, now, outcome);
        outcome.events.push(NewOrderEvent::new(
            order.id,
            OrderEventType::StageChanged,
            EventPayload::change(STAGE_PATH, stage_value(stage), stage_value(next))
                .with_reason(reason)
                .with_detail("kind", transition_kind_code(TransitionKind::Advance))
                .with_detail("auto", true),
            by,
            now,
        ));
        outcome.transition =
            Some(StageTransition { from: stage, to: next, kind: TransitionKind::Advance, forced: false });
    }
}

pub(crate) fn normalize_reason(reason: Option<&str>) -> Option<String> {
    reason.map(str::trim).filter(|value| !value.is_empty()).map(str::to_string)
}

pub(crate) fn stage_value(stage: Stage) -> Value {
    Value::String(stage.as_str().to_string())
}

fn date_value(date: Option<NaiveDate>) -> Value {
    date.map(|date| Value::String(date.format("%Y-%m-%d").to_string())).unwrap_or(Value::Null)
}

/// Assignee lists are removed when empty, so an empty list reads as `null`.
fn ids_value(ids: &[UserId]) -> Value {
    if ids.is_empty() {
        return Value::Null;
    }
    Value::Array(ids.iter().map(|id| Value::from(id.0)).collect())
}

fn quest_detail(quest_id: &str, stage: Stage) -> EventPayload {
    EventPayload::default().with_detail("quest_id", quest_id).with_detail("stage", stage.as_str())
}

fn transition_kind_code(kind: TransitionKind) -> &'static str {
    match kind {
        TransitionKind::Advance => "advance",
        TransitionKind::Skip => "skip",
        TransitionKind::Rollback => "rollback",
        TransitionKind::EnterAs => "enter_as",
        TransitionKind::ExitAs => "exit_as",
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use serde_json::json;

    use super::{TransitionRequest, WorkflowEngine, WorkflowError, WorkflowPolicy};
    use crate::document::ScheduleKind;
    use crate::domain::event::OrderEventType;
    use crate::domain::order::{Order, OrderId};
    use crate::domain::security::SecurityAction;
    use crate::domain::user::{Role, Team, User, UserId};
    use crate::permissions::Domain;
    use crate::workflow::quest::QuestStatus;
    use crate::workflow::stage::{Stage, TransitionKind};

    fn user(id: i64, role: Role, team: Option<Team>) -> User {
        User { id: UserId(id), name: format!("user-{id}"), role, team, active: true }
    }

    fn manager() -> User {
        user(1, Role::Manager, None)
    }

    fn fresh_order(engine: &WorkflowEngine) -> Order {
        let mut order = Order::new(OrderId(42), "Customer", Utc::now());
        engine.initialize(&mut order, &manager(), Utc::now()).expect("initialize");
        order
    }

    fn event_types(outcome: &super::WorkflowOutcome) -> Vec<OrderEventType> {
        outcome.events.iter().map(|event| event.event_type).collect()
    }

    #[test]
    fn initialize_opens_received_quest() {
        let engine = WorkflowEngine::default();
        let mut order = Order::new(OrderId(1), "Customer", Utc::now());
        let outcome = engine.initialize(&mut order, &manager(), Utc::now()).expect("initialize");

        assert_eq!(order.stage(), Stage::Received);
        assert_eq!(order.structured_data.workflow.history.len(), 1);
        assert_eq!(
            event_types(&outcome),
            vec![OrderEventType::OrderCreated, OrderEventType::QuestCreated]
        );

        let error = engine.initialize(&mut order, &manager(), Utc::now()).expect_err("twice");
        assert_eq!(error, WorkflowError::AlreadyInitialized { stage: Stage::Received });
    }

    #[test]
    fn advance_is_blocked_until_quest_completes() {
        let engine = WorkflowEngine::default();
        let mut order = fresh_order(&engine);
        let sales = user(5, Role::Staff, Some(Team::Sales));

        let error = engine
            .transition(&mut order, &sales, &TransitionRequest::to(Stage::Happycall), Utc::now())
            .expect_err("quest still open");
        assert_eq!(
            error,
            WorkflowError::QuestIncomplete {
                stage: Stage::Received,
                missing_teams: vec![Team::Sales],
                missing_assignees: Vec::new(),
            }
        );

        engine.approve_team(&mut order, &sales, Team::Sales, Utc::now()).expect("approve");
        let outcome = engine
            .transition(&mut order, &sales, &TransitionRequest::to(Stage::Happycall), Utc::now())
            .expect("advance");

        assert_eq!(order.stage(), Stage::Happycall);
        assert_eq!(outcome.events[0].event_type, OrderEventType::StageChanged);
        assert_eq!(outcome.events[0].payload.before, json!("RECEIVED"));
        assert_eq!(outcome.events[0].payload.after, json!("HAPPYCALL"));
        assert!(order.structured_data.open_quest(Stage::Happycall).is_some());
    }

    #[test]
    fn staff_outside_domain_is_denied() {
        let engine = WorkflowEngine::default();
        let mut order = fresh_order(&engine);
        let drawing = user(6, Role::Staff, Some(Team::Drawing));

        let error = engine
            .transition(&mut order, &drawing, &TransitionRequest::to(Stage::Happycall), Utc::now())
            .expect_err("not sales");
        assert!(error.is_denial());
        assert_eq!(order.stage(), Stage::Received);
    }

    #[test]
    fn skipping_requires_force_with_reason_by_manager() {
        let engine = WorkflowEngine::default();
        let mut order = fresh_order(&engine);
        let sales = user(5, Role::Staff, Some(Team::Sales));

        let error = engine
            .transition(&mut order, &sales, &TransitionRequest::to(Stage::Drawing), Utc::now())
            .expect_err("skip");
        assert_eq!(error, WorkflowError::ForceRequired { from: Stage::Received, to: Stage::Drawing });

        let error = engine
            .transition(&mut order, &sales, &TransitionRequest::forced(Stage::Drawing, "rush"), Utc::now())
            .expect_err("staff cannot force");
        assert!(matches!(error, WorkflowError::ManagerRequired { .. }));

        let error = engine
            .transition(&mut order, &manager(), &TransitionRequest::forced(Stage::Drawing, " "), Utc::now())
            .expect_err("blank reason");
        assert!(matches!(error, WorkflowError::ReasonRequired { .. }));

        let outcome = engine
            .transition(
                &mut order,
                &manager(),
                &TransitionRequest::forced(Stage::Drawing, "customer measured in-store"),
                Utc::now(),
            )
            .expect("forced skip");

        assert_eq!(order.stage(), Stage::Drawing);
        let transition = outcome.transition.expect("transition");
        assert_eq!(transition.kind, TransitionKind::Skip);
        assert!(transition.forced);
        assert_eq!(outcome.security_logs[0].action, SecurityAction::ForcedTransition);
        assert_eq!(order.structured_data.quests[0].status, QuestStatus::Skipped);
        assert_eq!(outcome.events[0].payload.detail["skipped_quests"], json!(["RECEIVED"]));
    }

    #[test]
    fn assignee_quest_snapshot_follows_assignments() {
        let engine = WorkflowEngine::default();
        let mut order = fresh_order(&engine);
        engine
            .transition(&mut order, &manager(), &TransitionRequest::forced(Stage::Measure, "walk-in"), Utc::now())
            .expect("forced");

        let measurer = user(20, Role::Staff, Some(Team::Measure));
        let error = engine.approve_as_assignee(&mut order, &measurer, Utc::now()).expect_err("unassigned");
        assert_eq!(error, WorkflowError::NotAssignee { user_id: UserId(20), stage: Stage::Measure });

        engine
            .assign(&mut order, &manager(), Domain::Measurement, &[UserId(20), UserId(20)], Utc::now())
            .expect("assign");
        assert_eq!(order.structured_data.assignees(Domain::Measurement), &[UserId(20)]);

        let outcome = engine.approve_as_assignee(&mut order, &measurer, Utc::now()).expect("approve");
        assert_eq!(
            event_types(&outcome),
            vec![OrderEventType::QuestApproved, OrderEventType::QuestCompleted]
        );
        assert_eq!(order.stage(), Stage::Measure);
    }

    #[test]
    fn auto_advance_moves_on_after_completion() {
        let engine = WorkflowEngine::new(WorkflowPolicy { auto_advance: true });
        let mut order = fresh_order(&engine);
        let sales = user(5, Role::Staff, Some(Team::Sales));

        let outcome = engine.approve_team(&mut order, &sales, Team::Sales, Utc::now()).expect("approve");

        assert_eq!(order.stage(), Stage::Happycall);
        assert_eq!(outcome.transition.map(|t| t.to), Some(Stage::Happycall));
        assert!(event_types(&outcome).contains(&OrderEventType::StageChanged));
    }

    #[test]
    fn emergency_override_requires_manager_and_is_logged() {
        let engine = WorkflowEngine::default();
        let mut order = fresh_order(&engine);
        engine
            .transition(&mut order, &manager(), &TransitionRequest::forced(Stage::Construction, "migration"), Utc::now())
            .expect("forced");

        let staff = user(30, Role::Staff, Some(Team::Construction));
        let error = engine
            .emergency_override(&mut order, &staff, "installer sick", Utc::now())
            .expect_err("staff");
        assert!(error.is_denial());

        let outcome = engine
            .emergency_override(&mut order, &manager(), "installer sick", Utc::now())
            .expect("override");
        assert_eq!(outcome.security_logs[0].action, SecurityAction::EmergencyOverride);
        assert!(event_types(&outcome).contains(&OrderEventType::QuestOverridden));

        engine
            .transition(&mut order, &manager(), &TransitionRequest::to(Stage::Cs), Utc::now())
            .expect("gate cleared");
    }

    #[test]
    fn as_branch_round_trip() {
        let engine = WorkflowEngine::default();
        let mut order = fresh_order(&engine);
        engine
            .transition(&mut order, &manager(), &TransitionRequest::forced(Stage::Completed, "legacy"), Utc::now())
            .expect("forced");

        let as_staff = user(40, Role::Staff, Some(Team::As));
        engine
            .transition(&mut order, &as_staff, &TransitionRequest::to(Stage::As), Utc::now())
            .expect("enter AS");
        assert!(order.structured_data.open_quest(Stage::As).is_some());

        let error = engine
            .transition(&mut order, &as_staff, &TransitionRequest::to(Stage::Completed), Utc::now())
            .expect_err("AS quest open");
        assert!(matches!(error, WorkflowError::QuestIncomplete { stage: Stage::As, .. }));

        let error = engine
            .transition(&mut order, &as_staff, &TransitionRequest::to(Stage::Measure), Utc::now())
            .expect_err("not connected");
        assert_eq!(error, WorkflowError::InvalidTransition { from: Stage::As, to: Stage::Measure });
    }

    #[test]
    fn entering_as_with_an_unfinished_quest_needs_force() {
        let engine = WorkflowEngine::default();
        let mut order = fresh_order(&engine);
        engine
            .transition(&mut order, &manager(), &TransitionRequest::forced(Stage::Construction, "migration"), Utc::now())
            .expect("forced");

        let as_staff = user(40, Role::Staff, Some(Team::As));
        let error = engine
            .transition(&mut order, &as_staff, &TransitionRequest::to(Stage::As), Utc::now())
            .expect_err("installation unfinished");
        assert!(matches!(error, WorkflowError::QuestIncomplete { stage: Stage::Construction, .. }));
        assert_eq!(order.stage(), Stage::Construction);
        assert!(order.structured_data.open_quest(Stage::Construction).is_some());

        let outcome = engine
            .transition(
                &mut order,
                &manager(),
                &TransitionRequest::forced(Stage::As, "leak reported mid-install"),
                Utc::now(),
            )
            .expect("forced detour");
        assert_eq!(outcome.security_logs[0].action, SecurityAction::ForcedTransition);
        assert_eq!(outcome.events[0].payload.detail["skipped_quests"], json!(["CONSTRUCTION"]));

        let cs = user(8, Role::Staff, Some(Team::Cs));
        engine.approve_team(&mut order, &as_staff, Team::As, Utc::now()).expect("as approval");
        engine.approve_team(&mut order, &cs, Team::Cs, Utc::now()).expect("cs approval");
        let outcome = engine
            .transition(&mut order, &as_staff, &TransitionRequest::to(Stage::Cs), Utc::now())
            .expect("exit AS");
        assert_eq!(outcome.transition.map(|t| t.kind), Some(TransitionKind::ExitAs));
        assert!(order.structured_data.open_quest(Stage::Cs).is_some());
    }

    #[test]
    fn entering_as_after_the_quest_completes_is_regular() {
        let engine = WorkflowEngine::default();
        let mut order = fresh_order(&engine);
        engine
            .transition(&mut order, &manager(), &TransitionRequest::forced(Stage::Construction, "migration"), Utc::now())
            .expect("forced");
        engine.emergency_override(&mut order, &manager(), "installer sick", Utc::now()).expect("override");

        let as_staff = user(40, Role::Staff, Some(Team::As));
        let outcome = engine
            .transition(&mut order, &as_staff, &TransitionRequest::to(Stage::As), Utc::now())
            .expect("enter AS");

        let transition = outcome.transition.expect("transition");
        assert_eq!(transition.kind, TransitionKind::EnterAs);
        assert!(!transition.forced);
        assert!(outcome.security_logs.is_empty());
        assert!(order
            .structured_data
            .quests
            .iter()
            .all(|quest| quest.stage != Stage::Construction || quest.status == QuestStatus::Completed));
    }

    #[test]
    fn reassignment_that_completes_a_quest_auto_advances() {
        let engine = WorkflowEngine::new(WorkflowPolicy { auto_advance: true });
        let mut order = fresh_order(&engine);
        engine
            .transition(&mut order, &manager(), &TransitionRequest::forced(Stage::Drawing, "walk-in"), Utc::now())
            .expect("forced");
        engine
            .assign(&mut order, &manager(), Domain::Drawing, &[UserId(20), UserId(21)], Utc::now())
            .expect("assign");
        let drawer = user(20, Role::Staff, Some(Team::Drawing));
        engine.approve_as_assignee(&mut order, &drawer, Utc::now()).expect("approve");
        assert_eq!(order.stage(), Stage::Drawing);

        let outcome = engine
            .assign(&mut order, &manager(), Domain::Drawing, &[UserId(20)], Utc::now())
            .expect("reassign");

        assert_eq!(order.stage(), Stage::Confirm);
        assert_eq!(outcome.transition.map(|t| t.to), Some(Stage::Confirm));
        assert_eq!(outcome.completed_quests, vec![Stage::Drawing]);
        let auto = outcome
            .events
            .iter()
            .find(|event| event.event_type == OrderEventType::StageChanged)
            .expect("stage change");
        assert_eq!(auto.payload.detail["auto"], json!(true));
        assert!(order.structured_data.open_quest(Stage::Confirm).is_some());
    }

    #[test]
    fn reassignment_completion_does_not_reopen_the_quest() {
        let engine = WorkflowEngine::default();
        let mut order = fresh_order(&engine);
        engine
            .transition(&mut order, &manager(), &TransitionRequest::forced(Stage::Drawing, "walk-in"), Utc::now())
            .expect("forced");
        engine
            .assign(&mut order, &manager(), Domain::Drawing, &[UserId(20), UserId(21)], Utc::now())
            .expect("assign");
        let drawer = user(20, Role::Staff, Some(Team::Drawing));
        engine.approve_as_assignee(&mut order, &drawer, Utc::now()).expect("approve");

        let outcome = engine
            .assign(&mut order, &manager(), Domain::Drawing, &[UserId(20)], Utc::now())
            .expect("reassign");

        assert_eq!(order.stage(), Stage::Drawing);
        assert_eq!(
            event_types(&outcome),
            vec![OrderEventType::AssignmentChanged, OrderEventType::QuestCompleted]
        );
        let drawing_quests: Vec<_> =
            order.structured_data.quests.iter().filter(|quest| quest.stage == Stage::Drawing).collect();
        assert_eq!(drawing_quests.len(), 1);
        assert_eq!(drawing_quests[0].status, QuestStatus::Completed);
    }

    #[test]
    fn unchanged_values_emit_nothing() {
        let engine = WorkflowEngine::default();
        let mut order = fresh_order(&engine);

        let outcome = engine.set_urgent(&mut order, &manager(), false, None, Utc::now()).expect("noop");
        assert!(outcome.is_noop());

        let date = NaiveDate::from_ymd_opt(2026, 10, 23);
        let first = engine
            .set_schedule_date(&mut order, &manager(), ScheduleKind::Measurement, date, Utc::now())
            .expect("set date");
        assert_eq!(first.events[0].event_type, OrderEventType::MeasurementDateChanged);
        assert_eq!(first.events[0].payload.before, json!(null));
        assert_eq!(first.events[0].payload.after, json!("2026-10-23"));

        let second = engine
            .set_schedule_date(&mut order, &manager(), ScheduleKind::Measurement, date, Utc::now())
            .expect("same date");
        assert!(second.is_noop());
    }

    #[test]
    fn urgent_flag_records_reason_and_timestamp() {
        let engine = WorkflowEngine::default();
        let mut order = fresh_order(&engine);
        let cs = user(8, Role::Staff, Some(Team::Cs));

        let outcome =
            engine.set_urgent(&mut order, &cs, true, Some(" VIP customer "), Utc::now()).expect("urgent");

        assert!(order.structured_data.flags.urgent);
        assert_eq!(order.structured_data.flags.urgent_reason.as_deref(), Some("VIP customer"));
        assert!(order.structured_data.flags.urgent_at.is_some());
        assert_eq!(outcome.events[0].payload.target.as_deref(), Some("flags.urgent"));
    }
}
