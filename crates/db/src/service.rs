//! Application service: loads actors and orders, runs the workflow engine and
//! commits each outcome together with the rule-created tasks it triggers.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use foms_core::document::ScheduleKind;
use foms_core::domain::event::{EventPayload, NewOrderEvent, OrderEvent, OrderEventId, OrderEventType};
use foms_core::domain::order::{NewOrder, Order, OrderId};
use foms_core::domain::security::{NewSecurityLog, SecurityAction, SecurityLog};
use foms_core::domain::task::{OrderTask, OrderTaskId, TaskStatus};
use foms_core::domain::user::{Role, Team, User, UserId};
use foms_core::errors::{ApplicationError, DomainError};
use foms_core::permissions::Domain;
use foms_core::sla::{self, SlaPolicy};
use foms_core::workflow::{
    Quest, QuestEvaluation, Stage, TransitionRequest, WorkflowEngine, WorkflowError,
    WorkflowOutcome,
};

use crate::repositories::{ChangeSet, CommitReceipt, Repositories, RepositoryError, TaskUpdate};

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::VersionConflict { .. }
            | RepositoryError::TaskConflict { .. }
            | RepositoryError::Duplicate(_) => Self::Conflict(value.to_string()),
            RepositoryError::OrderNotFound(id) => {
                Self::NotFound { entity: "order", id: id.to_string() }
            }
            RepositoryError::TaskNotFound(id) => {
                Self::NotFound { entity: "order_task", id: id.to_string() }
            }
            RepositoryError::Database(_) | RepositoryError::Decode(_) => {
                Self::Persistence(value.to_string())
            }
        }
    }
}

/// Who is acting and the id that ties their request's log lines together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationContext {
    pub actor_id: UserId,
    pub correlation_id: String,
}

impl OperationContext {
    pub fn new(actor_id: UserId) -> Self {
        Self { actor_id, correlation_id: Uuid::new_v4().to_string() }
    }

    pub fn with_correlation_id(actor_id: UserId, correlation_id: impl Into<String>) -> Self {
        Self { actor_id, correlation_id: correlation_id.into() }
    }
}

/// Result of a mutating operation: the order as stored plus what was written.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrderUpdate {
    pub order: Order,
    pub events: Vec<OrderEvent>,
    pub tasks: Vec<OrderTask>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QuestSummary {
    pub order_id: OrderId,
    pub stage: Stage,
    pub quest: Option<Quest>,
    pub evaluation: Option<QuestEvaluation>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub orders_scanned: usize,
    pub tasks_created: usize,
    pub orders_failed: usize,
}

#[derive(Clone)]
pub struct WorkflowService {
    repos: Repositories,
    engine: WorkflowEngine,
    sla: SlaPolicy,
}

impl WorkflowService {
    pub fn new(repos: Repositories, engine: WorkflowEngine, sla: SlaPolicy) -> Self {
        Self { repos, engine, sla }
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub async fn save_user(&self, user: User) -> Result<User, ApplicationError> {
        Ok(self.repos.users.save(user).await?)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order, ApplicationError> {
        self.load_order(order_id).await
    }

    pub async fn create_order(
        &self,
        ctx: &OperationContext,
        new_order: NewOrder,
    ) -> Result<OrderUpdate, ApplicationError> {
        let actor = self.load_actor(ctx).await?;
        if !actor.active || actor.role == Role::Viewer {
            let error = WorkflowError::PermissionDenied { user_id: actor.id, domain: Domain::Sales };
            return Err(self.reject(ctx, &actor, None, "create_order", error.into()).await);
        }
        if new_order.customer_name.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "customer_name must not be empty".to_string(),
            )
            .into());
        }

        let now = Utc::now();
        let mut order = new_order.into_order(OrderId(0), now);
        let outcome = match self.engine.initialize(&mut order, &actor, now) {
            Ok(outcome) => outcome,
            Err(error) => {
                return Err(self.reject(ctx, &actor, None, "create_order", error.into()).await);
            }
        };
        let mut changes = ChangeSet {
            events: outcome.events,
            security_logs: outcome.security_logs,
            ..ChangeSet::default()
        };
        self.plan_rule_tasks(&order, now, &mut changes).await?;

        let (order, receipt) = self.repos.store.create(order, changes).await?;
        info!(
            event_name = "workflow.order.created",
            correlation_id = %ctx.correlation_id,
            order_id = order.id.0,
            user_id = actor.id.0,
            stage = order.stage().as_str(),
            events = receipt.events.len(),
            "order created"
        );
        Ok(OrderUpdate { order, events: receipt.events, tasks: receipt.tasks })
    }

    pub async fn transition_stage(
        &self,
        ctx: &OperationContext,
        order_id: OrderId,
        request: &TransitionRequest,
    ) -> Result<OrderUpdate, ApplicationError> {
        self.mutate(ctx, order_id, "transition_stage", |engine, order, actor, now| {
            engine.transition(order, actor, request, now).map_err(DomainError::from)
        })
        .await
    }

    pub async fn approve_team(
        &self,
        ctx: &OperationContext,
        order_id: OrderId,
        team: Team,
    ) -> Result<OrderUpdate, ApplicationError> {
        self.mutate(ctx, order_id, "approve_team", |engine, order, actor, now| {
            engine.approve_team(order, actor, team, now).map_err(DomainError::from)
        })
        .await
    }

    pub async fn revoke_team_approval(
        &self,
        ctx: &OperationContext,
        order_id: OrderId,
        team: Team,
    ) -> Result<OrderUpdate, ApplicationError> {
        self.mutate(ctx, order_id, "revoke_team_approval", |engine, order, actor, now| {
            engine.revoke_team_approval(order, actor, team, now).map_err(DomainError::from)
        })
        .await
    }

    pub async fn approve_as_assignee(
        &self,
        ctx: &OperationContext,
        order_id: OrderId,
    ) -> Result<OrderUpdate, ApplicationError> {
        self.mutate(ctx, order_id, "approve_as_assignee", |engine, order, actor, now| {
            engine.approve_as_assignee(order, actor, now).map_err(DomainError::from)
        })
        .await
    }

    pub async fn emergency_override(
        &self,
        ctx: &OperationContext,
        order_id: OrderId,
        reason: &str,
    ) -> Result<OrderUpdate, ApplicationError> {
        self.mutate(ctx, order_id, "emergency_override", |engine, order, actor, now| {
            engine.emergency_override(order, actor, reason, now).map_err(DomainError::from)
        })
        .await
    }

    pub async fn set_urgent(
        &self,
        ctx: &OperationContext,
        order_id: OrderId,
        urgent: bool,
        reason: Option<&str>,
    ) -> Result<OrderUpdate, ApplicationError> {
        self.mutate(ctx, order_id, "set_urgent", |engine, order, actor, now| {
            engine.set_urgent(order, actor, urgent, reason, now).map_err(DomainError::from)
        })
        .await
    }

    pub async fn set_schedule_date(
        &self,
        ctx: &OperationContext,
        order_id: OrderId,
        kind: ScheduleKind,
        date: Option<NaiveDate>,
    ) -> Result<OrderUpdate, ApplicationError> {
        self.mutate(ctx, order_id, "set_schedule_date", |engine, order, actor, now| {
            engine.set_schedule_date(order, actor, kind, date, now).map_err(DomainError::from)
        })
        .await
    }

    pub async fn assign(
        &self,
        ctx: &OperationContext,
        order_id: OrderId,
        domain: Domain,
        user_ids: &[UserId],
    ) -> Result<OrderUpdate, ApplicationError> {
        for user_id in user_ids {
            if self.repos.users.find_by_id(*user_id).await?.is_none() {
                return Err(ApplicationError::NotFound { entity: "user", id: user_id.to_string() });
            }
        }
        self.mutate(ctx, order_id, "assign", |engine, order, actor, now| {
            engine.assign(order, actor, domain, user_ids, now).map_err(DomainError::from)
        })
        .await
    }

    pub async fn revert_event(
        &self,
        ctx: &OperationContext,
        order_id: OrderId,
        event_id: OrderEventId,
        reason: Option<&str>,
    ) -> Result<OrderUpdate, ApplicationError> {
        let event = self.repos.events.find_by_id(event_id).await?.ok_or_else(|| {
            ApplicationError::NotFound { entity: "order_event", id: event_id.to_string() }
        })?;
        let already_reverted = self.repos.events.find_revert_of(event_id).await?.is_some();

        self.mutate(ctx, order_id, "revert_event", |engine, order, actor, now| {
            engine
                .revert(order, &event, already_reverted, actor, reason, now)
                .map_err(DomainError::from)
        })
        .await
    }

    pub async fn list_events(&self, order_id: OrderId) -> Result<Vec<OrderEvent>, ApplicationError> {
        self.load_order(order_id).await?;
        Ok(self.repos.events.list_for_order(order_id).await?)
    }

    pub async fn list_tasks(&self, order_id: OrderId) -> Result<Vec<OrderTask>, ApplicationError> {
        self.load_order(order_id).await?;
        Ok(self.repos.tasks.list_for_order(order_id).await?)
    }

    pub async fn recent_security_logs(
        &self,
        ctx: &OperationContext,
        limit: u32,
    ) -> Result<Vec<SecurityLog>, ApplicationError> {
        let actor = self.load_actor(ctx).await?;
        if !actor.is_manager() {
            let error = WorkflowError::ManagerRequired {
                user_id: actor.id,
                operation: "read_security_logs",
            };
            return Err(self.reject(ctx, &actor, None, "read_security_logs", error.into()).await);
        }
        Ok(self.repos.security_logs.list_recent(limit).await?)
    }

    pub async fn quest_summary(&self, order_id: OrderId) -> Result<QuestSummary, ApplicationError> {
        let order = self.load_order(order_id).await?;
        let stage = order.stage();
        let quest = order
            .structured_data
            .quests
            .iter()
            .rev()
            .find(|quest| quest.stage == stage)
            .cloned();
        let evaluation = quest.as_ref().map(Quest::evaluate);
        Ok(QuestSummary { order_id, stage, quest, evaluation })
    }

    pub async fn update_task_status(
        &self,
        ctx: &OperationContext,
        task_id: OrderTaskId,
        status: TaskStatus,
    ) -> Result<OrderTask, ApplicationError> {
        let actor = self.load_actor(ctx).await?;
        let mut task = self.repos.tasks.find_by_id(task_id).await?.ok_or_else(|| {
            ApplicationError::NotFound { entity: "order_task", id: task_id.to_string() }
        })?;

        if !task.can_be_updated_by(&actor) {
            let error = DomainError::TaskAccessDenied { user_id: actor.id, task_id };
            return Err(self.reject(ctx, &actor, Some(task.order_id), "update_task_status", error).await);
        }

        let now = Utc::now();
        let before = task.status;
        task.transition_to(status, now)?;

        let payload = EventPayload::default()
            .with_detail("task_id", task.id.0)
            .with_detail("from", before.as_str())
            .with_detail("to", status.as_str());
        let changes = ChangeSet {
            events: vec![NewOrderEvent::new(
                task.order_id,
                OrderEventType::TaskStatusChanged,
                payload,
                Some(actor.id),
                now,
            )],
            task_updates: vec![TaskUpdate { task: task.clone(), expected_status: before }],
            ..ChangeSet::default()
        };
        self.repos.store.commit(changes).await.map_err(|error| {
            if matches!(error, RepositoryError::TaskConflict { .. }) {
                warn!(
                    event_name = "workflow.task.status_conflict",
                    correlation_id = %ctx.correlation_id,
                    task_id = task.id.0,
                    expected = before.as_str(),
                    "task changed concurrently"
                );
            }
            ApplicationError::from(error)
        })?;

        info!(
            event_name = "workflow.task.status_changed",
            correlation_id = %ctx.correlation_id,
            order_id = task.order_id.0,
            task_id = task.id.0,
            from = before.as_str(),
            to = status.as_str(),
            "task status changed"
        );
        Ok(task)
    }

    /// Runs the time-based task rules over every open order.
    ///
    /// A failure on one order is logged and counted; the sweep moves on.
    pub async fn sla_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, ApplicationError> {
        let mut report = SweepReport::default();
        for order_id in self.repos.orders.list_open_ids().await? {
            report.orders_scanned += 1;
            match self.sweep_order(order_id, now).await {
                Ok(created) => report.tasks_created += created,
                Err(error) => {
                    report.orders_failed += 1;
                    warn!(
                        event_name = "workflow.sla.sweep_failed",
                        correlation_id = "sla-sweep",
                        order_id = order_id.0,
                        error = %error,
                        "sla sweep skipped order"
                    );
                }
            }
        }

        info!(
            event_name = "workflow.sla.sweep_finished",
            correlation_id = "sla-sweep",
            orders_scanned = report.orders_scanned,
            tasks_created = report.tasks_created,
            orders_failed = report.orders_failed,
            "sla sweep finished"
        );
        Ok(report)
    }

    async fn sweep_order(
        &self,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<usize, ApplicationError> {
        let order = self.load_order(order_id).await?;
        let mut changes = ChangeSet::default();
        self.plan_rule_tasks(&order, now, &mut changes).await?;
        if changes.is_empty() {
            return Ok(0);
        }
        let receipt = self.repos.store.commit(changes).await?;
        Ok(receipt.tasks.len())
    }

    async fn mutate<F>(
        &self,
        ctx: &OperationContext,
        order_id: OrderId,
        operation: &'static str,
        apply: F,
    ) -> Result<OrderUpdate, ApplicationError>
    where
        F: FnOnce(
            &WorkflowEngine,
            &mut Order,
            &User,
            DateTime<Utc>,
        ) -> Result<WorkflowOutcome, DomainError>,
    {
        let actor = self.load_actor(ctx).await?;
        let order = self.load_order(order_id).await?;
        self.apply(ctx, &actor, order, operation, Utc::now(), apply).await
    }

    async fn apply<F>(
        &self,
        ctx: &OperationContext,
        actor: &User,
        mut order: Order,
        operation: &'static str,
        now: DateTime<Utc>,
        apply: F,
    ) -> Result<OrderUpdate, ApplicationError>
    where
        F: FnOnce(
            &WorkflowEngine,
            &mut Order,
            &User,
            DateTime<Utc>,
        ) -> Result<WorkflowOutcome, DomainError>,
    {
        let outcome = match apply(&self.engine, &mut order, actor, now) {
            Ok(outcome) => outcome,
            Err(error) => return Err(self.reject(ctx, actor, Some(order.id), operation, error).await),
        };
        if outcome.is_noop() {
            return Ok(OrderUpdate { order, events: Vec::new(), tasks: Vec::new() });
        }

        order.updated_at = now;
        let mut changes = ChangeSet {
            order: Some(order.clone()),
            events: outcome.events,
            security_logs: outcome.security_logs,
            ..ChangeSet::default()
        };
        self.plan_rule_tasks(&order, now, &mut changes).await?;

        let CommitReceipt { order_version, events, tasks, .. } =
            self.repos.store.commit(changes).await.map_err(|error| {
                if matches!(error, RepositoryError::VersionConflict { .. }) {
                    warn!(
                        event_name = "workflow.order.version_conflict",
                        correlation_id = %ctx.correlation_id,
                        order_id = order.id.0,
                        operation,
                        "order changed concurrently"
                    );
                }
                ApplicationError::from(error)
            })?;
        if let Some(version) = order_version {
            order.version = version;
        }

        info!(
            event_name = "workflow.order.updated",
            correlation_id = %ctx.correlation_id,
            order_id = order.id.0,
            user_id = actor.id.0,
            operation,
            stage = order.stage().as_str(),
            events = events.len(),
            tasks = tasks.len(),
            "order workflow updated"
        );
        Ok(OrderUpdate { order, events, tasks })
    }

    /// Adds the rule-created tasks `order` calls for, each with its `TASK_CREATED` event.
    async fn plan_rule_tasks(
        &self,
        order: &Order,
        now: DateTime<Utc>,
        changes: &mut ChangeSet,
    ) -> Result<(), ApplicationError> {
        let existing = self.repos.tasks.sla_keys(order.id).await?;
        for task in sla::evaluate(order, &existing, now, now.date_naive(), &self.sla) {
            let payload = EventPayload::default()
                .with_detail("title", task.title.clone())
                .with_detail("sla_key", task.sla_key.clone())
                .with_detail("owner_team", task.owner_team.map(|team| team.as_str()));
            changes.events.push(NewOrderEvent::new(
                order.id,
                OrderEventType::TaskCreated,
                payload,
                None,
                now,
            ));
            changes.new_tasks.push(task);
        }
        Ok(())
    }

    async fn reject(
        &self,
        ctx: &OperationContext,
        actor: &User,
        order_id: Option<OrderId>,
        operation: &'static str,
        error: DomainError,
    ) -> ApplicationError {
        if error.is_denial() {
            warn!(
                event_name = "workflow.permission.denied",
                correlation_id = %ctx.correlation_id,
                user_id = actor.id.0,
                order_id = order_id.map(|id| id.0),
                operation,
                error = %error,
                "permission denied"
            );
            let entry = NewSecurityLog::new(
                Some(actor.id),
                SecurityAction::PermissionDenied,
                order_id,
                format!("{operation}: {error}"),
                Utc::now(),
            );
            if let Err(log_error) = self.repos.security_logs.append(entry).await {
                warn!(
                    event_name = "workflow.security_log.write_failed",
                    correlation_id = %ctx.correlation_id,
                    error = %log_error,
                    "failed to record permission denial"
                );
            }
        }
        ApplicationError::Domain(error)
    }

    async fn load_actor(&self, ctx: &OperationContext) -> Result<User, ApplicationError> {
        self.repos
            .users
            .find_by_id(ctx.actor_id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound { entity: "user", id: ctx.actor_id.to_string() })
    }

    async fn load_order(&self, order_id: OrderId) -> Result<Order, ApplicationError> {
        self.repos
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound { entity: "order", id: order_id.to_string() })
    }
}
