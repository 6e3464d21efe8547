//! Undo of a single recorded document change.
//!
//! A change can be reverted only while the document still holds the value
//! the event wrote. Anything else is a conflict and the caller has to look
//! at the newer events first.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::document::{DocumentError, STAGE_PATH, URGENT_PATH};
use crate::domain::event::{EventPayload, NewOrderEvent, OrderEvent, OrderEventId, OrderEventType};
use crate::domain::order::{Order, OrderId};
use crate::domain::security::{NewSecurityLog, SecurityAction};
use crate::domain::user::{User, UserId};
use crate::workflow::engine::{normalize_reason, WorkflowEngine, WorkflowOutcome};
use crate::workflow::stage::Stage;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RevertError {
    #[error("user {user_id} needs a manager role to revert changes")]
    ManagerRequired { user_id: UserId },
    #[error("event {event_id} belongs to order {event_order}, not {order}")]
    OrderMismatch { event_id: OrderEventId, event_order: OrderId, order: OrderId },
    #[error("{event_type} events cannot be reverted")]
    NotRevertible { event_type: OrderEventType },
    #[error("event {event_id} does not name the value it changed")]
    MissingTarget { event_id: OrderEventId },
    #[error("event {event_id} was already reverted")]
    AlreadyReverted { event_id: OrderEventId },
    #[error("`{target}` changed since the event: expected {expected}, found {actual}")]
    Conflict { target: String, expected: String, actual: String },
    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl WorkflowEngine {
    /// Restores the `before` value of `event` on `order`.
    ///
    /// `already_reverted` tells whether a `CHANGE_REVERTED` event pointing at
    /// `event` is already stored.
    pub fn revert(
        &self,
        order: &mut Order,
        event: &OrderEvent,
        already_reverted: bool,
        actor: &User,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WorkflowOutcome, RevertError> {
        if !actor.is_manager() {
            return Err(RevertError::ManagerRequired { user_id: actor.id });
        }
        if event.order_id != order.id {
            return Err(RevertError::OrderMismatch {
                event_id: event.id,
                event_order: event.order_id,
                order: order.id,
            });
        }
        if !event.event_type.is_revertible() {
            return Err(RevertError::NotRevertible { event_type: event.event_type });
        }
        if already_reverted {
            return Err(RevertError::AlreadyReverted { event_id: event.id });
        }
        let target = event
            .payload
            .target
            .as_deref()
            .ok_or(RevertError::MissingTarget { event_id: event.id })?;

        let current = order.structured_data.value_at(target)?;
        if current != event.payload.after {
            return Err(RevertError::Conflict {
                target: target.to_string(),
                expected: event.payload.after.to_string(),
                actual: current.to_string(),
            });
        }

        let reason = normalize_reason(reason)
            .unwrap_or_else(|| format!("revert of event {}", event.id));
        let restored = event.payload.before.clone();
        let mut outcome = WorkflowOutcome::default();

        match target {
            STAGE_PATH => {
                let stage = restored
                    .as_str()
                    .and_then(Stage::parse)
                    .ok_or_else(|| DocumentError::InvalidShape(format!("not a stage: {restored}")))?;
                self.enter_stage(
                    order,
                    Some(actor.id),
                    stage,
                    Some(reason.clone()),
                    true,
                    Some(event.id),
                    now,
                    &mut outcome,
                );
            }
            URGENT_PATH => {
                let urgent = restored.as_bool().unwrap_or(false);
                let flags = &mut order.structured_data.flags;
                flags.urgent = urgent;
                flags.urgent_reason = None;
                flags.urgent_at = urgent.then_some(now);
            }
            _ => {
                order.structured_data.apply_path(target, restored.clone())?;
                if target.starts_with("assignments.") {
                    self.sync_quests(order, Some(actor.id), now, &mut outcome);
                }
            }
        }
        order.updated_at = now;

        let mut payload = EventPayload::change(target, current, restored)
            .with_reason(Some(reason.clone()))
            .with_detail("reverted_event_type", event.event_type.as_str());
        payload.reverted_event_id = Some(event.id);
        outcome.events.insert(
            0,
            NewOrderEvent::new(order.id, OrderEventType::ChangeReverted, payload, Some(actor.id), now),
        );
        outcome.security_logs.push(NewSecurityLog::new(
            Some(actor.id),
            SecurityAction::ChangeReverted,
            Some(order.id),
            format!("reverted {} event {}: {reason}", event.event_type, event.id),
            now,
        ));
        Ok(outcome)
    }
}
