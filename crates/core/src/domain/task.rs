use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::order::OrderId;
use crate::domain::user::{Role, Team, User, UserId};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderTaskId(pub i64);

impl std::fmt::Display for OrderTaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Open,
    InProgress,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Some(Self::Open),
            "IN_PROGRESS" => Some(Self::InProgress),
            "DONE" => Some(Self::Done),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::InProgress)
                | (Self::Open, Self::Done)
                | (Self::InProgress, Self::Done)
                | (Self::InProgress, Self::Open)
                | (Self::Open, Self::Cancelled)
                | (Self::InProgress, Self::Cancelled)
                | (Self::Done, Self::Open)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderTask {
    pub order_id: OrderId,
    pub title: String,
    pub description: Option<String>,
    pub owner_team: Option<Team>,
    pub owner_user_id: Option<UserId>,
    pub due_date: Option<NaiveDate>,
    /// Deduplication key for rule-created tasks.
    pub sla_key: Option<String>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl NewOrderTask {
    pub fn into_task(self, id: OrderTaskId) -> OrderTask {
        OrderTask {
            id,
            order_id: self.order_id,
            title: self.title,
            description: self.description,
            status: TaskStatus::Open,
            owner_team: self.owner_team,
            owner_user_id: self.owner_user_id,
            due_date: self.due_date,
            sla_key: self.sla_key,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.created_at,
            completed_at: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTask {
    pub id: OrderTaskId,
    pub order_id: OrderId,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub owner_team: Option<Team>,
    pub owner_user_id: Option<UserId>,
    pub due_date: Option<NaiveDate>,
    pub sla_key: Option<String>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OrderTask {
    pub fn transition_to(&mut self, next: TaskStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTaskTransition { from: self.status, to: next });
        }

        self.status = next;
        self.updated_at = now;
        self.completed_at = (next == TaskStatus::Done).then_some(now);
        Ok(())
    }

    /// Managers, the owning user and members of the owning team may work a task.
    /// Unowned tasks are open to any active non-viewer.
    pub fn can_be_updated_by(&self, user: &User) -> bool {
        if !user.active || user.role == Role::Viewer {
            return false;
        }
        if user.is_manager() {
            return true;
        }
        match (self.owner_user_id, self.owner_team) {
            (None, None) => true,
            (owner, team) => {
                owner == Some(user.id) || team.is_some_and(|team| user.belongs_to(team))
            }
        }
    }
}
