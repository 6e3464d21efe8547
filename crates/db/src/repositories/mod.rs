use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite};
use thiserror::Error;

use foms_core::domain::event::{NewOrderEvent, OrderEvent, OrderEventId};
use foms_core::domain::order::{Order, OrderId};
use foms_core::domain::security::{NewSecurityLog, SecurityLog};
use foms_core::domain::task::{NewOrderTask, OrderTask, OrderTaskId, TaskStatus};
use foms_core::domain::user::{User, UserId};

use crate::DbPool;

pub mod event;
pub mod memory;
pub mod order;
pub mod security_log;
pub mod task;
pub mod user;

pub use event::SqlOrderEventRepository;
pub use memory::InMemoryStore;
pub use order::SqlOrderRepository;
pub use security_log::SqlSecurityLogRepository;
pub use task::SqlOrderTaskRepository;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("order {order_id} was modified concurrently (expected version {expected})")]
    VersionConflict { order_id: OrderId, expected: u32 },
    #[error("order {0} not found")]
    OrderNotFound(OrderId),
    #[error("task {task_id} was modified concurrently (expected status {})", .expected.as_str())]
    TaskConflict { task_id: OrderTaskId, expected: TaskStatus },
    #[error("task {0} not found")]
    TaskNotFound(OrderTaskId),
    #[error("duplicate {0}")]
    Duplicate(String),
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    /// Inserts or replaces a user; a zero id lets the store allocate one.
    async fn save(&self, user: User) -> Result<User, RepositoryError>;
    async fn list(&self) -> Result<Vec<User>, RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;
    /// Orders whose document is not at `COMPLETED`, oldest first.
    async fn list_open_ids(&self) -> Result<Vec<OrderId>, RepositoryError>;
}

#[async_trait]
pub trait OrderEventRepository: Send + Sync {
    async fn find_by_id(&self, id: OrderEventId) -> Result<Option<OrderEvent>, RepositoryError>;
    async fn list_for_order(&self, order_id: OrderId) -> Result<Vec<OrderEvent>, RepositoryError>;
    /// The `CHANGE_REVERTED` event compensating `id`, if one exists.
    async fn find_revert_of(&self, id: OrderEventId) -> Result<Option<OrderEvent>, RepositoryError>;
}

#[async_trait]
pub trait OrderTaskRepository: Send + Sync {
    async fn find_by_id(&self, id: OrderTaskId) -> Result<Option<OrderTask>, RepositoryError>;
    async fn list_for_order(&self, order_id: OrderId) -> Result<Vec<OrderTask>, RepositoryError>;
    async fn sla_keys(&self, order_id: OrderId) -> Result<BTreeSet<String>, RepositoryError>;
}

#[async_trait]
pub trait SecurityLogRepository: Send + Sync {
    async fn append(&self, entry: NewSecurityLog) -> Result<SecurityLog, RepositoryError>;
    async fn list_recent(&self, limit: u32) -> Result<Vec<SecurityLog>, RepositoryError>;
}

/// Everything one workflow operation writes.
#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    /// Order document to persist; its `version` is the version it was read at.
    pub order: Option<Order>,
    pub events: Vec<NewOrderEvent>,
    pub new_tasks: Vec<NewOrderTask>,
    pub task_updates: Vec<TaskUpdate>,
    pub security_logs: Vec<NewSecurityLog>,
}

/// A task write guarded by the status the task was read with.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskUpdate {
    pub task: OrderTask,
    pub expected_status: TaskStatus,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.order.is_none()
            && self.events.is_empty()
            && self.new_tasks.is_empty()
            && self.task_updates.is_empty()
            && self.security_logs.is_empty()
    }

    /// Points every row of the change set at `order_id`.
    pub(crate) fn attach_to(&mut self, order_id: OrderId) {
        for event in &mut self.events {
            event.order_id = order_id;
        }
        for task in &mut self.new_tasks {
            task.order_id = order_id;
        }
        for entry in &mut self.security_logs {
            entry.order_id = Some(order_id);
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CommitReceipt {
    pub order_version: Option<u32>,
    pub events: Vec<OrderEvent>,
    pub tasks: Vec<OrderTask>,
    pub security_logs: Vec<SecurityLog>,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Applies the change set atomically, rejecting stale order versions.
    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, RepositoryError>;

    /// Inserts `order` with the rows its creation produced in one transaction.
    ///
    /// The store allocates the id and attaches every row of `changes` to it;
    /// `changes.order` is ignored. The order is stored at `order.version + 1`.
    async fn create(
        &self,
        order: Order,
        changes: ChangeSet,
    ) -> Result<(Order, CommitReceipt), RepositoryError>;
}

#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub events: Arc<dyn OrderEventRepository>,
    pub tasks: Arc<dyn OrderTaskRepository>,
    pub security_logs: Arc<dyn SecurityLogRepository>,
    pub store: Arc<dyn OrderStore>,
}

impl Repositories {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            users: Arc::new(SqlUserRepository::new(pool.clone())),
            orders: Arc::new(SqlOrderRepository::new(pool.clone())),
            events: Arc::new(SqlOrderEventRepository::new(pool.clone())),
            tasks: Arc::new(SqlOrderTaskRepository::new(pool.clone())),
            security_logs: Arc::new(SqlSecurityLogRepository::new(pool.clone())),
            store: Arc::new(SqlOrderRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::default());
        Self {
            users: store.clone(),
            orders: store.clone(),
            events: store.clone(),
            tasks: store.clone(),
            security_logs: store.clone(),
            store,
        }
    }
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

pub(crate) fn parse_timestamp(name: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

pub(crate) fn parse_optional_timestamp(
    name: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|value| parse_timestamp(name, &value)).transpose()
}

pub(crate) fn parse_optional_date(
    name: &str,
    value: Option<String>,
) -> Result<Option<NaiveDate>, RepositoryError> {
    value
        .map(|value| {
            NaiveDate::parse_from_str(&value, "%Y-%m-%d")
                .map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
        })
        .transpose()
}

pub(crate) fn decode_code<T>(
    name: &str,
    value: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, RepositoryError> {
    parse(value).ok_or_else(|| RepositoryError::Decode(format!("{name}: unknown code `{value}`")))
}

/// Maps unique-index violations to [`RepositoryError::Duplicate`].
pub(crate) fn unique_violation(what: &str) -> impl FnOnce(sqlx::Error) -> RepositoryError + '_ {
    move |error| {
        if let sqlx::Error::Database(db) = &error {
            if db.is_unique_violation() {
                return RepositoryError::Duplicate(what.to_string());
            }
        }
        RepositoryError::Database(error)
    }
}
