use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::RwLock;

use foms_core::domain::event::{OrderEvent, OrderEventId};
use foms_core::domain::order::{Order, OrderId};
use foms_core::domain::security::{NewSecurityLog, SecurityLog};
use foms_core::domain::task::{OrderTask, OrderTaskId};
use foms_core::domain::user::{User, UserId};

use super::{
    ChangeSet, CommitReceipt, OrderEventRepository, OrderRepository, OrderStore,
    OrderTaskRepository, RepositoryError, SecurityLogRepository, UserRepository,
};

#[derive(Default)]
struct MemoryState {
    users: BTreeMap<UserId, User>,
    orders: BTreeMap<OrderId, Order>,
    events: BTreeMap<OrderEventId, OrderEvent>,
    tasks: BTreeMap<OrderTaskId, OrderTask>,
    security_logs: Vec<SecurityLog>,
    next_user_id: i64,
    next_order_id: i64,
    next_event_id: i64,
    next_task_id: i64,
}

impl MemoryState {
    fn allocate(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }

    fn append_log(&mut self, entry: NewSecurityLog) -> SecurityLog {
        let log = SecurityLog {
            id: self.security_logs.len() as i64 + 1,
            user_id: entry.user_id,
            action: entry.action,
            order_id: entry.order_id,
            detail: entry.detail,
            created_at: entry.created_at,
        };
        self.security_logs.push(log.clone());
        log
    }

    /// Writes rows that already passed [`Self::check_constraints`].
    fn write_rows(&mut self, changes: ChangeSet, receipt: &mut CommitReceipt) {
        for event in changes.events {
            let id = OrderEventId(Self::allocate(&mut self.next_event_id));
            let event = event.into_event(id);
            self.events.insert(id, event.clone());
            receipt.events.push(event);
        }
        for task in changes.new_tasks {
            let id = OrderTaskId(Self::allocate(&mut self.next_task_id));
            let task = task.into_task(id);
            self.tasks.insert(id, task.clone());
            receipt.tasks.push(task);
        }
        for update in changes.task_updates {
            self.tasks.insert(update.task.id, update.task.clone());
            receipt.tasks.push(update.task);
        }
        for entry in changes.security_logs {
            let log = self.append_log(entry);
            receipt.security_logs.push(log);
        }
    }

    /// Mirrors the guarded task updates and unique indexes of the SQL schema.
    fn check_constraints(&self, changes: &ChangeSet) -> Result<(), RepositoryError> {
        for update in &changes.task_updates {
            let stored =
                self.tasks.get(&update.task.id).ok_or(RepositoryError::TaskNotFound(update.task.id))?;
            if stored.status != update.expected_status {
                return Err(RepositoryError::TaskConflict {
                    task_id: update.task.id,
                    expected: update.expected_status,
                });
            }
        }

        let mut reverted = BTreeSet::new();
        for event in &changes.events {
            let Some(target) = event.payload.reverted_event_id else { continue };
            let taken =
                self.events.values().any(|existing| existing.payload.reverted_event_id == Some(target));
            if taken || !reverted.insert(target) {
                return Err(RepositoryError::Duplicate(
                    "revert of an already reverted event".to_string(),
                ));
            }
        }

        let mut keys = BTreeSet::new();
        for task in &changes.new_tasks {
            let Some(key) = &task.sla_key else { continue };
            let taken = self.tasks.values().any(|existing| {
                existing.order_id == task.order_id && existing.sla_key.as_ref() == Some(key)
            });
            if taken || !keys.insert((task.order_id, key.clone())) {
                return Err(RepositoryError::Duplicate("SLA task key".to_string()));
            }
        }
        Ok(())
    }
}

/// Process-local store backing every repository trait.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

#[async_trait::async_trait]
impl UserRepository for InMemoryStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.users.get(&id).cloned())
    }

    async fn save(&self, user: User) -> Result<User, RepositoryError> {
        let mut state = self.state.write().await;
        let user = if user.id.0 == 0 {
            User { id: UserId(MemoryState::allocate(&mut state.next_user_id)), ..user }
        } else {
            state.next_user_id = state.next_user_id.max(user.id.0);
            user
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn list(&self) -> Result<Vec<User>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.users.values().cloned().collect())
    }
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryStore {
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.orders.get(&id).cloned())
    }

    async fn list_open_ids(&self) -> Result<Vec<OrderId>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .filter(|order| !order.stage().is_terminal())
            .map(|order| order.id)
            .collect())
    }
}

#[async_trait::async_trait]
impl OrderEventRepository for InMemoryStore {
    async fn find_by_id(&self, id: OrderEventId) -> Result<Option<OrderEvent>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.events.get(&id).cloned())
    }

    async fn list_for_order(&self, order_id: OrderId) -> Result<Vec<OrderEvent>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.events.values().filter(|event| event.order_id == order_id).cloned().collect())
    }

    async fn find_revert_of(&self, id: OrderEventId) -> Result<Option<OrderEvent>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.events.values().find(|event| event.payload.reverted_event_id == Some(id)).cloned())
    }
}

#[async_trait::async_trait]
impl OrderTaskRepository for InMemoryStore {
    async fn find_by_id(&self, id: OrderTaskId) -> Result<Option<OrderTask>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn list_for_order(&self, order_id: OrderId) -> Result<Vec<OrderTask>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.tasks.values().filter(|task| task.order_id == order_id).cloned().collect())
    }

    async fn sla_keys(&self, order_id: OrderId) -> Result<BTreeSet<String>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .tasks
            .values()
            .filter(|task| task.order_id == order_id)
            .filter_map(|task| task.sla_key.clone())
            .collect())
    }
}

#[async_trait::async_trait]
impl SecurityLogRepository for InMemoryStore {
    async fn append(&self, entry: NewSecurityLog) -> Result<SecurityLog, RepositoryError> {
        let mut state = self.state.write().await;
        Ok(state.append_log(entry))
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<SecurityLog>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.security_logs.iter().rev().take(limit as usize).cloned().collect())
    }
}

#[async_trait::async_trait]
impl OrderStore for InMemoryStore {
    async fn commit(&self, mut changes: ChangeSet) -> Result<CommitReceipt, RepositoryError> {
        let mut state = self.state.write().await;

        // All checks run before the first write so a rejected change set leaves no trace.
        if let Some(order) = &changes.order {
            let stored = state.orders.get(&order.id).ok_or(RepositoryError::OrderNotFound(order.id))?;
            if stored.version != order.version {
                return Err(RepositoryError::VersionConflict {
                    order_id: order.id,
                    expected: order.version,
                });
            }
        }
        state.check_constraints(&changes)?;

        let mut receipt = CommitReceipt::default();
        if let Some(mut order) = changes.order.take() {
            order.version += 1;
            receipt.order_version = Some(order.version);
            state.orders.insert(order.id, order);
        }
        state.write_rows(changes, &mut receipt);
        Ok(receipt)
    }

    async fn create(
        &self,
        mut order: Order,
        mut changes: ChangeSet,
    ) -> Result<(Order, CommitReceipt), RepositoryError> {
        let mut state = self.state.write().await;
        changes.order = None;
        state.check_constraints(&changes)?;

        order.id = OrderId(MemoryState::allocate(&mut state.next_order_id));
        order.version += 1;
        changes.attach_to(order.id);
        state.orders.insert(order.id, order.clone());

        let mut receipt = CommitReceipt { order_version: Some(order.version), ..CommitReceipt::default() };
        state.write_rows(changes, &mut receipt);
        Ok((order, receipt))
    }
}
