use sqlx::sqlite::SqliteRow;
use sqlx::{Sqlite, Transaction};

use foms_core::document::StructuredData;
use foms_core::domain::order::{Order, OrderId};

use super::event::insert_event;
use super::security_log::insert_security_log;
use super::task::{insert_task, update_task_status};
use super::{
    column, parse_timestamp, ChangeSet, CommitReceipt, OrderRepository, OrderStore,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_order(row: &SqliteRow) -> Result<Order, RepositoryError> {
    let structured_data: String = column(row, "structured_data")?;
    let version: i64 = column(row, "version")?;
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;

    let raw: serde_json::Value = serde_json::from_str(&structured_data)
        .map_err(|e| RepositoryError::Decode(format!("structured_data: {e}")))?;
    // Legacy rows may hold `null` or a non-object; both read as an empty document.
    let raw = if raw.is_object() { raw } else { serde_json::Value::Object(Default::default()) };

    Ok(Order {
        id: OrderId(column(row, "id")?),
        customer_name: column(row, "customer_name")?,
        phone: column(row, "phone")?,
        address: column(row, "address")?,
        manager_name: column(row, "manager_name")?,
        structured_data: StructuredData::from_value(raw)
            .map_err(|e| RepositoryError::Decode(format!("structured_data: {e}")))?,
        version: u32::try_from(version)
            .map_err(|e| RepositoryError::Decode(format!("version: {e}")))?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

fn encode_document(order: &Order) -> Result<String, RepositoryError> {
    let value = order
        .structured_data
        .to_value()
        .map_err(|e| RepositoryError::Decode(format!("structured_data: {e}")))?;
    serde_json::to_string(&value).map_err(|e| RepositoryError::Decode(format!("structured_data: {e}")))
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, customer_name, phone, address, manager_name, structured_data,
                    version, created_at, updated_at
             FROM orders WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn list_open_ids(&self) -> Result<Vec<OrderId>, RepositoryError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM orders
             WHERE COALESCE(json_extract(structured_data, '$.workflow.stage'), 'RECEIVED') != 'COMPLETED'
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(OrderId).collect())
    }
}

#[async_trait::async_trait]
impl OrderStore for SqlOrderRepository {
    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let mut receipt = CommitReceipt::default();

        if let Some(order) = &changes.order {
            let document = encode_document(order)?;
            let result = sqlx::query(
                "UPDATE orders
                 SET customer_name = ?, phone = ?, address = ?, manager_name = ?,
                     structured_data = ?, version = version + 1, updated_at = ?
                 WHERE id = ? AND version = ?",
            )
            .bind(&order.customer_name)
            .bind(&order.phone)
            .bind(&order.address)
            .bind(&order.manager_name)
            .bind(document)
            .bind(order.updated_at.to_rfc3339())
            .bind(order.id.0)
            .bind(i64::from(order.version))
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM orders WHERE id = ?")
                    .bind(order.id.0)
                    .fetch_optional(&mut *tx)
                    .await?;
                return Err(match exists {
                    Some(_) => {
                        RepositoryError::VersionConflict { order_id: order.id, expected: order.version }
                    }
                    None => RepositoryError::OrderNotFound(order.id),
                });
            }
            receipt.order_version = Some(order.version + 1);
        }

        write_rows(&mut tx, changes, &mut receipt).await?;
        tx.commit().await?;
        Ok(receipt)
    }

    async fn create(
        &self,
        mut order: Order,
        mut changes: ChangeSet,
    ) -> Result<(Order, CommitReceipt), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let mut receipt = CommitReceipt::default();

        order.version += 1;
        let result = sqlx::query(
            "INSERT INTO orders (customer_name, phone, address, manager_name, structured_data,
                                 version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&order.customer_name)
        .bind(&order.phone)
        .bind(&order.address)
        .bind(&order.manager_name)
        .bind(encode_document(&order)?)
        .bind(i64::from(order.version))
        .bind(order.created_at.to_rfc3339())
        .bind(order.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        order.id = OrderId(result.last_insert_rowid());
        receipt.order_version = Some(order.version);

        changes.order = None;
        changes.attach_to(order.id);
        write_rows(&mut tx, changes, &mut receipt).await?;
        tx.commit().await?;
        Ok((order, receipt))
    }
}

/// Appends events, tasks and logs inside `tx`; a guarded task update that
/// matches no row aborts with [`RepositoryError::TaskConflict`].
async fn write_rows(
    tx: &mut Transaction<'_, Sqlite>,
    changes: ChangeSet,
    receipt: &mut CommitReceipt,
) -> Result<(), RepositoryError> {
    for event in changes.events {
        receipt.events.push(insert_event(&mut **tx, event).await?);
    }
    for task in changes.new_tasks {
        receipt.tasks.push(insert_task(&mut **tx, task).await?);
    }
    for update in changes.task_updates {
        if !update_task_status(&mut **tx, &update).await? {
            let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM order_tasks WHERE id = ?")
                .bind(update.task.id.0)
                .fetch_optional(&mut **tx)
                .await?;
            return Err(match exists {
                Some(_) => RepositoryError::TaskConflict {
                    task_id: update.task.id,
                    expected: update.expected_status,
                },
                None => RepositoryError::TaskNotFound(update.task.id),
            });
        }
        receipt.tasks.push(update.task);
    }
    for entry in changes.security_logs {
        receipt.security_logs.push(insert_security_log(&mut **tx, entry).await?);
    }
    Ok(())
}
