use std::collections::BTreeSet;

use sqlx::sqlite::SqliteRow;
use sqlx::Sqlite;

use foms_core::domain::order::OrderId;
use foms_core::domain::task::{NewOrderTask, OrderTask, OrderTaskId, TaskStatus};
use foms_core::domain::user::{Team, UserId};

use super::{
    column, decode_code, parse_optional_date, parse_optional_timestamp, parse_timestamp,
    unique_violation, OrderTaskRepository, RepositoryError, TaskUpdate,
};
use crate::DbPool;

pub struct SqlOrderTaskRepository {
    pool: DbPool,
}

impl SqlOrderTaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_task(row: &SqliteRow) -> Result<OrderTask, RepositoryError> {
    let status: String = column(row, "status")?;
    let owner_team: Option<String> = column(row, "owner_team")?;
    let owner_user_id: Option<i64> = column(row, "owner_user_id")?;
    let created_by: Option<i64> = column(row, "created_by")?;
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;

    Ok(OrderTask {
        id: OrderTaskId(column(row, "id")?),
        order_id: OrderId(column(row, "order_id")?),
        title: column(row, "title")?,
        description: column(row, "description")?,
        status: decode_code("status", &status, TaskStatus::parse)?,
        owner_team: owner_team
            .as_deref()
            .map(|team| decode_code("owner_team", team, Team::parse))
            .transpose()?,
        owner_user_id: owner_user_id.map(UserId),
        due_date: parse_optional_date("due_date", column(row, "due_date")?)?,
        sla_key: column(row, "sla_key")?,
        created_by: created_by.map(UserId),
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
        completed_at: parse_optional_timestamp("completed_at", column(row, "completed_at")?)?,
    })
}

pub(crate) async fn insert_task<'e, E>(
    executor: E,
    task: NewOrderTask,
) -> Result<OrderTask, RepositoryError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT INTO order_tasks (order_id, title, description, status, owner_team, owner_user_id,
                                  due_date, sla_key, created_by, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(task.order_id.0)
    .bind(&task.title)
    .bind(&task.description)
    .bind(TaskStatus::Open.as_str())
    .bind(task.owner_team.map(|team| team.as_str()))
    .bind(task.owner_user_id.map(|id| id.0))
    .bind(task.due_date.map(|date| date.format("%Y-%m-%d").to_string()))
    .bind(&task.sla_key)
    .bind(task.created_by.map(|id| id.0))
    .bind(task.created_at.to_rfc3339())
    .bind(task.created_at.to_rfc3339())
    .execute(executor)
    .await
    .map_err(unique_violation("SLA task key"))?;

    Ok(task.into_task(OrderTaskId(result.last_insert_rowid())))
}

/// Writes the new status only while the row still holds `expected_status`.
/// Returns whether a row was updated.
pub(crate) async fn update_task_status<'e, E>(
    executor: E,
    update: &TaskUpdate,
) -> Result<bool, RepositoryError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let task = &update.task;
    let result = sqlx::query(
        "UPDATE order_tasks
         SET status = ?, owner_user_id = ?, updated_at = ?, completed_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(task.status.as_str())
    .bind(task.owner_user_id.map(|id| id.0))
    .bind(task.updated_at.to_rfc3339())
    .bind(task.completed_at.map(|at| at.to_rfc3339()))
    .bind(task.id.0)
    .bind(update.expected_status.as_str())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[async_trait::async_trait]
impl OrderTaskRepository for SqlOrderTaskRepository {
    async fn find_by_id(&self, id: OrderTaskId) -> Result<Option<OrderTask>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, order_id, title, description, status, owner_team, owner_user_id,
                    due_date, sla_key, created_by, created_at, updated_at, completed_at
             FROM order_tasks WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_task).transpose()
    }

    async fn list_for_order(&self, order_id: OrderId) -> Result<Vec<OrderTask>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, order_id, title, description, status, owner_team, owner_user_id,
                    due_date, sla_key, created_by, created_at, updated_at, completed_at
             FROM order_tasks WHERE order_id = ? ORDER BY id",
        )
        .bind(order_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_task).collect()
    }

    async fn sla_keys(&self, order_id: OrderId) -> Result<BTreeSet<String>, RepositoryError> {
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT sla_key FROM order_tasks WHERE order_id = ? AND sla_key IS NOT NULL",
        )
        .bind(order_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys.into_iter().collect())
    }
}
