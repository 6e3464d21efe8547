use sqlx::sqlite::SqliteRow;
use sqlx::Sqlite;

use foms_core::domain::order::OrderId;
use foms_core::domain::security::{NewSecurityLog, SecurityAction, SecurityLog};
use foms_core::domain::user::UserId;

use super::{column, decode_code, parse_timestamp, RepositoryError, SecurityLogRepository};
use crate::DbPool;

pub struct SqlSecurityLogRepository {
    pool: DbPool,
}

impl SqlSecurityLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_log(row: &SqliteRow) -> Result<SecurityLog, RepositoryError> {
    let action: String = column(row, "action")?;
    let created_at: String = column(row, "created_at")?;
    let user_id: Option<i64> = column(row, "user_id")?;
    let order_id: Option<i64> = column(row, "order_id")?;

    Ok(SecurityLog {
        id: column(row, "id")?,
        user_id: user_id.map(UserId),
        action: decode_code("action", &action, SecurityAction::parse)?,
        order_id: order_id.map(OrderId),
        detail: column(row, "detail")?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

pub(crate) async fn insert_security_log<'e, E>(
    executor: E,
    entry: NewSecurityLog,
) -> Result<SecurityLog, RepositoryError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT INTO security_logs (user_id, action, order_id, detail, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(entry.user_id.map(|id| id.0))
    .bind(entry.action.as_str())
    .bind(entry.order_id.map(|id| id.0))
    .bind(&entry.detail)
    .bind(entry.created_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(SecurityLog {
        id: result.last_insert_rowid(),
        user_id: entry.user_id,
        action: entry.action,
        order_id: entry.order_id,
        detail: entry.detail,
        created_at: entry.created_at,
    })
}

#[async_trait::async_trait]
impl SecurityLogRepository for SqlSecurityLogRepository {
    async fn append(&self, entry: NewSecurityLog) -> Result<SecurityLog, RepositoryError> {
        insert_security_log(&self.pool, entry).await
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<SecurityLog>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, user_id, action, order_id, detail, created_at
             FROM security_logs ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_log).collect()
    }
}
