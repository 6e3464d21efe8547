use sqlx::sqlite::SqliteRow;
use sqlx::Sqlite;

use foms_core::domain::event::{EventPayload, NewOrderEvent, OrderEvent, OrderEventId, OrderEventType};
use foms_core::domain::order::OrderId;
use foms_core::domain::user::UserId;

use super::{
    column, decode_code, parse_timestamp, unique_violation, OrderEventRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlOrderEventRepository {
    pool: DbPool,
}

impl SqlOrderEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_event(row: &SqliteRow) -> Result<OrderEvent, RepositoryError> {
    let event_type: String = column(row, "event_type")?;
    let payload: String = column(row, "payload")?;
    let created_by: Option<i64> = column(row, "created_by")?;
    let created_at: String = column(row, "created_at")?;

    Ok(OrderEvent {
        id: OrderEventId(column(row, "id")?),
        order_id: OrderId(column(row, "order_id")?),
        event_type: decode_code("event_type", &event_type, OrderEventType::parse)?,
        payload: serde_json::from_str::<EventPayload>(&payload)
            .map_err(|e| RepositoryError::Decode(format!("payload: {e}")))?,
        created_by: created_by.map(UserId),
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

pub(crate) async fn insert_event<'e, E>(
    executor: E,
    event: NewOrderEvent,
) -> Result<OrderEvent, RepositoryError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let payload = serde_json::to_string(&event.payload)
        .map_err(|e| RepositoryError::Decode(format!("payload: {e}")))?;

    let result = sqlx::query(
        "INSERT INTO order_events (order_id, event_type, payload, reverted_event_id, created_by, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(event.order_id.0)
    .bind(event.event_type.as_str())
    .bind(payload)
    .bind(event.payload.reverted_event_id.map(|id| id.0))
    .bind(event.created_by.map(|id| id.0))
    .bind(event.created_at.to_rfc3339())
    .execute(executor)
    .await
    .map_err(unique_violation("revert of an already reverted event"))?;

    Ok(event.into_event(OrderEventId(result.last_insert_rowid())))
}

#[async_trait::async_trait]
impl OrderEventRepository for SqlOrderEventRepository {
    async fn find_by_id(&self, id: OrderEventId) -> Result<Option<OrderEvent>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, order_id, event_type, payload, created_by, created_at
             FROM order_events WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_event).transpose()
    }

    async fn list_for_order(&self, order_id: OrderId) -> Result<Vec<OrderEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, order_id, event_type, payload, created_by, created_at
             FROM order_events WHERE order_id = ? ORDER BY id",
        )
        .bind(order_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }

    async fn find_revert_of(&self, id: OrderEventId) -> Result<Option<OrderEvent>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, order_id, event_type, payload, created_by, created_at
             FROM order_events WHERE reverted_event_id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_event).transpose()
    }
}
