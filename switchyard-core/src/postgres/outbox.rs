use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgExecutor};
use switchyard_model::{NewOutboxEvent, OutboxEvent};
use tracing::trace;

use super::PostgresSchedulerStore;
use crate::error::Result;
use crate::ports::{OutboxRepository, outbox_page_size};

#[derive(Debug, FromRow)]
struct OutboxRow {
    id: i64,
    event_type: String,
    account_id: Option<i64>,
    group_id: Option<i64>,
    payload: Option<Value>,
    created_at: DateTime<Utc>,
}

impl From<OutboxRow> for OutboxEvent {
    fn from(row: OutboxRow) -> Self {
        OutboxEvent {
            id: row.id,
            event_type: row.event_type,
            account_id: row.account_id,
            group_id: row.group_id,
            payload: row.payload,
            created_at: row.created_at,
        }
    }
}

/// Appends an event using `executor`. Pass the transaction that performs the
/// row change so the event commits (or rolls back) together with it.
pub async fn enqueue_outbox<'e, E>(executor: E, event: &NewOutboxEvent) -> Result<i64>
where
    E: PgExecutor<'e>,
{
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO scheduler_outbox (event_type, account_id, group_id, payload)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(event.event_type.as_str())
    .bind(event.account_id)
    .bind(event.group_id)
    .bind(&event.payload)
    .fetch_one(executor)
    .await?;

    trace!(outbox_id = id, event_type = %event.event_type, "outbox event enqueued");
    Ok(id)
}

#[async_trait]
impl OutboxRepository for PostgresSchedulerStore {
    async fn list_after(&self, after_id: i64, limit: i64) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, event_type, account_id, group_id, payload, created_at
            FROM scheduler_outbox
            WHERE id > $1
            ORDER BY id ASC
            LIMIT $2
            "#,
        )
        .bind(after_id)
        .bind(outbox_page_size(limit))
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(OutboxEvent::from).collect())
    }

    async fn max_id(&self) -> Result<i64> {
        let (max,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(id), 0) FROM scheduler_outbox")
                .fetch_one(self.pool())
                .await?;
        Ok(max)
    }
}
