//! Postgres-backed outbox store.

use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::{OutboxError, OutboxEvent, OutboxStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id          UUID PRIMARY KEY,
    name        TEXT NOT NULL,
    topic       TEXT NOT NULL,
    key         TEXT NOT NULL DEFAULT '',
    payload     BYTEA NOT NULL,
    sent        BOOLEAN NOT NULL DEFAULT FALSE,
    event_time  TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_sent ON events (sent);
CREATE INDEX IF NOT EXISTS idx_events_topic ON events (topic);
CREATE INDEX IF NOT EXISTS idx_events_event_time ON events (event_time DESC);
"#;

const INSERT: &str = r#"
INSERT INTO events (id, name, topic, key, payload, sent, event_time)
VALUES ($1, $2, $3, $4, $5, $6, $7)
"#;

/// Create the `events` table and its indexes when missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), OutboxError> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

/// Insert an event row inside the caller's transaction.
///
/// This is the atomic half of the outbox contract: the business row and the
/// event row commit or roll back together.
pub async fn insert_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    event: &OutboxEvent,
) -> Result<(), OutboxError> {
    sqlx::query(INSERT)
        .bind(event.id)
        .bind(&event.name)
        .bind(&event.topic)
        .bind(&event.key)
        .bind(&event.payload)
        .bind(event.sent)
        .bind(event.event_time)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl OutboxStore for PgOutboxStore {
    async fn insert(&self, event: &OutboxEvent) -> Result<(), OutboxError> {
        sqlx::query(INSERT)
            .bind(event.id)
            .bind(&event.name)
            .bind(&event.topic)
            .bind(&event.key)
            .bind(&event.payload)
            .bind(event.sent)
            .bind(event.event_time)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_unsent(&self, limit: i64, offset: i64) -> Result<Vec<OutboxEvent>, OutboxError> {
        let rows = sqlx::query_as::<_, OutboxEvent>(
            r#"
            SELECT id, name, topic, key, payload, sent, event_time
            FROM events
            WHERE sent = FALSE
            ORDER BY event_time ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), OutboxError> {
        // Sent rows are immutable; the guard makes the update idempotent.
        sqlx::query("UPDATE events SET sent = TRUE WHERE id = $1 AND sent = FALSE")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
