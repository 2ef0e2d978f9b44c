//! Postgres-backed resource store.

use grist_outbox::OutboxEvent;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::models::{Resource, ResourceKind, ResourceStatus};
use crate::store::{ResourceStore, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS resources (
    id                 UUID PRIMARY KEY,
    owner_id           TEXT NOT NULL,
    name               TEXT NOT NULL,
    type               TEXT NOT NULL,
    url                TEXT,
    raw_content        BYTEA NOT NULL,
    extracted_content  TEXT NOT NULL,
    status             TEXT NOT NULL,
    created_at         TIMESTAMPTZ NOT NULL,
    updated_at         TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_resources_owner ON resources (owner_id);
CREATE INDEX IF NOT EXISTS idx_resources_status ON resources (status);
CREATE INDEX IF NOT EXISTS idx_resources_type ON resources (type);
CREATE INDEX IF NOT EXISTS idx_resources_created_at ON resources (created_at DESC);
"#;

const SELECT_COLUMNS: &str =
    "id, owner_id, name, type, url, raw_content, extracted_content, status, created_at, updated_at";

/// Create the `resources` table and its indexes when missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgResourceStore {
    pool: PgPool,
}

impl PgResourceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_resource(row: &PgRow) -> Result<Resource, StoreError> {
    let kind_raw: String = row.try_get("type")?;
    let kind = ResourceKind::parse(&kind_raw)
        .ok_or_else(|| StoreError::Database(format!("unknown resource type '{kind_raw}'")))?;
    let status_raw: String = row.try_get("status")?;
    let status = ResourceStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Database(format!("unknown resource status '{status_raw}'")))?;

    Ok(Resource {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        kind,
        url: row.try_get("url")?,
        raw_content: row.try_get("raw_content")?,
        extracted_content: row.try_get("extracted_content")?,
        status,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl ResourceStore for PgResourceStore {
    async fn create(&self, resource: &Resource, event: &OutboxEvent) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO resources
                (id, owner_id, name, type, url, raw_content, extracted_content, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(resource.id)
        .bind(&resource.owner_id)
        .bind(&resource.name)
        .bind(resource.kind.as_str())
        .bind(&resource.url)
        .bind(&resource.raw_content)
        .bind(&resource.extracted_content)
        .bind(resource.status.as_str())
        .bind(resource.created_at)
        .bind(resource.updated_at)
        .execute(&mut *tx)
        .await?;

        grist_outbox::pg::insert_in_tx(&mut tx, event).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, owner_id: &str, id: Uuid) -> Result<Option<Resource>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM resources WHERE owner_id = $1 AND id = $2"
        ))
        .bind(owner_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_resource).transpose()
    }

    async fn get_any(&self, id: Uuid) -> Result<Option<Resource>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM resources WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_resource).transpose()
    }

    async fn list(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Resource>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM resources
            WHERE owner_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(owner_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_resource).collect()
    }

    async fn update(
        &self,
        resource: &Resource,
        event: Option<&OutboxEvent>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE resources
            SET name = $2, url = $3, raw_content = $4, extracted_content = $5,
                status = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(resource.id)
        .bind(&resource.name)
        .bind(&resource.url)
        .bind(&resource.raw_content)
        .bind(&resource.extracted_content)
        .bind(resource.status.as_str())
        .bind(resource.updated_at)
        .execute(&mut *tx)
        .await?;

        if let Some(event) = event {
            grist_outbox::pg::insert_in_tx(&mut tx, event).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(
        &self,
        owner_id: &str,
        id: Uuid,
        event: &OutboxEvent,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let affected = sqlx::query("DELETE FROM resources WHERE owner_id = $1 AND id = $2")
            .bind(owner_id)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if affected == 0 {
            // Dropped transaction rolls back; no event row either.
            return Ok(false);
        }
        grist_outbox::pg::insert_in_tx(&mut tx, event).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        status: ResourceStatus,
    ) -> Result<Option<Resource>, StoreError> {
        let Some(current) = self.get_any(id).await? else {
            return Ok(None);
        };
        if !current.status.can_transition_to(status) {
            tracing::warn!(
                resource_id = %id,
                from = current.status.as_str(),
                to = status.as_str(),
                "ignoring disallowed status transition"
            );
            return Ok(Some(current));
        }

        // Optimistic guard: only move when the row still carries the status
        // we just read; a concurrent terminal transition wins and stays.
        sqlx::query(
            "UPDATE resources SET status = $2, updated_at = $3 WHERE id = $1 AND status = $4",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(chrono::Utc::now())
        .bind(current.status.as_str())
        .execute(&self.pool)
        .await?;

        self.get_any(id).await
    }
}
