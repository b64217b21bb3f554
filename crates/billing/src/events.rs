//! Durable webhook event store
//!
//! Every verified delivery gets its own row before anything else happens.
//! Duplicates are stored as-is; reconciliation is idempotent downstream,
//! so deduplication at the store would only add a failure mode.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct WebhookEventRecord {
    pub id: Uuid,
    pub event_name: String,
    pub user_id: Option<Uuid>,
    pub body: serde_json::Value,
    pub processed: bool,
    pub processing_error: Option<String>,
    pub created_at: OffsetDateTime,
    pub processed_at: Option<OffsetDateTime>,
}

#[derive(Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist one delivery and return its id.
    pub async fn store(
        &self,
        event_name: &str,
        user_id: Option<Uuid>,
        body: &serde_json::Value,
    ) -> BillingResult<Uuid> {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO webhook_events (event_name, user_id, body)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(event_name)
        .bind(user_id)
        .bind(body)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> BillingResult<Option<WebhookEventRecord>> {
        let event = sqlx::query_as("SELECT * FROM webhook_events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(event)
    }

    /// Mark an event done. A `Some` error records a failed reconciliation;
    /// the processed flag is set either way so the synchronous path never
    /// re-attempts on its own.
    pub async fn mark_processed(&self, id: Uuid, error: Option<&str>) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET processed = TRUE, processing_error = $2, processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Unprocessed events, oldest first, for the recovery sweep.
    pub async fn unprocessed(&self, limit: i64) -> BillingResult<Vec<WebhookEventRecord>> {
        let events = sqlx::query_as(
            r#"
            SELECT * FROM webhook_events
            WHERE processed = FALSE
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    /// Unprocessed events attributed to one user, oldest first.
    pub async fn unprocessed_for_user(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Vec<WebhookEventRecord>> {
        let events = sqlx::query_as(
            r#"
            SELECT * FROM webhook_events
            WHERE processed = FALSE AND user_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    /// Events whose reconciliation failed, newest first.
    pub async fn failed(&self, limit: i64) -> BillingResult<Vec<WebhookEventRecord>> {
        let events = sqlx::query_as(
            r#"
            SELECT * FROM webhook_events
            WHERE processed = TRUE AND processing_error IS NOT NULL
            ORDER BY processed_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    /// Clear the processed flag on a failed event so it can be reconciled
    /// again. Returns false if the event was not in the failed state.
    pub async fn reset_for_retry(&self, id: Uuid) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events
            SET processed = FALSE, processing_error = NULL, processed_at = NULL
            WHERE id = $1 AND processed = TRUE AND processing_error IS NOT NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
