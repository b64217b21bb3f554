//! Plan catalog

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Plan {
    pub id: Uuid,
    pub variant_id: String,
    pub name: String,
    pub description: Option<String>,
    pub price: String,
    pub interval: String,
    pub is_active: bool,
    pub sort: i32,
    #[serde(skip_serializing)]
    pub created_at: OffsetDateTime,
    #[serde(skip_serializing)]
    pub updated_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct PlanCatalog {
    pool: PgPool,
}

impl PlanCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up a plan by the provider's variant id. Webhook payloads carry
    /// the variant, not our plan id, so this is the reconciler's join point.
    pub async fn get_by_variant_id(&self, variant_id: &str) -> BillingResult<Option<Plan>> {
        let plan = sqlx::query_as("SELECT * FROM plans WHERE variant_id = $1")
            .bind(variant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(plan)
    }

    /// Active plans in display order, for the public pricing endpoint.
    pub async fn list_active(&self) -> BillingResult<Vec<Plan>> {
        let plans = sqlx::query_as(
            r#"
            SELECT * FROM plans
            WHERE is_active = TRUE
            ORDER BY sort ASC, name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(plans)
    }
}
