//! Local subscription records
//!
//! The reconciler is the only writer of this table. Rows are keyed by the
//! provider's subscription id and updated in place: last write wins, and
//! cancellation is a status value rather than a deletion.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::plans::Plan;

/// Statuses that grant feature access.
pub const ENTITLED_STATUSES: [&str; 3] = ["active", "on_trial", "past_due"];

pub fn is_entitled(status: &str) -> bool {
    ENTITLED_STATUSES.contains(&status)
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Subscription {
    pub id: Uuid,
    pub lemon_squeezy_id: String,
    pub order_id: String,
    pub customer_id: String,
    pub status: String,
    pub status_formatted: String,
    pub renews_at: Option<OffsetDateTime>,
    pub ends_at: Option<OffsetDateTime>,
    pub trial_ends_at: Option<OffsetDateTime>,
    pub price: String,
    pub update_payment_method_url: Option<String>,
    pub customer_portal_url: Option<String>,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Field set for an upsert; everything the reconciler derives from one
/// verified payload.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub lemon_squeezy_id: String,
    pub order_id: String,
    pub customer_id: String,
    pub status: String,
    pub status_formatted: String,
    pub renews_at: Option<OffsetDateTime>,
    pub ends_at: Option<OffsetDateTime>,
    pub trial_ends_at: Option<OffsetDateTime>,
    pub price: String,
    pub update_payment_method_url: Option<String>,
    pub customer_portal_url: Option<String>,
    pub user_id: Uuid,
    pub plan_id: Uuid,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SubscriptionWithPlan {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub plan: Plan,
}

#[derive(Clone)]
pub struct SubscriptionService {
    pool: PgPool,
}

impl SubscriptionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert-or-update keyed by the provider's subscription id. All mutable
    /// fields take the new payload's values; the row id and created_at are
    /// preserved across updates.
    pub async fn upsert(&self, new: &NewSubscription) -> BillingResult<Subscription> {
        let subscription = sqlx::query_as(
            r#"
            INSERT INTO subscriptions (
                lemon_squeezy_id, order_id, customer_id, status, status_formatted,
                renews_at, ends_at, trial_ends_at, price,
                update_payment_method_url, customer_portal_url, user_id, plan_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (lemon_squeezy_id) DO UPDATE SET
                order_id = EXCLUDED.order_id,
                customer_id = EXCLUDED.customer_id,
                status = EXCLUDED.status,
                status_formatted = EXCLUDED.status_formatted,
                renews_at = EXCLUDED.renews_at,
                ends_at = EXCLUDED.ends_at,
                trial_ends_at = EXCLUDED.trial_ends_at,
                price = EXCLUDED.price,
                update_payment_method_url = EXCLUDED.update_payment_method_url,
                customer_portal_url = EXCLUDED.customer_portal_url,
                user_id = EXCLUDED.user_id,
                plan_id = EXCLUDED.plan_id,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(&new.lemon_squeezy_id)
        .bind(&new.order_id)
        .bind(&new.customer_id)
        .bind(&new.status)
        .bind(&new.status_formatted)
        .bind(new.renews_at)
        .bind(new.ends_at)
        .bind(new.trial_ends_at)
        .bind(&new.price)
        .bind(new.update_payment_method_url.as_deref())
        .bind(new.customer_portal_url.as_deref())
        .bind(new.user_id)
        .bind(new.plan_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(subscription)
    }

    /// The user's currently entitled subscription joined with its plan, if
    /// any. Cancelled and expired rows are excluded by the status filter.
    pub async fn entitled_for_user(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Option<SubscriptionWithPlan>> {
        let subscription: Option<Subscription> = sqlx::query_as(
            r#"
            SELECT * FROM subscriptions
            WHERE user_id = $1 AND status = ANY($2)
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(&ENTITLED_STATUSES[..])
        .fetch_optional(&self.pool)
        .await?;

        let Some(subscription) = subscription else {
            return Ok(None);
        };

        let plan: Plan = sqlx::query_as("SELECT * FROM plans WHERE id = $1")
            .bind(subscription.plan_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(Some(SubscriptionWithPlan { subscription, plan }))
    }
}
