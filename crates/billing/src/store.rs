//! Persistence seam for the pipeline
//!
//! The receiver, reconciler, and recovery coordinator all talk to storage
//! through this trait, so the reconcile flow can be exercised against an
//! in-memory store in tests. Production wiring uses [`PgBillingStore`].

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::events::{EventStore, WebhookEventRecord};
use crate::plans::{Plan, PlanCatalog};
use crate::subscriptions::{NewSubscription, Subscription, SubscriptionService, SubscriptionWithPlan};

#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Persist one delivery and return its id.
    async fn store_event(
        &self,
        event_name: &str,
        user_id: Option<Uuid>,
        body: &serde_json::Value,
    ) -> BillingResult<Uuid>;

    async fn event(&self, id: Uuid) -> BillingResult<Option<WebhookEventRecord>>;

    async fn mark_event_processed(&self, id: Uuid, error: Option<&str>) -> BillingResult<()>;

    /// Unprocessed events, oldest first.
    async fn unprocessed_events(&self, limit: i64) -> BillingResult<Vec<WebhookEventRecord>>;

    /// Unprocessed events attributed to one user, oldest first.
    async fn unprocessed_events_for_user(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Vec<WebhookEventRecord>>;

    /// Events whose reconciliation failed, newest first.
    async fn failed_events(&self, limit: i64) -> BillingResult<Vec<WebhookEventRecord>>;

    /// Clear the processed flag on a failed event. Returns false if the
    /// event was not in the failed state.
    async fn reset_event_for_retry(&self, id: Uuid) -> BillingResult<bool>;

    async fn plan_by_variant(&self, variant_id: &str) -> BillingResult<Option<Plan>>;

    async fn upsert_subscription(&self, new: &NewSubscription) -> BillingResult<Subscription>;

    /// The user's currently entitled subscription joined with its plan.
    async fn entitled_subscription_for_user(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Option<SubscriptionWithPlan>>;
}

/// Postgres-backed store, delegating to the per-table services.
#[derive(Clone)]
pub struct PgBillingStore {
    events: EventStore,
    plans: PlanCatalog,
    subscriptions: SubscriptionService,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            events: EventStore::new(pool.clone()),
            plans: PlanCatalog::new(pool.clone()),
            subscriptions: SubscriptionService::new(pool),
        }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn store_event(
        &self,
        event_name: &str,
        user_id: Option<Uuid>,
        body: &serde_json::Value,
    ) -> BillingResult<Uuid> {
        self.events.store(event_name, user_id, body).await
    }

    async fn event(&self, id: Uuid) -> BillingResult<Option<WebhookEventRecord>> {
        self.events.get(id).await
    }

    async fn mark_event_processed(&self, id: Uuid, error: Option<&str>) -> BillingResult<()> {
        self.events.mark_processed(id, error).await
    }

    async fn unprocessed_events(&self, limit: i64) -> BillingResult<Vec<WebhookEventRecord>> {
        self.events.unprocessed(limit).await
    }

    async fn unprocessed_events_for_user(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Vec<WebhookEventRecord>> {
        self.events.unprocessed_for_user(user_id).await
    }

    async fn failed_events(&self, limit: i64) -> BillingResult<Vec<WebhookEventRecord>> {
        self.events.failed(limit).await
    }

    async fn reset_event_for_retry(&self, id: Uuid) -> BillingResult<bool> {
        self.events.reset_for_retry(id).await
    }

    async fn plan_by_variant(&self, variant_id: &str) -> BillingResult<Option<Plan>> {
        self.plans.get_by_variant_id(variant_id).await
    }

    async fn upsert_subscription(&self, new: &NewSubscription) -> BillingResult<Subscription> {
        self.subscriptions.upsert(new).await
    }

    async fn entitled_subscription_for_user(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Option<SubscriptionWithPlan>> {
        self.subscriptions.entitled_for_user(user_id).await
    }
}
