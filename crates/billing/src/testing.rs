//! In-memory [`BillingStore`] for tests.
//!
//! Stores everything in memory so the reconcile flow can be exercised
//! without a database. Available to downstream crates' tests via the
//! `test-util` feature.

use std::collections::HashMap;

use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::events::WebhookEventRecord;
use crate::plans::Plan;
use crate::store::BillingStore;
use crate::subscriptions::{
    is_entitled, NewSubscription, Subscription, SubscriptionWithPlan,
};

#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<HashMap<Uuid, WebhookEventRecord>>,
    plans: RwLock<Vec<Plan>>,
    subscriptions: RwLock<HashMap<String, Subscription>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a plan for the given variant id.
    pub async fn add_plan(&self, variant_id: &str, price: &str) -> Plan {
        let now = OffsetDateTime::now_utc();
        let plan = Plan {
            id: Uuid::new_v4(),
            variant_id: variant_id.to_string(),
            name: format!("Plan {}", variant_id),
            description: None,
            price: price.to_string(),
            interval: "month".to_string(),
            is_active: true,
            sort: 0,
            created_at: now,
            updated_at: now,
        };
        self.plans.write().await.push(plan.clone());
        plan
    }

    /// Seed an event with an explicit creation time (for staleness tests).
    pub async fn add_event_at(
        &self,
        event_name: &str,
        user_id: Option<Uuid>,
        body: serde_json::Value,
        created_at: OffsetDateTime,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let record = WebhookEventRecord {
            id,
            event_name: event_name.to_string(),
            user_id,
            body,
            processed: false,
            processing_error: None,
            created_at,
            processed_at: None,
        };
        self.events.write().await.insert(id, record);
        id
    }

    pub async fn add_event(
        &self,
        event_name: &str,
        user_id: Option<Uuid>,
        body: serde_json::Value,
    ) -> Uuid {
        self.add_event_at(event_name, user_id, body, OffsetDateTime::now_utc())
            .await
    }

    pub async fn event_snapshot(&self, id: Uuid) -> Option<WebhookEventRecord> {
        self.events.read().await.get(&id).cloned()
    }

    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    pub async fn subscription_by_external_id(&self, external_id: &str) -> Option<Subscription> {
        self.subscriptions.read().await.get(external_id).cloned()
    }
}

#[async_trait::async_trait]
impl BillingStore for MemoryStore {
    async fn store_event(
        &self,
        event_name: &str,
        user_id: Option<Uuid>,
        body: &serde_json::Value,
    ) -> BillingResult<Uuid> {
        Ok(self.add_event(event_name, user_id, body.clone()).await)
    }

    async fn event(&self, id: Uuid) -> BillingResult<Option<WebhookEventRecord>> {
        Ok(self.events.read().await.get(&id).cloned())
    }

    async fn mark_event_processed(&self, id: Uuid, error: Option<&str>) -> BillingResult<()> {
        if let Some(record) = self.events.write().await.get_mut(&id) {
            record.processed = true;
            record.processing_error = error.map(str::to_string);
            record.processed_at = Some(OffsetDateTime::now_utc());
        }
        Ok(())
    }

    async fn unprocessed_events(&self, limit: i64) -> BillingResult<Vec<WebhookEventRecord>> {
        let mut events: Vec<_> = self
            .events
            .read()
            .await
            .values()
            .filter(|e| !e.processed)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn unprocessed_events_for_user(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Vec<WebhookEventRecord>> {
        let mut events: Vec<_> = self
            .events
            .read()
            .await
            .values()
            .filter(|e| !e.processed && e.user_id == Some(user_id))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }

    async fn failed_events(&self, limit: i64) -> BillingResult<Vec<WebhookEventRecord>> {
        let mut events: Vec<_> = self
            .events
            .read()
            .await
            .values()
            .filter(|e| e.processed && e.processing_error.is_some())
            .cloned()
            .collect();
        events.sort_by_key(|e| std::cmp::Reverse(e.processed_at));
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn reset_event_for_retry(&self, id: Uuid) -> BillingResult<bool> {
        if let Some(record) = self.events.write().await.get_mut(&id) {
            if record.processed && record.processing_error.is_some() {
                record.processed = false;
                record.processing_error = None;
                record.processed_at = None;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn plan_by_variant(&self, variant_id: &str) -> BillingResult<Option<Plan>> {
        Ok(self
            .plans
            .read()
            .await
            .iter()
            .find(|p| p.variant_id == variant_id)
            .cloned())
    }

    async fn upsert_subscription(&self, new: &NewSubscription) -> BillingResult<Subscription> {
        let mut subscriptions = self.subscriptions.write().await;
        let now = OffsetDateTime::now_utc();

        let subscription = match subscriptions.get(&new.lemon_squeezy_id) {
            Some(existing) => Subscription {
                id: existing.id,
                created_at: existing.created_at,
                lemon_squeezy_id: new.lemon_squeezy_id.clone(),
                order_id: new.order_id.clone(),
                customer_id: new.customer_id.clone(),
                status: new.status.clone(),
                status_formatted: new.status_formatted.clone(),
                renews_at: new.renews_at,
                ends_at: new.ends_at,
                trial_ends_at: new.trial_ends_at,
                price: new.price.clone(),
                update_payment_method_url: new.update_payment_method_url.clone(),
                customer_portal_url: new.customer_portal_url.clone(),
                user_id: new.user_id,
                plan_id: new.plan_id,
                updated_at: now,
            },
            None => Subscription {
                id: Uuid::new_v4(),
                lemon_squeezy_id: new.lemon_squeezy_id.clone(),
                order_id: new.order_id.clone(),
                customer_id: new.customer_id.clone(),
                status: new.status.clone(),
                status_formatted: new.status_formatted.clone(),
                renews_at: new.renews_at,
                ends_at: new.ends_at,
                trial_ends_at: new.trial_ends_at,
                price: new.price.clone(),
                update_payment_method_url: new.update_payment_method_url.clone(),
                customer_portal_url: new.customer_portal_url.clone(),
                user_id: new.user_id,
                plan_id: new.plan_id,
                created_at: now,
                updated_at: now,
            },
        };

        subscriptions.insert(new.lemon_squeezy_id.clone(), subscription.clone());
        Ok(subscription)
    }

    async fn entitled_subscription_for_user(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Option<SubscriptionWithPlan>> {
        let subscriptions = self.subscriptions.read().await;
        let Some(subscription) = subscriptions
            .values()
            .filter(|s| s.user_id == user_id && is_entitled(&s.status))
            .max_by_key(|s| s.updated_at)
            .cloned()
        else {
            return Ok(None);
        };

        let plan = self
            .plans
            .read()
            .await
            .iter()
            .find(|p| p.id == subscription.plan_id)
            .cloned()
            .ok_or_else(|| {
                crate::error::BillingError::Internal("plan missing for subscription".to_string())
            })?;

        Ok(Some(SubscriptionWithPlan { subscription, plan }))
    }
}
