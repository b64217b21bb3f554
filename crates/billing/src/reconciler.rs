//! Subscription reconciler
//!
//! Maps one stored webhook event into authoritative local subscription
//! state. Reconciliation is idempotent: the processed flag guards against
//! re-delivery and re-triggered recovery, and the subscription upsert is
//! keyed by the provider's subscription id, so re-running a duplicate
//! delivery converges on the same row.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::client::LemonSqueezyClient;
use crate::error::{BillingError, BillingResult};
use crate::events::WebhookEventRecord;
use crate::payload::{SubscriptionAttributes, WebhookPayload};
use crate::store::BillingStore;
use crate::subscriptions::NewSubscription;

/// Why an event produced no subscription write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The idempotency guard: someone already reconciled this row.
    AlreadyProcessed,
    /// Not a subscription lifecycle event; acknowledged and ignored.
    IgnoredEventType,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyProcessed => write!(f, "already processed"),
            SkipReason::IgnoredEventType => write!(f, "ignored event type"),
        }
    }
}

/// Outcome of one reconcile call. Explicit variants instead of exceptions:
/// skips are normal control flow, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Skipped(SkipReason),
    Reconciled { subscription_id: Uuid },
}

/// True for event names the reconciler acts on. Payment-success events
/// (`subscription_payment_*`) carry invoice data, not lifecycle state, and
/// are acknowledged without a subscription write.
pub fn is_subscription_lifecycle_event(name: &str) -> bool {
    name.starts_with("subscription_") && !name.starts_with("subscription_payment_")
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn BillingStore>,
    client: LemonSqueezyClient,
}

impl Reconciler {
    pub fn new(store: Arc<dyn BillingStore>, client: LemonSqueezyClient) -> Self {
        Self { store, client }
    }

    /// Reconcile one stored event exactly once.
    ///
    /// On failure the event is marked processed with the error recorded, so
    /// the synchronous path never retries in a loop; the error is then
    /// re-raised for the caller to log or surface.
    pub async fn reconcile_event(&self, event_id: Uuid) -> BillingResult<ReconcileOutcome> {
        let event = self
            .store
            .event(event_id)
            .await?
            .ok_or(BillingError::EventNotFound(event_id))?;

        if event.processed {
            return Ok(ReconcileOutcome::Skipped(SkipReason::AlreadyProcessed));
        }

        if !is_subscription_lifecycle_event(&event.event_name) {
            self.store.mark_event_processed(event_id, None).await?;
            tracing::debug!(
                event_id = %event_id,
                event_name = %event.event_name,
                "Skipping non-lifecycle webhook event"
            );
            return Ok(ReconcileOutcome::Skipped(SkipReason::IgnoredEventType));
        }

        match self.apply(&event).await {
            Ok(subscription_id) => {
                self.store.mark_event_processed(event_id, None).await?;
                tracing::info!(
                    event_id = %event_id,
                    event_name = %event.event_name,
                    subscription_id = %subscription_id,
                    "Webhook event reconciled"
                );
                Ok(ReconcileOutcome::Reconciled { subscription_id })
            }
            Err(e) => {
                // The error must land on the event row even if it is also
                // re-raised; a failure recorded nowhere is a failure lost.
                if let Err(mark_err) = self
                    .store
                    .mark_event_processed(event_id, Some(&e.to_string()))
                    .await
                {
                    tracing::error!(
                        event_id = %event_id,
                        error = %mark_err,
                        "Failed to record reconciliation error on event row"
                    );
                }
                Err(e)
            }
        }
    }

    /// Map the payload into an upserted subscription row.
    async fn apply(&self, event: &WebhookEventRecord) -> BillingResult<Uuid> {
        let payload: WebhookPayload = serde_json::from_value(event.body.clone())
            .map_err(|e| BillingError::validation("body", format!("unparseable payload: {}", e)))?;

        let user_id = payload
            .meta
            .custom_data
            .as_ref()
            .and_then(|c| c.user_id.as_deref())
            .ok_or_else(|| {
                BillingError::validation(
                    "meta.custom_data.user_id",
                    "payload carries no user id; cannot attribute subscription",
                )
            })?;
        let user_id = Uuid::parse_str(user_id).map_err(|_| {
            BillingError::validation("meta.custom_data.user_id", "not a valid user id")
        })?;

        let attrs = &payload.data.attributes;

        let plan = self
            .store
            .plan_by_variant(&attrs.variant_id)
            .await?
            .ok_or_else(|| {
                BillingError::validation(
                    "variant_id",
                    format!(
                        "no local plan for variant {} (catalog sync gap?)",
                        attrs.variant_id
                    ),
                )
            })?;

        let price = self.resolve_price(attrs, &plan.price).await?;

        let status_formatted = attrs
            .status_formatted
            .clone()
            .unwrap_or_else(|| format_status(&attrs.status));

        let new = NewSubscription {
            lemon_squeezy_id: payload.data.id.clone(),
            order_id: attrs.order_id.clone(),
            customer_id: attrs.customer_id.clone(),
            status: attrs.status.clone(),
            status_formatted,
            renews_at: attrs.renews_at,
            ends_at: attrs.ends_at,
            trial_ends_at: attrs.trial_ends_at,
            price,
            update_payment_method_url: attrs
                .urls
                .as_ref()
                .and_then(|u| u.update_payment_method.clone()),
            customer_portal_url: attrs.urls.as_ref().and_then(|u| u.customer_portal.clone()),
            user_id,
            plan_id: plan.id,
        };

        let subscription = self.store.upsert_subscription(&new).await?;
        Ok(subscription.id)
    }

    /// The price recorded on the subscription row. Prefers a price already
    /// present in the payload; otherwise fetches current price data from the
    /// provider. An enrichment failure is a hard failure; an incomplete
    /// subscription record misrepresents billing state.
    async fn resolve_price(
        &self,
        attrs: &SubscriptionAttributes,
        plan_price: &str,
    ) -> BillingResult<String> {
        let Some(item) = &attrs.first_subscription_item else {
            // No item on the payload at all; the catalog price is the best
            // available truth.
            return Ok(plan_price.to_string());
        };

        if let Some(price) = &item.price {
            return Ok(price.clone());
        }

        let price = self.client.get_price(&item.price_id).await?;
        price.as_stored().ok_or_else(|| {
            BillingError::ExternalApi(format!(
                "price {} returned neither unit_price nor unit_price_decimal",
                item.price_id
            ))
        })
    }
}

/// Human-readable fallback when the payload omits status_formatted.
fn format_status(status: &str) -> String {
    match status {
        "active" => "Active".to_string(),
        "on_trial" => "On Trial".to_string(),
        "past_due" => "Past Due".to_string(),
        "cancelled" => "Cancelled".to_string(),
        "expired" => "Expired".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::client::LemonSqueezyConfig;
    use crate::testing::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_lifecycle_event_classification() {
        assert!(is_subscription_lifecycle_event("subscription_created"));
        assert!(is_subscription_lifecycle_event("subscription_updated"));
        assert!(is_subscription_lifecycle_event("subscription_cancelled"));
        assert!(is_subscription_lifecycle_event("subscription_resumed"));
        assert!(is_subscription_lifecycle_event("subscription_expired"));
        assert!(is_subscription_lifecycle_event("subscription_paused"));

        // Payment events carry invoice data, not lifecycle state.
        assert!(!is_subscription_lifecycle_event(
            "subscription_payment_success"
        ));
        assert!(!is_subscription_lifecycle_event(
            "subscription_payment_failed"
        ));
        assert!(!is_subscription_lifecycle_event(
            "subscription_payment_recovered"
        ));

        assert!(!is_subscription_lifecycle_event("order_created"));
        assert!(!is_subscription_lifecycle_event("order_refunded"));
        assert!(!is_subscription_lifecycle_event("license_key_created"));
        assert!(!is_subscription_lifecycle_event(""));
    }

    #[test]
    fn test_format_status_fallback() {
        assert_eq!(format_status("on_trial"), "On Trial");
        assert_eq!(format_status("active"), "Active");
        // Open string domain: unknown statuses pass through untouched.
        assert_eq!(format_status("paused"), "paused");
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(
            SkipReason::AlreadyProcessed.to_string(),
            "already processed"
        );
        assert_eq!(SkipReason::IgnoredEventType.to_string(), "ignored event type");
    }

    fn offline_client() -> LemonSqueezyClient {
        LemonSqueezyClient::new(LemonSqueezyConfig {
            api_key: "test-key".to_string(),
            store_id: "1".to_string(),
            webhook_secret: "whsec".to_string(),
            // Unroutable; the payloads below never trigger an API call.
            api_base: "http://127.0.0.1:1".to_string(),
        })
        .unwrap()
    }

    fn lifecycle_body(user_id: Uuid, external_id: &str, variant_id: &str, status: &str) -> serde_json::Value {
        json!({
            "meta": {
                "event_name": "subscription_created",
                "custom_data": { "user_id": user_id.to_string() }
            },
            "data": {
                "id": external_id,
                "attributes": {
                    "variant_id": variant_id,
                    "customer_id": "c1",
                    "order_id": "o1",
                    "status": status,
                    "first_subscription_item": {
                        "price_id": "p1",
                        "is_usage_based": false,
                        "price": "1900"
                    }
                }
            }
        })
    }

    #[tokio::test]
    async fn test_reconcile_creates_subscription_and_marks_processed() {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        store.add_plan("v1", "1900").await;
        let event_id = store
            .add_event(
                "subscription_created",
                Some(user_id),
                lifecycle_body(user_id, "sub_1", "v1", "active"),
            )
            .await;

        let reconciler = Reconciler::new(store.clone(), offline_client());
        let outcome = reconciler.reconcile_event(event_id).await.unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Reconciled { .. }));

        let event = store.event_snapshot(event_id).await.unwrap();
        assert!(event.processed);
        assert!(event.processing_error.is_none());
        assert!(event.processed_at.is_some());

        let subscription = store.subscription_by_external_id("sub_1").await.unwrap();
        assert_eq!(subscription.status, "active");
        assert_eq!(subscription.user_id, user_id);
        assert_eq!(subscription.price, "1900");
    }

    #[tokio::test]
    async fn test_redelivered_event_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        store.add_plan("v1", "1900").await;
        let event_id = store
            .add_event(
                "subscription_created",
                Some(user_id),
                lifecycle_body(user_id, "sub_1", "v1", "active"),
            )
            .await;

        let reconciler = Reconciler::new(store.clone(), offline_client());
        let first = reconciler.reconcile_event(event_id).await.unwrap();
        let second = reconciler.reconcile_event(event_id).await.unwrap();

        assert!(matches!(first, ReconcileOutcome::Reconciled { .. }));
        assert_eq!(
            second,
            ReconcileOutcome::Skipped(SkipReason::AlreadyProcessed)
        );
        assert_eq!(store.subscription_count().await, 1);
    }

    #[tokio::test]
    async fn test_upsert_keyed_by_external_id() {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        store.add_plan("v1", "1900").await;

        let created = store
            .add_event(
                "subscription_created",
                Some(user_id),
                lifecycle_body(user_id, "sub_1", "v1", "active"),
            )
            .await;
        let cancelled = store
            .add_event(
                "subscription_cancelled",
                Some(user_id),
                lifecycle_body(user_id, "sub_1", "v1", "cancelled"),
            )
            .await;

        let reconciler = Reconciler::new(store.clone(), offline_client());
        reconciler.reconcile_event(created).await.unwrap();
        reconciler.reconcile_event(cancelled).await.unwrap();

        // Same external id: one row, latest payload's state.
        assert_eq!(store.subscription_count().await, 1);
        let subscription = store.subscription_by_external_id("sub_1").await.unwrap();
        assert_eq!(subscription.status, "cancelled");
    }

    #[tokio::test]
    async fn test_unknown_variant_records_failure_and_reraises() {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        let event_id = store
            .add_event(
                "subscription_created",
                Some(user_id),
                lifecycle_body(user_id, "sub_1", "v-unknown", "active"),
            )
            .await;

        let reconciler = Reconciler::new(store.clone(), offline_client());
        let err = reconciler.reconcile_event(event_id).await.unwrap_err();

        assert!(matches!(err, BillingError::Validation { .. }));
        let event = store.event_snapshot(event_id).await.unwrap();
        assert!(event.processed);
        assert!(event.processing_error.unwrap().contains("variant"));
        assert_eq!(store.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_user_attribution_is_hard_failure() {
        let store = Arc::new(MemoryStore::new());
        store.add_plan("v1", "1900").await;
        let event_id = store
            .add_event(
                "subscription_created",
                None,
                json!({
                    "meta": { "event_name": "subscription_created" },
                    "data": {
                        "id": "sub_1",
                        "attributes": {
                            "variant_id": "v1",
                            "customer_id": "c1",
                            "order_id": "o1",
                            "status": "active"
                        }
                    }
                }),
            )
            .await;

        let reconciler = Reconciler::new(store.clone(), offline_client());
        let err = reconciler.reconcile_event(event_id).await.unwrap_err();

        assert!(matches!(err, BillingError::Validation { .. }));
        let event = store.event_snapshot(event_id).await.unwrap();
        assert!(event.processed);
        assert!(event.processing_error.unwrap().contains("user id"));
    }

    #[tokio::test]
    async fn test_non_lifecycle_event_marked_processed_without_write() {
        let store = Arc::new(MemoryStore::new());
        let event_id = store
            .add_event("order_created", None, json!({"meta": {"event_name": "order_created"}}))
            .await;

        let reconciler = Reconciler::new(store.clone(), offline_client());
        let outcome = reconciler.reconcile_event(event_id).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Skipped(SkipReason::IgnoredEventType)
        );
        let event = store.event_snapshot(event_id).await.unwrap();
        assert!(event.processed);
        assert!(event.processing_error.is_none());
        assert_eq!(store.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_event_id_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store, offline_client());

        let err = reconciler.reconcile_event(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, BillingError::EventNotFound(_)));
    }
}
