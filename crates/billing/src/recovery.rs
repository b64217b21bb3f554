//! Recovery for events that never completed reconciliation
//!
//! The receiver stores events before handing them off, so a crash between
//! store and reconcile leaves an unprocessed row behind. Two paths drain
//! that backlog: a batch sweep run from the worker, and an on-demand pass
//! scoped to one user when a subscription read finds nothing.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::BillingResult;
use crate::events::WebhookEventRecord;
use crate::reconciler::{ReconcileOutcome, Reconciler, SkipReason};
use crate::store::BillingStore;

/// Age past which an unprocessed event is flagged as stale. A healthy
/// pipeline drains events within seconds; anything this old points at a
/// systemic failure, not a transient one.
pub const STALE_EVENT_THRESHOLD: Duration = Duration::from_secs(24 * 60 * 60);

/// Tally of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub scanned: usize,
    pub reconciled: usize,
    pub skipped: usize,
    pub failed: usize,
    pub stale: usize,
}

impl SweepSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Clone)]
pub struct RecoveryCoordinator {
    store: Arc<dyn BillingStore>,
    reconciler: Arc<Reconciler>,
}

impl RecoveryCoordinator {
    pub fn new(store: Arc<dyn BillingStore>, reconciler: Arc<Reconciler>) -> Self {
        Self { store, reconciler }
    }

    /// Reconcile up to `limit` unprocessed events, oldest first. Failures
    /// are counted but never abort the pass: one poison event must not
    /// block the rest of the backlog.
    pub async fn sweep(&self, limit: i64) -> BillingResult<SweepSummary> {
        let events = self.store.unprocessed_events(limit).await?;
        let mut summary = SweepSummary::default();

        for event in events {
            summary.scanned += 1;

            if is_stale(&event) {
                summary.stale += 1;
                tracing::warn!(
                    event_id = %event.id,
                    event_name = %event.event_name,
                    created_at = %event.created_at,
                    "Unprocessed webhook event is stale"
                );
            }

            match self.reconciler.reconcile_event(event.id).await {
                Ok(ReconcileOutcome::Reconciled { .. }) => summary.reconciled += 1,
                Ok(ReconcileOutcome::Skipped(_)) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(
                        event_id = %event.id,
                        event_name = %event.event_name,
                        error = %e,
                        "Recovery sweep failed to reconcile event"
                    );
                }
            }
        }

        tracing::info!(
            scanned = summary.scanned,
            reconciled = summary.reconciled,
            skipped = summary.skipped,
            failed = summary.failed,
            stale = summary.stale,
            "Recovery sweep complete"
        );
        Ok(summary)
    }

    /// Reconcile every unprocessed event attributed to one user. Unlike the
    /// batch sweep this propagates the first failure, so the caller knows
    /// the user's state may still be incomplete. Returns the number of
    /// pending events found; a nonzero count means subscription state may
    /// have changed even when every event was a safe skip (another path may
    /// have reconciled it in between).
    pub async fn recover_user(&self, user_id: Uuid) -> BillingResult<usize> {
        let events = self.store.unprocessed_events_for_user(user_id).await?;
        if events.is_empty() {
            return Ok(0);
        }

        tracing::info!(
            user_id = %user_id,
            pending = events.len(),
            "Recovering pending webhook events for user"
        );

        let found = events.len();
        for event in events {
            self.reconciler.reconcile_event(event.id).await?;
        }
        Ok(found)
    }

    /// Events that were reconciled and failed, newest first. Operator
    /// surface for inspecting what the sweep could not fix.
    pub async fn failed_events(&self, limit: i64) -> BillingResult<Vec<WebhookEventRecord>> {
        self.store.failed_events(limit).await
    }

    /// Clear a failed event's processed flag and reconcile it again.
    /// Intended for operator retries after the underlying cause (missing
    /// plan, provider outage) has been fixed.
    pub async fn retry_event(&self, event_id: Uuid) -> BillingResult<ReconcileOutcome> {
        let reset = self.store.reset_event_for_retry(event_id).await?;
        if !reset {
            tracing::debug!(event_id = %event_id, "Retry requested for event not in failed state");
            return Ok(ReconcileOutcome::Skipped(SkipReason::AlreadyProcessed));
        }
        self.reconciler.reconcile_event(event_id).await
    }
}

fn is_stale(event: &WebhookEventRecord) -> bool {
    let now = time::OffsetDateTime::now_utc();
    now - event.created_at > STALE_EVENT_THRESHOLD
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::client::{LemonSqueezyClient, LemonSqueezyConfig};
    use crate::testing::MemoryStore;
    use serde_json::json;
    use time::OffsetDateTime;

    #[test]
    fn test_sweep_summary_success() {
        let summary = SweepSummary {
            scanned: 5,
            reconciled: 3,
            skipped: 2,
            failed: 0,
            stale: 1,
        };
        assert!(summary.all_succeeded());

        let summary = SweepSummary {
            failed: 1,
            ..SweepSummary::default()
        };
        assert!(!summary.all_succeeded());
    }

    fn offline_client() -> LemonSqueezyClient {
        LemonSqueezyClient::new(LemonSqueezyConfig {
            api_key: "test-key".to_string(),
            store_id: "1".to_string(),
            webhook_secret: "whsec".to_string(),
            api_base: "http://127.0.0.1:1".to_string(),
        })
        .unwrap()
    }

    fn coordinator(store: Arc<MemoryStore>) -> RecoveryCoordinator {
        let reconciler = Arc::new(Reconciler::new(store.clone(), offline_client()));
        RecoveryCoordinator::new(store, reconciler)
    }

    fn lifecycle_body(user_id: Uuid, external_id: &str, variant_id: &str) -> serde_json::Value {
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
                    "status": "active",
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
    async fn test_sweep_tallies_outcomes_and_continues_past_failures() {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        store.add_plan("v1", "1900").await;

        // One reconcilable, one poison (unknown plan), one safe skip.
        store
            .add_event(
                "subscription_created",
                Some(user_id),
                lifecycle_body(user_id, "sub_1", "v1"),
            )
            .await;
        store
            .add_event(
                "subscription_created",
                Some(user_id),
                lifecycle_body(user_id, "sub_2", "v-unknown"),
            )
            .await;
        store
            .add_event(
                "order_created",
                None,
                json!({"meta": {"event_name": "order_created"}}),
            )
            .await;

        let summary = coordinator(store.clone()).sweep(100).await.unwrap();

        assert_eq!(summary.scanned, 3);
        assert_eq!(summary.reconciled, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.all_succeeded());
        // The poison event did not block the reconcilable one.
        assert_eq!(store.subscription_count().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_flags_stale_events() {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        store.add_plan("v1", "1900").await;
        store
            .add_event_at(
                "subscription_created",
                Some(user_id),
                lifecycle_body(user_id, "sub_1", "v1"),
                OffsetDateTime::now_utc() - time::Duration::hours(25),
            )
            .await;

        let summary = coordinator(store).sweep(100).await.unwrap();

        assert_eq!(summary.stale, 1);
        // Stale is a flag, not a failure: the event still reconciles.
        assert_eq!(summary.reconciled, 1);
    }

    #[tokio::test]
    async fn test_recover_user_reports_pending_count() {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        let other_user = Uuid::new_v4();
        store.add_plan("v1", "1900").await;
        store
            .add_event(
                "subscription_created",
                Some(user_id),
                lifecycle_body(user_id, "sub_1", "v1"),
            )
            .await;
        store
            .add_event(
                "subscription_created",
                Some(other_user),
                lifecycle_body(other_user, "sub_2", "v1"),
            )
            .await;

        let recovery = coordinator(store.clone());
        let found = recovery.recover_user(user_id).await.unwrap();

        assert_eq!(found, 1);
        assert!(store.subscription_by_external_id("sub_1").await.is_some());
        // The other user's event stays pending.
        assert!(store.subscription_by_external_id("sub_2").await.is_none());
    }

    #[tokio::test]
    async fn test_retry_event_after_cause_fixed() {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        let event_id = store
            .add_event(
                "subscription_created",
                Some(user_id),
                lifecycle_body(user_id, "sub_1", "v1"),
            )
            .await;

        let recovery = coordinator(store.clone());

        // First attempt fails: the plan catalog has no v1 yet.
        recovery.sweep(100).await.unwrap();
        let failed = recovery.failed_events(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, event_id);

        // Operator syncs the catalog, then retries.
        store.add_plan("v1", "1900").await;
        let outcome = recovery.retry_event(event_id).await.unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Reconciled { .. }));
        let event = store.event_snapshot(event_id).await.unwrap();
        assert!(event.processed);
        assert!(event.processing_error.is_none());
        assert!(recovery.failed_events(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_refused_for_event_not_in_failed_state() {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        store.add_plan("v1", "1900").await;
        let event_id = store
            .add_event(
                "subscription_created",
                Some(user_id),
                lifecycle_body(user_id, "sub_1", "v1"),
            )
            .await;

        let recovery = coordinator(store.clone());
        recovery.sweep(100).await.unwrap();

        // Successfully processed; a retry must not reset it.
        let outcome = recovery.retry_event(event_id).await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Skipped(SkipReason::AlreadyProcessed)
        );
        assert!(store.event_snapshot(event_id).await.unwrap().processed);
    }
}
