//! Webhook receipt: verify, persist, hand off
//!
//! The receiver does the minimum needed to make a delivery durable. Full
//! payload parsing belongs to the reconciler; here we only pull out the
//! event name and the optional user attribution so the row is queryable.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::queue::ReconcileQueue;
use crate::store::BillingStore;

type HmacSha256 = Hmac<Sha256>;

/// Check a hex-encoded HMAC-SHA256 signature over the raw request body.
/// Comparison is constant-time so response timing leaks nothing about how
/// many signature bytes matched.
pub fn verify_signature(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Ok(provided) = hex::decode(signature_hex) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    expected.ct_eq(provided.as_slice()).into()
}

#[derive(Clone)]
pub struct WebhookHandler {
    secret: String,
    store: Arc<dyn BillingStore>,
    queue: ReconcileQueue,
}

impl WebhookHandler {
    pub fn new(secret: String, store: Arc<dyn BillingStore>, queue: ReconcileQueue) -> Self {
        Self {
            secret,
            store,
            queue,
        }
    }

    /// Accept one delivery: verify the signature, persist the event, then
    /// submit it for reconciliation. The store happens before the handoff,
    /// so a crash after this returns can lose the handoff but never the
    /// event.
    pub async fn receive(&self, raw_body: &[u8], signature: &str) -> BillingResult<Uuid> {
        if !verify_signature(&self.secret, raw_body, signature) {
            tracing::warn!("Rejected webhook with invalid signature");
            return Err(BillingError::SignatureInvalid);
        }

        let body: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|_| BillingError::validation("body", "request body is not valid JSON"))?;

        let event_name = body
            .pointer("/meta/event_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                BillingError::validation("meta.event_name", "missing or not a string")
            })?
            .to_string();

        // Attribution is optional at receipt time; the reconciler enforces
        // it for the events that need it.
        let user_id = body
            .pointer("/meta/custom_data/user_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());

        let event_id = self.store.store_event(&event_name, user_id, &body).await?;
        tracing::info!(
            event_id = %event_id,
            event_name = %event_name,
            "Stored webhook event"
        );

        self.queue.submit(event_id);
        Ok(event_id)
    }
}
