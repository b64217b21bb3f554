//! In-process handoff between the webhook receiver and the reconciler
//!
//! The receiver must acknowledge quickly, so reconciliation runs on a
//! dedicated task fed by an unbounded channel. Delivery is best-effort by
//! design: the event row is already durable before submit, and anything
//! that never reaches the worker is picked up by the recovery sweep.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::reconciler::{ReconcileOutcome, Reconciler};

#[derive(Clone)]
pub struct ReconcileQueue {
    tx: mpsc::UnboundedSender<Uuid>,
}

impl ReconcileQueue {
    /// Spawn the worker task and return its submit handle.
    pub fn start(reconciler: Arc<Reconciler>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Uuid>();

        tokio::spawn(async move {
            while let Some(event_id) = rx.recv().await {
                match reconciler.reconcile_event(event_id).await {
                    Ok(ReconcileOutcome::Reconciled { .. }) => {}
                    Ok(ReconcileOutcome::Skipped(reason)) => {
                        tracing::debug!(
                            event_id = %event_id,
                            reason = %reason,
                            "Queued event skipped"
                        );
                    }
                    Err(e) => {
                        // Already recorded on the event row; surfaced here
                        // for operators watching the logs.
                        tracing::error!(
                            event_id = %event_id,
                            error = %e,
                            "Queued reconciliation failed"
                        );
                    }
                }
            }
            tracing::info!("Reconcile queue drained, worker task exiting");
        });

        Self { tx }
    }

    /// Enqueue a stored event for reconciliation. Never blocks and never
    /// fails the caller: if the worker task is gone, the event stays
    /// unprocessed and the recovery sweep will claim it.
    pub fn submit(&self, event_id: Uuid) {
        if self.tx.send(event_id).is_err() {
            tracing::error!(
                event_id = %event_id,
                "Reconcile queue is closed; event left for recovery sweep"
            );
        }
    }
}
