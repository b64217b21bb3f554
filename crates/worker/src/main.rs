//! Launchkit Recovery Worker
//!
//! Operator entry points for the webhook recovery pipeline, one-shot by
//! design so each invocation fits a scheduler slot (cron, systemd timer,
//! or the platform's job runner):
//!
//!   launchkit-worker [sweep]      reconcile a batch of unprocessed events
//!   launchkit-worker failed       list events whose reconciliation failed
//!   launchkit-worker retry <id>   reset a failed event and reconcile it
//!
//! Exit code 1 signals a failure, so the scheduler's alerting fires.

use launchkit_billing::{BillingService, ReconcileOutcome};
use launchkit_shared::create_pool;
use tracing::{error, info, warn};
use uuid::Uuid;

const DEFAULT_BATCH_SIZE: i64 = 100;

fn batch_size() -> i64 {
    std::env::var("RECOVERY_BATCH_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_BATCH_SIZE)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url).await?;
    let billing = BillingService::from_env(pool)?;

    match args.first().map(String::as_str) {
        None | Some("sweep") => sweep(&billing).await,
        Some("failed") => list_failed(&billing).await,
        Some("retry") => {
            let id = args
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("usage: launchkit-worker retry <event-id>"))?;
            let event_id = Uuid::parse_str(id)
                .map_err(|_| anyhow::anyhow!("'{}' is not a valid event id", id))?;
            retry(&billing, event_id).await
        }
        Some(other) => anyhow::bail!(
            "unknown command '{}' (expected: sweep, failed, retry <event-id>)",
            other
        ),
    }
}

async fn sweep(billing: &BillingService) -> anyhow::Result<()> {
    info!("Starting recovery sweep");

    let summary = billing.recovery.sweep(batch_size()).await?;

    info!(
        scanned = summary.scanned,
        reconciled = summary.reconciled,
        skipped = summary.skipped,
        failed = summary.failed,
        stale = summary.stale,
        "Recovery sweep finished"
    );

    if !summary.all_succeeded() {
        error!(failed = summary.failed, "Some events failed to reconcile");
        std::process::exit(1);
    }

    Ok(())
}

async fn list_failed(billing: &BillingService) -> anyhow::Result<()> {
    let events = billing.recovery.failed_events(batch_size()).await?;

    if events.is_empty() {
        info!("No failed events");
        return Ok(());
    }

    for event in &events {
        warn!(
            event_id = %event.id,
            event_name = %event.event_name,
            created_at = %event.created_at,
            error = event.processing_error.as_deref().unwrap_or(""),
            "Failed event"
        );
    }
    info!(count = events.len(), "Failed event listing complete");

    Ok(())
}

async fn retry(billing: &BillingService, event_id: Uuid) -> anyhow::Result<()> {
    let outcome = billing.recovery.retry_event(event_id).await?;

    match outcome {
        ReconcileOutcome::Reconciled { subscription_id } => {
            info!(event_id = %event_id, subscription_id = %subscription_id, "Retry reconciled event");
        }
        ReconcileOutcome::Skipped(reason) => {
            warn!(event_id = %event_id, reason = ?reason, "Retry skipped event");
        }
    }

    Ok(())
}
