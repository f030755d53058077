//! Drain tick: the periodic loop that empties the delayed queue.
//! Uses tokio::interval, so it sleeps between checks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lapor_core::traits::Deliver;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::queue::{DelayedQueue, DrainReport};

/// Run one drain cycle and log its outcome. Errors are logged, never raised.
pub async fn tick(queue: &DelayedQueue, deliver: &dyn Deliver) -> Option<DrainReport> {
    match queue.drain(Utc::now(), deliver).await {
        Ok(report) => {
            if report.skipped {
                tracing::debug!("⏭️ Drain skipped (gate busy)");
            } else if !report.is_idle() {
                tracing::info!(
                    "📬 Drain: {} sent, {} suppressed, {} rescheduled, {} waiting, {} dropped",
                    report.sent,
                    report.suppressed,
                    report.rescheduled,
                    report.waiting,
                    report.dropped
                );
            }
            Some(report)
        }
        Err(e) => {
            tracing::error!("❌ Error processing pending messages: {e}");
            None
        }
    }
}

/// Spawn the drain loop as a background tokio task.
pub fn spawn_drain_loop(
    queue: Arc<DelayedQueue>,
    deliver: Arc<dyn Deliver>,
    every: Duration,
) -> JoinHandle<()> {
    tracing::info!(
        "⏰ Drain loop started (every {}s via {})",
        every.as_secs(),
        deliver.name()
    );

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            tick(&queue, deliver.as_ref()).await;
        }
    })
}
