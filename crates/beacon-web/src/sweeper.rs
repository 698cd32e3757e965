//! Periodic eviction of clients that stopped reporting.

use beacon_core::BroadcastCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Spawn a task that evicts clients silent for longer than `stale_after`.
///
/// An evicted client leaves the snapshot and its transport closes.
pub fn spawn_stale_sweeper(
    coordinator: Arc<BroadcastCoordinator>,
    stale_after: Duration,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let max_age = match chrono::Duration::from_std(stale_after) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "stale_after out of range, sweeper disabled");
                return;
            }
        };
        info!(stale_after_ms = stale_after.as_millis() as u64, "stale sweeper started");

        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let _ = ticker.tick().await;
            let evicted = coordinator.evict_stale(max_age);
            if !evicted.is_empty() {
                info!(count = evicted.len(), "evicted stale clients");
            } else {
                debug!("stale sweep found nothing");
            }
        }
    })
}
