//! TTL eviction of pending calls nobody collected.

use crate::domain::CorrelationRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Periodically evict entries older than `ttl` until shutdown.
pub async fn reaper_task(
    registry: Arc<CorrelationRegistry>,
    ttl: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                let removed = registry.remove_expired(ttl);
                if removed > 0 {
                    info!(removed, pending = registry.pending_count(), "Evicted expired pending calls");
                } else {
                    debug!(pending = registry.pending_count(), "Reaper tick");
                }
            }
        }
    }

    debug!("Reaper stopped");
}
