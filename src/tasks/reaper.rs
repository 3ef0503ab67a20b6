//! Expiration Reaper
//!
//! Background task that periodically drops expired entries from the node's
//! container and purges them from the persistence tier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::Cache;

/// Spawns the reaper for `cache`.
///
/// Each run cleans the in-memory container, then purges the store on the
/// blocking pool. With `purge_synchronously` the run waits for the purge;
/// otherwise the purge is detached and a run is skipped while one is still
/// in flight. A failed purge never stops the loop.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be aborted during graceful
/// shutdown.
pub fn spawn_reaper_task(
    cache: Arc<Cache>,
    interval: Duration,
    purge_synchronously: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Starting expiration reaper with interval of {:?} (synchronous purge: {})",
            interval, purge_synchronously
        );
        let purge_in_flight = Arc::new(AtomicBool::new(false));

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.cleanup_expired();
            if removed > 0 {
                info!("Reaper: removed {} expired entries from memory", removed);
            } else {
                debug!("Reaper: no expired entries in memory");
            }

            if !cache.persistence().is_enabled() {
                continue;
            }

            if purge_synchronously {
                let cache = cache.clone();
                match tokio::task::spawn_blocking(move || cache.purge_store()).await {
                    Ok(Ok(purged)) => debug!("Reaper: purged {} entries from store", purged),
                    // the persistence manager counts and logs purge failures
                    Ok(Err(_)) => {}
                    Err(e) => warn!("Reaper: store purge panicked: {}", e),
                }
            } else if purge_in_flight.swap(true, Ordering::AcqRel) {
                debug!("Reaper: previous store purge still running, skipping");
            } else {
                let cache = cache.clone();
                let in_flight = purge_in_flight.clone();
                tokio::task::spawn_blocking(move || {
                    if let Ok(purged) = cache.purge_store() {
                        debug!("Reaper: purged {} entries from store", purged);
                    }
                    in_flight.store(false, Ordering::Release);
                });
            }
        }
    })
}
