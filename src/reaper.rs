use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::observability::LOCKS_EXPIRED_TOTAL;

const REAP_INTERVAL: Duration = Duration::from_secs(5);
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Release every lock that has expired by the engine's clock. Returns how
/// many were released.
pub async fn sweep_expired(engine: &Engine) -> usize {
    let now = engine.clock().now_ms();
    let mut reaped = 0;
    for lock_id in engine.collect_expired_locks(now) {
        match engine.release_lock(lock_id).await {
            Ok(true) => {
                reaped += 1;
                info!(%lock_id, "reaped expired lock");
            }
            // Released or confirmed since it was collected.
            Ok(false) => debug!(%lock_id, "reaper skip: already gone"),
            Err(e) => warn!(%lock_id, "reaper failed to release: {e}"),
        }
    }
    if reaped > 0 {
        metrics::counter!(LOCKS_EXPIRED_TOTAL).increment(reaped as u64);
    }
    engine.notify.prune();
    reaped
}

/// Garbage-collects expired locks until cancelled. Expiry is already
/// enforced on every read; this only reclaims memory and WAL space.
pub async fn run_reaper(engine: Arc<Engine>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(REAP_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                sweep_expired(&engine).await;
            }
            _ = shutdown.cancelled() => break,
        }
    }
    debug!("reaper stopped");
}

/// Compacts the WAL whenever more than `threshold` events were appended
/// since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => break,
        }
        let appends = engine.wal_appends_since_compact().await;
        if appends <= threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(appends, "WAL compacted"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
    debug!("compactor stopped");
}
