use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::model::now_ms;
use crate::store::{Backend, InMemoryStore};

/// Background task that periodically reclaims orphaned reservations.
pub async fn run_reaper<S: Backend>(engine: Arc<Engine<S>>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match engine.reclaim_orphans(now_ms()).await {
            Ok(0) => {}
            Ok(n) => info!("reaper reclaimed {n} orphaned slots"),
            Err(e) => warn!("orphan sweep failed: {e}"),
        }
    }
}

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<InMemoryStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = store.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
        debug!("{} slots, {} bookings after compaction", store.slot_count(), store.booking_count());
    }
}
