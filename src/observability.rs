use std::net::SocketAddr;

// ── Request outcomes ────────────────────────────────────────────

/// Counter: reservation attempts. Labels: outcome (reserved, conflict, error).
pub const RESERVATIONS_TOTAL: &str = "slotbook_reservations_total";

/// Counter: reservation requests that had to unwind earlier slots.
pub const ROLLBACKS_TOTAL: &str = "slotbook_rollbacks_total";

/// Counter: finalize attempts. Labels: outcome (committed, rejected, failed, inconsistent).
pub const BOOKINGS_TOTAL: &str = "slotbook_bookings_total";

/// Counter: bookings whose slots were released.
pub const RELEASES_TOTAL: &str = "slotbook_releases_total";

/// Counter: reserved-but-unbound slots reclaimed by the reaper.
pub const ORPHANS_RECLAIMED_TOTAL: &str = "slotbook_orphans_reclaimed_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
