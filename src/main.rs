use std::sync::Arc;

use tracing::info;

use slotbook::config::Config;
use slotbook::engine::Engine;
use slotbook::reaper;
use slotbook::store::InMemoryStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    slotbook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let store = Arc::new(InMemoryStore::open(config.wal_path())?);
    let engine = Arc::new(Engine::new(store.clone(), config.engine_settings()));

    info!("slotbook started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  slots: {}, bookings: {}", store.slot_count(), store.booking_count());
    info!("  lookahead_days: {}", config.lookahead_days);
    info!(
        "  orphan_ttl: {}s, reaper every {}s",
        config.orphan_ttl.as_secs(),
        config.reaper_interval.as_secs()
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let reaper_task = tokio::spawn(reaper::run_reaper(engine.clone(), config.reaper_interval));
    let compactor_task = tokio::spawn(reaper::run_compactor(
        store.clone(),
        config.compact_threshold,
        config.reaper_interval,
    ));

    // Run until SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received");
    reaper_task.abort();
    compactor_task.abort();

    if let Err(e) = store.compact_wal().await {
        tracing::warn!("final WAL compaction failed: {e}");
    }
    info!("slotbook stopped");
    Ok(())
}
