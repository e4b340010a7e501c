use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::engine::EngineSettings;
use crate::limits::{DEFAULT_LOOKAHEAD_DAYS, DEFAULT_ORPHAN_TTL_MS, MAX_LOOKAHEAD_DAYS};

/// Daemon settings, read from `SLOTBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub lookahead_days: u32,
    pub orphan_ttl: Duration,
    pub reaper_interval: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            lookahead_days: DEFAULT_LOOKAHEAD_DAYS,
            orphan_ttl: Duration::from_millis(DEFAULT_ORPHAN_TTL_MS as u64),
            reaper_interval: Duration::from_secs(30),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("ignoring unparsable {key}={raw:?}");
            default
        }),
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let lookahead_days = parse_or(&lookup, "SLOTBOOK_LOOKAHEAD_DAYS", d.lookahead_days);
        Self {
            data_dir: lookup("SLOTBOOK_DATA_DIR").map_or(d.data_dir, PathBuf::from),
            lookahead_days: lookahead_days.min(MAX_LOOKAHEAD_DAYS),
            orphan_ttl: Duration::from_secs(parse_or(
                &lookup,
                "SLOTBOOK_ORPHAN_TTL_SECS",
                d.orphan_ttl.as_secs(),
            )),
            reaper_interval: Duration::from_secs(
                parse_or(
                    &lookup,
                    "SLOTBOOK_REAPER_INTERVAL_SECS",
                    d.reaper_interval.as_secs(),
                )
                .max(1),
            ),
            compact_threshold: parse_or(&lookup, "SLOTBOOK_COMPACT_THRESHOLD", d.compact_threshold),
            metrics_port: lookup("SLOTBOOK_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            lookahead_days: self.lookahead_days,
            orphan_ttl_ms: self.orphan_ttl.as_millis() as i64,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotbook.wal")
    }
}
