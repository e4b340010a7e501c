use std::fmt;

use chrono::{NaiveTime, TimeDelta};
use tracing::warn;
use ulid::Ulid;

use crate::limits::MAX_INTERVAL_MINUTES;
use crate::model::*;

// ── Slot Generator ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    NonPositiveInterval(i64),
    IntervalTooLong(i64),
    EmptyWindow { start: NaiveTime, end: NaiveTime },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NonPositiveInterval(m) => {
                write!(f, "slot interval must be positive, got {m} minutes")
            }
            ConfigError::IntervalTooLong(m) => {
                write!(f, "slot interval of {m} minutes exceeds {MAX_INTERVAL_MINUTES}")
            }
            ConfigError::EmptyWindow { start, end } => {
                write!(f, "window start {start} is not before end {end}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl SlotConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_minutes <= 0 {
            return Err(ConfigError::NonPositiveInterval(self.interval_minutes));
        }
        if self.interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(ConfigError::IntervalTooLong(self.interval_minutes));
        }
        if self.start >= self.end {
            return Err(ConfigError::EmptyWindow {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}

/// Lazy, contiguous sequence of slot ranges inside a daily window.
/// A trailing partial slot is dropped.
#[derive(Debug, Clone)]
pub struct SlotRanges {
    next_start: Option<NaiveTime>,
    end: NaiveTime,
    interval: TimeDelta,
}

impl Iterator for SlotRanges {
    type Item = SlotRange;

    fn next(&mut self) -> Option<SlotRange> {
        let start = self.next_start?;
        let (slot_end, wrapped) = start.overflowing_add_signed(self.interval);
        if wrapped != 0 || slot_end > self.end {
            self.next_start = None;
            return None;
        }
        self.next_start = Some(slot_end);
        Some(SlotRange::new(start, slot_end))
    }
}

/// Slot ranges for `config`. Empty when the configuration is invalid.
pub fn slot_ranges(config: &SlotConfig) -> SlotRanges {
    let valid = config.validate().is_ok();
    SlotRanges {
        next_start: valid.then_some(config.start),
        end: config.end,
        interval: TimeDelta::minutes(if valid { config.interval_minutes } else { 0 }),
    }
}

/// Candidate ranges for a resource, falling back to the default window when
/// its stored configuration is unusable.
pub fn candidate_ranges(resource_id: Ulid, config: &SlotConfig) -> Vec<SlotRange> {
    match config.validate() {
        Ok(()) => slot_ranges(config).collect(),
        Err(e) => {
            warn!("resource {resource_id}: {e}; using default slot window");
            slot_ranges(&SlotConfig::default()).collect()
        }
    }
}
