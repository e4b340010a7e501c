mod availability;
mod conflict;
mod error;
mod finalize;
pub mod generator;
mod mutations;
mod queries;
mod release;
mod reserve;

pub use availability::{admin_day, first_open, resolve_slots};
pub use conflict::validate_customer;
pub use error::{EngineError, ErrorKind};
pub use generator::{ConfigError, candidate_ranges, slot_ranges};

use std::sync::Arc;

use ulid::Ulid;

use crate::limits::{DEFAULT_LOOKAHEAD_DAYS, DEFAULT_ORPHAN_TTL_MS};
use crate::model::*;
use crate::store::{Backend, InMemoryStore};

/// Tunables the engine reads on every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Default window for `open_dates`.
    pub lookahead_days: u32,
    /// Age after which a reserved, unbound slot counts as orphaned.
    pub orphan_ttl_ms: Ms,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lookahead_days: DEFAULT_LOOKAHEAD_DAYS,
            orphan_ttl_ms: DEFAULT_ORPHAN_TTL_MS,
        }
    }
}

/// The reservation engine. Holds no per-request state; every guarantee rests
/// on the store's row-level conditional updates and key uniqueness.
pub struct Engine<S = InMemoryStore> {
    store: Arc<S>,
    settings: EngineSettings,
}

impl<S: Backend> Engine<S> {
    pub fn new(store: Arc<S>, settings: EngineSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    pub(super) async fn load_resource(&self, id: Ulid) -> Result<Resource, EngineError> {
        self.store
            .resource(id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }
}
