use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::store::Backend;

use super::generator::candidate_ranges;
use super::{Engine, EngineError};

impl<S: Backend> Engine<S> {
    pub async fn create_resource(
        &self,
        name: Option<String>,
        config: SlotConfig,
    ) -> Result<Ulid, EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }
        config
            .validate()
            .map_err(|e| EngineError::Validation(e.to_string()))?;

        let id = Ulid::new();
        self.store.put_resource(Resource::new(id, name, config)).await?;
        info!("created resource {id}");
        Ok(id)
    }

    pub async fn update_config(&self, resource_id: Ulid, config: SlotConfig) -> Result<(), EngineError> {
        config
            .validate()
            .map_err(|e| EngineError::Validation(e.to_string()))?;
        self.modify_resource(resource_id, |r| {
            let changed = r.config != config;
            r.config = config;
            Ok(changed)
        })
        .await
    }

    /// Close a whole day. Per-slot closures for that day are dropped.
    pub async fn close_day(&self, resource_id: Ulid, date: NaiveDate) -> Result<(), EngineError> {
        self.modify_resource(resource_id, |r| {
            let dropped = r.overrides.closed_slots.remove(&date).is_some();
            Ok(r.overrides.closed_days.insert(date) || dropped)
        })
        .await
    }

    pub async fn reopen_day(&self, resource_id: Ulid, date: NaiveDate) -> Result<(), EngineError> {
        self.modify_resource(resource_id, |r| Ok(r.overrides.closed_days.remove(&date)))
            .await
    }

    /// Close one candidate slot. A no-op when the whole day is closed.
    pub async fn close_slot(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        range: SlotRange,
    ) -> Result<(), EngineError> {
        self.modify_resource(resource_id, |r| {
            if r.overrides.is_day_closed(date) {
                return Ok(false);
            }
            if !candidate_ranges(r.id, &r.config).contains(&range) {
                return Err(EngineError::Validation(format!(
                    "{range} is not a slot of this resource"
                )));
            }
            Ok(r.overrides.closed_slots.entry(date).or_default().insert(range))
        })
        .await
    }

    pub async fn reopen_slot(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        range: SlotRange,
    ) -> Result<(), EngineError> {
        self.modify_resource(resource_id, |r| {
            let Some(ranges) = r.overrides.closed_slots.get_mut(&date) else {
                return Ok(false);
            };
            let removed = ranges.remove(&range);
            if ranges.is_empty() {
                r.overrides.closed_slots.remove(&date);
            }
            Ok(removed)
        })
        .await
    }

    /// Read-modify-write on a resource. `edit` returns whether anything
    /// changed; unchanged resources are not written back.
    async fn modify_resource(
        &self,
        resource_id: Ulid,
        edit: impl FnOnce(&mut Resource) -> Result<bool, EngineError>,
    ) -> Result<(), EngineError> {
        let mut resource = self.load_resource(resource_id).await?;
        if edit(&mut resource)? {
            self.store.put_resource(resource).await?;
            info!("updated resource {resource_id}");
        }
        Ok(())
    }
}
