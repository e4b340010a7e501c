use chrono::NaiveDate;
use tracing::{debug, error, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability::{RESERVATIONS_TOTAL, ROLLBACKS_TOTAL};
use crate::store::{Backend, StoreError};

use super::conflict::{Target, check_available, check_batch_size, check_owner, sort_contiguous};
use super::generator::candidate_ranges;
use super::{Engine, EngineError};

impl<S: Backend> Engine<S> {
    /// Reserve every requested slot or none of them.
    ///
    /// Returns the persisted slot ids in time order. On failure, slots this
    /// call already reserved are put back before the error is returned.
    pub async fn reserve(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        refs: &[SlotRef],
    ) -> Result<Vec<Ulid>, EngineError> {
        check_batch_size(refs.len())?;
        let resource = self.load_resource(resource_id).await?;
        let mut targets = self.resolve_targets(&resource, date, refs).await?;
        sort_contiguous(&mut targets, |t| t.key.range)?;
        if let Err(e) = check_available(&resource, &targets) {
            debug!("reserve on {resource_id} {date} rejected: {e}");
            metrics::counter!(RESERVATIONS_TOTAL, "outcome" => "conflict").increment(1);
            return Err(e);
        }

        // Each entry carries the stamp this request wrote, so rollback only
        // undoes our own reservation.
        let mut reserved: Vec<(Ulid, Ms)> = Vec::with_capacity(targets.len());
        for target in &targets {
            match self.reserve_one(target).await {
                Ok(slot) => reserved.push((slot.id, slot.reserved_at.unwrap_or_default())),
                Err(e) => {
                    warn!(
                        "reserve on {resource_id} {date} failed at {}: {e}; rolling back {} slots",
                        target.key.range,
                        reserved.len()
                    );
                    self.roll_back(&reserved).await;
                    let outcome = if e.is_retryable() { "conflict" } else { "error" };
                    metrics::counter!(RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
                    return Err(e);
                }
            }
        }

        metrics::counter!(RESERVATIONS_TOTAL, "outcome" => "reserved").increment(1);
        Ok(reserved.into_iter().map(|(id, _)| id).collect())
    }

    async fn resolve_targets(
        &self,
        resource: &Resource,
        date: NaiveDate,
        refs: &[SlotRef],
    ) -> Result<Vec<Target>, EngineError> {
        let mut candidates: Option<Vec<SlotRange>> = None;
        let mut targets = Vec::with_capacity(refs.len());
        for slot_ref in refs {
            let target = match *slot_ref {
                SlotRef::Persisted(id) => {
                    let row = self
                        .store
                        .slot(id)
                        .await?
                        .ok_or_else(|| EngineError::Validation(format!("unknown slot id {id}")))?;
                    check_owner(&row.key, resource.id, date)?;
                    Target {
                        key: row.key,
                        row: Some((row.id, row.reserved)),
                    }
                }
                SlotRef::Virtual(key) => {
                    check_owner(&key, resource.id, date)?;
                    let candidates = candidates
                        .get_or_insert_with(|| candidate_ranges(resource.id, &resource.config));
                    if !candidates.contains(&key.range) {
                        return Err(EngineError::Validation(format!(
                            "{} is not a slot of this resource",
                            key.range
                        )));
                    }
                    let row = self.store.slot_by_key(&key).await?;
                    Target {
                        key,
                        row: row.map(|r| (r.id, r.reserved)),
                    }
                }
            };
            targets.push(target);
        }
        Ok(targets)
    }

    async fn reserve_one(&self, target: &Target) -> Result<Slot, EngineError> {
        if let Some((id, _)) = target.row {
            return self.claim_row(id, target.key).await;
        }
        match self.store.insert_reserved(target.key).await {
            Ok(slot) => Ok(slot),
            // Someone materialized the row first; compete for it as a row.
            Err(StoreError::UniqueViolation(_)) => {
                match self.store.slot_by_key(&target.key).await? {
                    Some(row) => self.claim_row(row.id, target.key).await,
                    None => Err(EngineError::Conflict(target.key)),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn claim_row(&self, id: Ulid, key: SlotKey) -> Result<Slot, EngineError> {
        self.store
            .claim_slot(id)
            .await?
            .ok_or(EngineError::Conflict(key))
    }

    /// Unreserve slots taken earlier in the same request, newest first.
    /// A row whose stamp changed belongs to someone else now and is skipped.
    /// Failures are logged; the caller's error is returned unchanged.
    async fn roll_back(&self, reserved: &[(Ulid, Ms)]) {
        if reserved.is_empty() {
            return;
        }
        metrics::counter!(ROLLBACKS_TOTAL).increment(1);
        for &(id, reserved_at) in reserved.iter().rev() {
            match self.store.reclaim_orphan(id, reserved_at).await {
                Ok(true) => {}
                Ok(false) => warn!("rollback: slot {id} is no longer held by this request"),
                Err(e) => error!("rollback: failed to unreserve slot {id}: {e}"),
            }
        }
    }
}
