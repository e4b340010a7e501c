use chrono::NaiveDate;
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability::BOOKINGS_TOTAL;
use crate::store::{Backend, SlotStore, StoreError};

use super::conflict::{check_batch_size, check_owner, sort_contiguous, validate_customer};
use super::{Engine, EngineError};

// ── Compensation ─────────────────────────────────────────────────

/// Undo step for one completed phase of a finalize.
#[derive(Debug)]
enum Compensation {
    /// Reclaim rows still holding the reservation observed at the start.
    Unreserve(Vec<(Ulid, Ms)>),
    DeleteBooking(Ulid),
    /// Release rows stamped with this booking.
    Unbind { booking_id: Ulid, slot_ids: Vec<Ulid> },
}

/// Compensations recorded as phases complete, run newest first on abort.
struct Saga<'a, S: ?Sized> {
    store: &'a S,
    steps: Vec<Compensation>,
}

impl<'a, S: SlotStore + ?Sized> Saga<'a, S> {
    fn new(store: &'a S) -> Self {
        Self {
            store,
            steps: Vec::new(),
        }
    }

    fn record(&mut self, step: Compensation) {
        self.steps.push(step);
    }

    /// Run every recorded compensation. Errors are logged and the remaining
    /// steps still run.
    async fn abort(self) {
        for step in self.steps.into_iter().rev() {
            match step {
                Compensation::Unbind { booking_id, slot_ids } => {
                    for id in slot_ids {
                        if let Err(e) = self.store.release_slot(id, booking_id).await {
                            error!("compensation: failed to release slot {id}: {e}");
                        }
                    }
                }
                Compensation::DeleteBooking(id) => {
                    if let Err(e) = self.store.delete_booking(id).await {
                        error!("compensation: failed to delete booking {id}: {e}");
                    }
                }
                Compensation::Unreserve(rows) => {
                    for (id, reserved_at) in rows {
                        if let Err(e) = self.store.reclaim_orphan(id, reserved_at).await {
                            error!("compensation: failed to unreserve slot {id}: {e}");
                        }
                    }
                }
            }
        }
    }
}

impl<S: Backend> Engine<S> {
    /// Bind reserved slots to a new booking.
    ///
    /// Creates the booking as pending, stamps each slot, then commits.
    /// Invalid input is rejected before anything is written. Any failure
    /// after the booking insert starts unwinds everything this call did and
    /// leaves the slots unreserved.
    pub async fn finalize(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        slot_ids: &[Ulid],
        customer: Customer,
    ) -> Result<Ulid, EngineError> {
        check_batch_size(slot_ids.len())?;
        if let Err(e) = validate_customer(&customer) {
            metrics::counter!(BOOKINGS_TOTAL, "outcome" => "rejected").increment(1);
            return Err(e);
        }
        self.load_resource(resource_id).await?;

        let mut rows = Vec::with_capacity(slot_ids.len());
        for id in slot_ids {
            let row = self
                .store
                .slot(*id)
                .await?
                .ok_or_else(|| EngineError::Validation(format!("unknown slot id {id}")))?;
            check_owner(&row.key, resource_id, date)?;
            rows.push(row);
        }
        sort_contiguous(&mut rows, |s| s.key.range)?;

        let mut saga = Saga::new(self.store.as_ref());
        saga.record(Compensation::Unreserve(
            rows.iter()
                .filter(|s| s.state() == SlotState::Reserved)
                .filter_map(|s| s.reserved_at.map(|at| (s.id, at)))
                .collect(),
        ));

        let (first, last) = (&rows[0], &rows[rows.len() - 1]);
        let booking = Booking {
            id: Ulid::new(),
            resource_id,
            date,
            slot_ids: rows.iter().map(|s| s.id).collect(),
            start: first.key.range.start,
            end: last.key.range.end,
            customer,
            status: BookingStatus::Pending,
            created_at: now_ms(),
        };
        if let Err(e) = self.store.insert_booking(&booking).await {
            error!("finalize on {resource_id} {date}: booking insert failed: {e}");
            saga.abort().await;
            metrics::counter!(BOOKINGS_TOTAL, "outcome" => "failed").increment(1);
            return Err(EngineError::BookingFailed(e));
        }
        saga.record(Compensation::DeleteBooking(booking.id));

        let mut stamped = Vec::with_capacity(rows.len());
        let mut stamp_err: Option<StoreError> = None;
        for row in &rows {
            match self.store.stamp_booking(row.id, booking.id).await {
                Ok(true) => stamped.push(row.id),
                Ok(false) => warn!("finalize: slot {} was not reserved and unbound", row.id),
                Err(e) => {
                    stamp_err = Some(e);
                    break;
                }
            }
        }
        let stamped_count = stamped.len();
        saga.record(Compensation::Unbind {
            booking_id: booking.id,
            slot_ids: stamped,
        });

        if let Some(e) = stamp_err {
            error!("finalize booking {}: stamping failed: {e}", booking.id);
            saga.abort().await;
            metrics::counter!(BOOKINGS_TOTAL, "outcome" => "failed").increment(1);
            return Err(EngineError::Storage(e));
        }
        if stamped_count != rows.len() {
            error!(
                "finalize booking {}: stamped {stamped_count} of {} slots",
                booking.id,
                rows.len()
            );
            saga.abort().await;
            metrics::counter!(BOOKINGS_TOTAL, "outcome" => "inconsistent").increment(1);
            return Err(EngineError::FinalizeInconsistency {
                expected: rows.len(),
                stamped: stamped_count,
            });
        }

        let committed = match self.store.commit_booking(booking.id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(StoreError::NotFound(booking.id)),
            Err(e) => Err(e),
        };
        if let Err(e) = committed {
            error!("finalize booking {}: commit failed: {e}", booking.id);
            saga.abort().await;
            metrics::counter!(BOOKINGS_TOTAL, "outcome" => "failed").increment(1);
            return Err(EngineError::BookingFailed(e));
        }

        info!(
            "booking {} committed: {resource_id} {date} {}-{}",
            booking.id,
            booking.start.format("%H:%M"),
            booking.end.format("%H:%M")
        );
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => "committed").increment(1);
        Ok(booking.id)
    }

    /// Reserve and finalize in one call.
    pub async fn book(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        refs: &[SlotRef],
        customer: Customer,
    ) -> Result<Ulid, EngineError> {
        validate_customer(&customer)?;
        let slot_ids = self.reserve(resource_id, date, refs).await?;
        self.finalize(resource_id, date, &slot_ids, customer).await
    }
}
