use tracing::{debug, info};
use ulid::Ulid;

use crate::model::Ms;
use crate::observability::{ORPHANS_RECLAIMED_TOTAL, RELEASES_TOTAL};
use crate::store::Backend;

use super::{Engine, EngineError};

impl<S: Backend> Engine<S> {
    /// Return a booking's slots to the pool. Idempotent: unknown bookings and
    /// rows no longer bound to this booking are left as they are.
    pub async fn release(&self, booking_id: Ulid) -> Result<(), EngineError> {
        let Some(booking) = self.store.booking(booking_id).await? else {
            debug!("release: booking {booking_id} not found, nothing to do");
            return Ok(());
        };
        for slot_id in &booking.slot_ids {
            self.store.release_slot(*slot_id, booking_id).await?;
        }
        metrics::counter!(RELEASES_TOTAL).increment(1);
        info!("released {} slots of booking {booking_id}", booking.slot_ids.len());
        Ok(())
    }

    /// Release the slots, then delete the booking.
    pub async fn cancel_booking(&self, booking_id: Ulid) -> Result<(), EngineError> {
        self.get_booking(booking_id).await?;
        self.release(booking_id).await?;
        self.store.delete_booking(booking_id).await?;
        info!("cancelled booking {booking_id}");
        Ok(())
    }

    /// Unreserve slots reserved at least the orphan TTL before `now` and
    /// never bound to a booking. Returns how many were reclaimed.
    pub async fn reclaim_orphans(&self, now: Ms) -> Result<usize, EngineError> {
        let cutoff = now - self.settings.orphan_ttl_ms;
        let mut reclaimed = 0;
        for slot in self.store.unbound_reserved(cutoff).await? {
            let Some(reserved_at) = slot.reserved_at else {
                continue;
            };
            if self.store.reclaim_orphan(slot.id, reserved_at).await? {
                info!("reclaimed orphaned slot {} ({})", slot.id, slot.key);
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            metrics::counter!(ORPHANS_RECLAIMED_TOTAL).increment(reclaimed as u64);
        }
        Ok(reclaimed)
    }
}
