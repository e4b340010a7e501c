use std::collections::{BTreeSet, HashMap};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use crate::limits::MAX_LOOKAHEAD_DAYS;
use crate::model::*;
use crate::store::Backend;

use super::availability::{admin_day, first_open, resolve_slots};
use super::{Engine, EngineError};

impl<S: Backend> Engine<S> {
    pub async fn get_resource(&self, resource_id: Ulid) -> Result<Resource, EngineError> {
        self.load_resource(resource_id).await
    }

    /// Every candidate slot on `date` with its status and reservable handle.
    pub async fn list_slots(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<SlotView>, EngineError> {
        let resource = self.load_resource(resource_id).await?;
        if resource.overrides.is_day_closed(date) {
            return Ok(resolve_slots(&resource, date, &[]));
        }
        let rows = self.store.slots_for_date(resource_id, date).await?;
        Ok(resolve_slots(&resource, date, &rows))
    }

    /// Whether at least one candidate on `date` is open.
    pub async fn has_opening(&self, resource_id: Ulid, date: NaiveDate) -> Result<bool, EngineError> {
        let resource = self.load_resource(resource_id).await?;
        if resource.overrides.is_day_closed(date) {
            return Ok(false);
        }
        let reserved: BTreeSet<SlotRange> = self
            .store
            .slots_for_date(resource_id, date)
            .await?
            .into_iter()
            .filter(|s| s.reserved)
            .map(|s| s.key.range)
            .collect();
        Ok(first_open(&resource, date, &reserved).is_some())
    }

    /// Dates in `[from, from + days)` with at least one open slot.
    /// `days` defaults to the configured lookahead.
    pub async fn open_dates(
        &self,
        resource_id: Ulid,
        from: NaiveDate,
        days: Option<u32>,
    ) -> Result<Vec<NaiveDate>, EngineError> {
        let days = days.unwrap_or(self.settings.lookahead_days);
        if days > MAX_LOOKAHEAD_DAYS {
            return Err(EngineError::LimitExceeded("lookahead window too long"));
        }
        let resource = self.load_resource(resource_id).await?;
        let until = from
            .checked_add_days(Days::new(u64::from(days)))
            .ok_or_else(|| EngineError::Validation(format!("date out of range: {from}")))?;

        let mut reserved: HashMap<NaiveDate, BTreeSet<SlotRange>> = HashMap::new();
        for key in self.store.reserved_between(resource_id, from, until).await? {
            reserved.entry(key.date).or_default().insert(key.range);
        }

        let none = BTreeSet::new();
        Ok(from
            .iter_days()
            .take(days as usize)
            .filter(|date| {
                let taken = reserved.get(date).unwrap_or(&none);
                first_open(&resource, *date, taken).is_some()
            })
            .collect())
    }

    pub async fn admin_day_view(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
    ) -> Result<AdminDayView, EngineError> {
        let resource = self.load_resource(resource_id).await?;
        Ok(admin_day(&resource, date))
    }

    /// Committed bookings only. A booking still being finalized is not
    /// visible here.
    pub async fn list_bookings(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Booking>, EngineError> {
        self.load_resource(resource_id).await?;
        let mut bookings = self.store.bookings_for_date(resource_id, date).await?;
        bookings.retain(|b| b.status == BookingStatus::Committed);
        Ok(bookings)
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.store
            .booking(booking_id)
            .await?
            .filter(|b| b.status == BookingStatus::Committed)
            .ok_or(EngineError::NotFound(booking_id))
    }
}
