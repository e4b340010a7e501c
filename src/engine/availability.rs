use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;

use crate::model::*;

use super::generator::candidate_ranges;

/// Resolve a date's candidates against persisted rows and closures.
///
/// A full-day closure marks every candidate `Closed`. Otherwise a reserved
/// row marks its candidate `Booked`, then per-slot closures apply. Each view
/// carries the row id when a row exists and a virtual descriptor otherwise.
pub fn resolve_slots(resource: &Resource, date: NaiveDate, rows: &[Slot]) -> Vec<SlotView> {
    let by_range: HashMap<SlotRange, &Slot> = rows
        .iter()
        .filter(|s| s.key.resource_id == resource.id && s.key.date == date)
        .map(|s| (s.key.range, s))
        .collect();
    let day_closed = resource.overrides.is_day_closed(date);

    candidate_ranges(resource.id, &resource.config)
        .into_iter()
        .map(|range| {
            let row = by_range.get(&range);
            let status = if day_closed {
                SlotStatus::Closed
            } else if row.is_some_and(|s| s.reserved) {
                SlotStatus::Booked
            } else if resource.overrides.is_closed(date, &range) {
                SlotStatus::Closed
            } else {
                SlotStatus::Open
            };
            let slot_ref = match row {
                Some(s) => SlotRef::Persisted(s.id),
                None => SlotRef::Virtual(SlotKey::new(resource.id, date, range)),
            };
            SlotView {
                slot_ref,
                range,
                status,
            }
        })
        .collect()
}

/// First open candidate on `date`, given the ranges already reserved there.
pub fn first_open(
    resource: &Resource,
    date: NaiveDate,
    reserved: &BTreeSet<SlotRange>,
) -> Option<SlotRange> {
    if resource.overrides.is_day_closed(date) {
        return None;
    }
    candidate_ranges(resource.id, &resource.config)
        .into_iter()
        .find(|range| !reserved.contains(range) && !resource.overrides.is_closed(date, range))
}

/// Every candidate with its administrator closure flag.
pub fn admin_day(resource: &Resource, date: NaiveDate) -> AdminDayView {
    let whole_day_closed = resource.overrides.is_day_closed(date);
    let slots = candidate_ranges(resource.id, &resource.config)
        .into_iter()
        .map(|range| AdminSlotView {
            range,
            closed_by_admin: resource.overrides.is_closed(date, &range),
        })
        .collect();
    AdminDayView {
        date,
        whole_day_closed,
        slots,
    }
}
