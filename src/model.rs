use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Used for bookkeeping timestamps only; slot times are
/// naive local `NaiveTime`s on a `NaiveDate`.
pub type Ms = i64;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Ms
}

pub(crate) fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, s).unwrap_or(NaiveTime::MIN)
}

const TIME_FORMAT: &str = "%H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Half-open time range `[start, end)` within a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl SlotRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "SlotRange start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &SlotRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format(TIME_FORMAT),
            self.end.format(TIME_FORMAT)
        )
    }
}

/// Daily slot-generation window for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub interval_minutes: i64,
}

impl SlotConfig {
    pub fn new(start: NaiveTime, end: NaiveTime, interval_minutes: i64) -> Self {
        Self {
            start,
            end,
            interval_minutes,
        }
    }
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self::new(hms(9, 0, 0), hms(17, 0, 0), 60)
    }
}

/// Administrator closures for a resource.
///
/// A date in `closed_days` shuts the whole day; entries in `closed_slots`
/// for that date are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overrides {
    pub closed_days: BTreeSet<NaiveDate>,
    pub closed_slots: BTreeMap<NaiveDate, BTreeSet<SlotRange>>,
}

impl Overrides {
    pub fn is_day_closed(&self, date: NaiveDate) -> bool {
        self.closed_days.contains(&date)
    }

    pub fn is_closed(&self, date: NaiveDate, range: &SlotRange) -> bool {
        if self.is_day_closed(date) {
            return true;
        }
        self.closed_slots
            .get(&date)
            .is_some_and(|ranges| ranges.contains(range))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub name: Option<String>,
    pub config: SlotConfig,
    pub overrides: Overrides,
}

impl Resource {
    pub fn new(id: Ulid, name: Option<String>, config: SlotConfig) -> Self {
        Self {
            id,
            name,
            config,
            overrides: Overrides::default(),
        }
    }
}

/// Natural key of a slot. Unique across persisted slots, and the full
/// content of a virtual descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub range: SlotRange,
}

impl SlotKey {
    pub fn new(resource_id: Ulid, date: NaiveDate, range: SlotRange) -> Self {
        Self {
            resource_id,
            date,
            range,
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.resource_id,
            self.date.format(DATE_FORMAT),
            self.range
        )
    }
}

/// A slot row. Created on first reservation, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Ulid,
    pub key: SlotKey,
    pub reserved: bool,
    pub booking_id: Option<Ulid>,
    /// When the row last went from unreserved to reserved.
    pub reserved_at: Option<Ms>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Unreserved,
    /// Held by an in-flight request, no owning booking yet.
    Reserved,
    Bound(Ulid),
}

impl Slot {
    pub fn state(&self) -> SlotState {
        match (self.reserved, self.booking_id) {
            (false, _) => SlotState::Unreserved,
            (true, None) => SlotState::Reserved,
            (true, Some(b)) => SlotState::Bound(b),
        }
    }
}

/// Handle a caller uses to address a slot: a row id, or the coordinates of a
/// slot that has not been materialized yet.
///
/// Text form: a bare ULID for rows, `virtual/<resource>/<date>/<start>/<end>`
/// for descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotRef {
    Persisted(Ulid),
    Virtual(SlotKey),
}

const VIRTUAL_PREFIX: &str = "virtual";

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotRef::Persisted(id) => write!(f, "{id}"),
            SlotRef::Virtual(key) => write!(
                f,
                "{VIRTUAL_PREFIX}/{}/{}/{}/{}",
                key.resource_id,
                key.date.format(DATE_FORMAT),
                key.range.start.format(TIME_FORMAT),
                key.range.end.format(TIME_FORMAT)
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSlotRefError {
    pub input: String,
    pub reason: &'static str,
}

impl fmt::Display for ParseSlotRefError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid slot identifier {:?}: {}", self.input, self.reason)
    }
}

impl std::error::Error for ParseSlotRefError {}

impl FromStr for SlotRef {
    type Err = ParseSlotRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason| ParseSlotRefError {
            input: s.to_string(),
            reason,
        };
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [id] => Ulid::from_string(id)
                .map(SlotRef::Persisted)
                .map_err(|_| fail("not a slot id")),
            [VIRTUAL_PREFIX, rid, date, start, end] => {
                let resource_id = Ulid::from_string(rid).map_err(|_| fail("bad resource id"))?;
                let date = NaiveDate::parse_from_str(date, DATE_FORMAT)
                    .map_err(|_| fail("bad date"))?;
                let start = NaiveTime::parse_from_str(start, TIME_FORMAT)
                    .map_err(|_| fail("bad start time"))?;
                let end = NaiveTime::parse_from_str(end, TIME_FORMAT)
                    .map_err(|_| fail("bad end time"))?;
                if start >= end {
                    return Err(fail("start must be before end"));
                }
                Ok(SlotRef::Virtual(SlotKey::new(
                    resource_id,
                    date,
                    SlotRange::new(start, end),
                )))
            }
            _ => Err(fail("unrecognized format")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotStatus {
    Open,
    Booked,
    Closed,
}

/// One candidate slot in a date listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotView {
    pub slot_ref: SlotRef,
    pub range: SlotRange,
    pub status: SlotStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSlotView {
    pub range: SlotRange,
    pub closed_by_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminDayView {
    pub date: NaiveDate,
    pub whole_day_closed: bool,
    pub slots: Vec<AdminSlotView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    /// Created, slots not yet stamped.
    Pending,
    Committed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub date: NaiveDate,
    /// Bound slot ids in time order.
    pub slot_ids: Vec<Ulid>,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub customer: Customer,
    pub status: BookingStatus,
    pub created_at: Ms,
}

/// Flat event types, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourcePut {
        resource: Resource,
    },
    SlotInserted {
        slot: Slot,
    },
    SlotReserved {
        id: Ulid,
        resource_id: Ulid,
        reserved_at: Ms,
    },
    /// Back to unreserved with no booking reference.
    SlotReleased {
        id: Ulid,
        resource_id: Ulid,
    },
    SlotStamped {
        id: Ulid,
        resource_id: Ulid,
        booking_id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingCommitted {
        id: Ulid,
        resource_id: Ulid,
    },
    BookingDeleted {
        id: Ulid,
        resource_id: Ulid,
    },
}

impl Event {
    pub fn resource_id(&self) -> Ulid {
        match self {
            Event::ResourcePut { resource } => resource.id,
            Event::SlotInserted { slot } => slot.key.resource_id,
            Event::BookingCreated { booking } => booking.resource_id,
            Event::SlotReserved { resource_id, .. }
            | Event::SlotReleased { resource_id, .. }
            | Event::SlotStamped { resource_id, .. }
            | Event::BookingCommitted { resource_id, .. }
            | Event::BookingDeleted { resource_id, .. } => *resource_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn range_display_and_overlap() {
        let a = SlotRange::new(hms(9, 0, 0), hms(10, 0, 0));
        let b = SlotRange::new(hms(9, 30, 0), hms(10, 30, 0));
        let c = SlotRange::new(hms(10, 0, 0), hms(11, 0, 0));
        assert_eq!(a.to_string(), "09:00:00-10:00:00");
        assert_eq!(a.duration_minutes(), 60);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn virtual_ref_text_form_parses_back() {
        let key = SlotKey::new(
            Ulid::new(),
            date(2025, 3, 14),
            SlotRange::new(hms(9, 0, 0), hms(10, 0, 0)),
        );
        let text = SlotRef::Virtual(key).to_string();
        assert!(text.starts_with("virtual/"));
        assert!(text.ends_with("/2025-03-14/09:00:00/10:00:00"));
        assert_eq!(text.parse::<SlotRef>().unwrap(), SlotRef::Virtual(key));
    }

    #[test]
    fn persisted_ref_is_bare_ulid() {
        let id = Ulid::new();
        assert_eq!(id.to_string().parse::<SlotRef>().unwrap(), SlotRef::Persisted(id));
    }

    #[test]
    fn malformed_refs_rejected() {
        let rid = Ulid::new();
        for bad in [
            "".to_string(),
            "42".to_string(),
            format!("virtual/{rid}/2025-02-30/09:00:00/10:00:00"),
            format!("virtual/{rid}/2025-03-14/10:00:00/09:00:00"),
            format!("virtual/{rid}/2025-03-14/09:00/10:00"),
            format!("virtual/{rid}/2025-03-14/09:00:00"),
            format!("dynamic/{rid}/2025-03-14/09:00:00/10:00:00"),
        ] {
            assert!(bad.parse::<SlotRef>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn full_day_closure_wins_over_slot_entries() {
        let d = date(2025, 3, 14);
        let range = SlotRange::new(hms(9, 0, 0), hms(10, 0, 0));
        let other = SlotRange::new(hms(10, 0, 0), hms(11, 0, 0));
        let mut o = Overrides::default();
        o.closed_slots.entry(d).or_default().insert(range);
        assert!(o.is_closed(d, &range));
        assert!(!o.is_closed(d, &other));

        o.closed_days.insert(d);
        assert!(o.is_closed(d, &other));
    }

    #[test]
    fn slot_state_follows_flags() {
        let mut slot = Slot {
            id: Ulid::new(),
            key: SlotKey::new(
                Ulid::new(),
                date(2025, 1, 1),
                SlotRange::new(hms(9, 0, 0), hms(10, 0, 0)),
            ),
            reserved: false,
            booking_id: None,
            reserved_at: None,
        };
        assert_eq!(slot.state(), SlotState::Unreserved);
        slot.reserved = true;
        assert_eq!(slot.state(), SlotState::Reserved);
        let b = Ulid::new();
        slot.booking_id = Some(b);
        assert_eq!(slot.state(), SlotState::Bound(b));
    }
}
