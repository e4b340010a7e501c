mod memory;

pub use memory::InMemoryStore;

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A row with the same `(resource, date, start, end)` already exists.
    UniqueViolation(SlotKey),
    NotFound(Ulid),
    WalError(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::UniqueViolation(key) => write!(f, "slot already exists: {key}"),
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Row-level storage for slots and bookings.
///
/// Every mutating method is atomic with respect to the single row it
/// touches. The conditional methods return `false` when the row is not in the
/// expected state and never block on other rows.
#[async_trait]
pub trait SlotStore: Send + Sync {
    async fn slot(&self, id: Ulid) -> Result<Option<Slot>, StoreError>;

    async fn slot_by_key(&self, key: &SlotKey) -> Result<Option<Slot>, StoreError>;

    async fn slots_for_date(&self, resource_id: Ulid, date: NaiveDate)
        -> Result<Vec<Slot>, StoreError>;

    /// Keys of reserved rows with `from <= date < until`.
    async fn reserved_between(
        &self,
        resource_id: Ulid,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<SlotKey>, StoreError>;

    /// Insert a new row already reserved and unbound, returning it as
    /// written. Fails with `UniqueViolation` if the key exists.
    async fn insert_reserved(&self, key: SlotKey) -> Result<Slot, StoreError>;

    /// Set `reserved = new` only if it currently equals `expected`.
    /// Going to unreserved also clears the booking reference.
    async fn compare_and_swap_reserved(
        &self,
        id: Ulid,
        expected: bool,
        new: bool,
    ) -> Result<bool, StoreError>;

    /// `compare_and_swap_reserved(id, false, true)` that also returns the row
    /// as written. `None` if the row was already reserved. The returned
    /// `reserved_at` identifies this reservation for `reclaim_orphan`.
    async fn claim_slot(&self, id: Ulid) -> Result<Option<Slot>, StoreError>;

    /// Bind a row to a booking. Requires `reserved && booking unset`.
    async fn stamp_booking(&self, id: Ulid, booking_id: Ulid) -> Result<bool, StoreError>;

    /// Unreserve a row bound to `booking_id`. Rows in any other state are
    /// left alone; this never fails for state reasons.
    async fn release_slot(&self, id: Ulid, booking_id: Ulid) -> Result<(), StoreError>;

    /// Reserved, unbound rows reserved at or before `reserved_before`.
    async fn unbound_reserved(&self, reserved_before: Ms) -> Result<Vec<Slot>, StoreError>;

    /// Unreserve a row only if it is still reserved, unbound, and was
    /// reserved at `reserved_at`.
    async fn reclaim_orphan(&self, id: Ulid, reserved_at: Ms) -> Result<bool, StoreError>;

    async fn insert_booking(&self, booking: &Booking) -> Result<(), StoreError>;

    async fn booking(&self, id: Ulid) -> Result<Option<Booking>, StoreError>;

    async fn bookings_for_date(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Booking>, StoreError>;

    /// Pending → Committed. Returns false if the booking is gone.
    async fn commit_booking(&self, id: Ulid) -> Result<bool, StoreError>;

    async fn delete_booking(&self, id: Ulid) -> Result<bool, StoreError>;
}

/// Read access to administrator-owned resource configuration, plus the
/// write path the admin operations use.
#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    async fn resource(&self, id: Ulid) -> Result<Option<Resource>, StoreError>;

    async fn put_resource(&self, resource: Resource) -> Result<(), StoreError>;
}

/// Everything the engine needs from its storage.
pub trait Backend: SlotStore + ResourceCatalog {}

impl<T: SlotStore + ResourceCatalog> Backend for T {}
