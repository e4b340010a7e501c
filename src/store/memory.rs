use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

use super::{ResourceCatalog, SlotStore, StoreError};

pub type SharedSlot = Arc<Mutex<Slot>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut pending = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = pending {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.push(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partially buffered bytes don't leak
    // into the next batch.
    let flush_err = wal.sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Apply a row-level event (caller holds the row lock).
fn apply_to_slot(slot: &mut Slot, event: &Event) {
    match event {
        Event::SlotReserved { reserved_at, .. } => {
            slot.reserved = true;
            slot.booking_id = None;
            slot.reserved_at = Some(*reserved_at);
        }
        Event::SlotReleased { .. } => {
            slot.reserved = false;
            slot.booking_id = None;
        }
        Event::SlotStamped { booking_id, .. } => {
            slot.booking_id = Some(*booking_id);
        }
        _ => {}
    }
}

/// Reservation stamps strictly increase per row, so a stale stamp never
/// matches a later reservation of the same row.
fn next_stamp(previous: Option<Ms>) -> Ms {
    let now = now_ms();
    previous.map_or(now, |prev| now.max(prev + 1))
}

fn slot_event_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::SlotReserved { id, .. }
        | Event::SlotReleased { id, .. }
        | Event::SlotStamped { id, .. } => Some(*id),
        _ => None,
    }
}

/// Slot, booking and resource tables held in memory, made durable by a
/// write-ahead log.
///
/// Each slot row sits behind its own mutex, so conditional updates on one row
/// never wait on another. Key uniqueness is enforced by the `slot_index`
/// entry API. Mutations hold `gate` for reading from WAL append to apply;
/// compaction holds it for writing so its snapshot can't miss an append.
pub struct InMemoryStore {
    resources: DashMap<Ulid, Resource>,
    slots: DashMap<Ulid, SharedSlot>,
    slot_index: DashMap<SlotKey, Ulid>,
    bookings: DashMap<Ulid, Booking>,
    gate: RwLock<()>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
    notify: Arc<NotifyHub>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// A store without a WAL. Nothing survives the process.
    pub fn new() -> Self {
        Self::with_wal(None)
    }

    /// Open (or create) a WAL-backed store, replaying existing records.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self::with_wal(Some(wal_tx));
        store.replay(events);
        Ok(store)
    }

    fn with_wal(wal_tx: Option<mpsc::Sender<WalCommand>>) -> Self {
        Self {
            resources: DashMap::new(),
            slots: DashMap::new(),
            slot_index: DashMap::new(),
            bookings: DashMap::new(),
            gate: RwLock::new(()),
            wal_tx,
            notify: Arc::new(NotifyHub::new()),
        }
    }

    fn replay(&self, events: Vec<Event>) {
        // Rows are rebuilt unlocked, then wrapped once replay is done.
        let mut rows: HashMap<Ulid, Slot> = HashMap::new();
        for event in events {
            match event {
                Event::ResourcePut { resource } => {
                    self.resources.insert(resource.id, resource);
                }
                Event::SlotInserted { slot } => {
                    self.slot_index.insert(slot.key, slot.id);
                    rows.insert(slot.id, slot);
                }
                Event::BookingCreated { booking } => {
                    self.bookings.insert(booking.id, booking);
                }
                Event::BookingCommitted { id, .. } => {
                    if let Some(mut booking) = self.bookings.get_mut(&id) {
                        booking.status = BookingStatus::Committed;
                    }
                }
                Event::BookingDeleted { id, .. } => {
                    self.bookings.remove(&id);
                }
                other => {
                    if let Some(id) = slot_event_id(&other)
                        && let Some(row) = rows.get_mut(&id)
                    {
                        apply_to_slot(row, &other);
                    }
                }
            }
        }
        for (id, row) in rows {
            self.slots.insert(id, Arc::new(Mutex::new(row)));
        }
    }

    pub fn notify(&self) -> &Arc<NotifyHub> {
        &self.notify
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    /// WAL-append + apply + notify for a locked row.
    async fn persist_and_apply(&self, row: &mut Slot, event: Event) -> Result<(), StoreError> {
        self.wal_append(&event).await?;
        apply_to_slot(row, &event);
        self.notify.publish(&event);
        Ok(())
    }

    fn shared_slot(&self, id: &Ulid) -> Option<SharedSlot> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    fn rows_matching(&self, pred: impl Fn(&SlotKey) -> bool) -> Vec<SharedSlot> {
        let ids: Vec<Ulid> = self
            .slot_index
            .iter()
            .filter(|e| pred(e.key()))
            .map(|e| *e.value())
            .collect();
        ids.iter().filter_map(|id| self.shared_slot(id)).collect()
    }

    /// Rewrite the WAL with only the records needed to rebuild current state.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let _exclusive = self.gate.write().await;

        let mut events: Vec<Event> = self
            .resources
            .iter()
            .map(|e| Event::ResourcePut {
                resource: e.value().clone(),
            })
            .collect();
        let rows: Vec<SharedSlot> = self.slots.iter().map(|e| e.value().clone()).collect();
        for row in rows {
            let slot = row.lock().await.clone();
            events.push(Event::SlotInserted { slot });
        }
        events.extend(self.bookings.iter().map(|e| Event::BookingCreated {
            booking: e.value().clone(),
        }));

        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl SlotStore for InMemoryStore {
    async fn slot(&self, id: Ulid) -> Result<Option<Slot>, StoreError> {
        match self.shared_slot(&id) {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn slot_by_key(&self, key: &SlotKey) -> Result<Option<Slot>, StoreError> {
        let id = self.slot_index.get(key).map(|e| *e.value());
        match id {
            Some(id) => self.slot(id).await,
            None => Ok(None),
        }
    }

    async fn slots_for_date(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Slot>, StoreError> {
        let rows = self.rows_matching(|k| k.resource_id == resource_id && k.date == date);
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.lock().await.clone());
        }
        out.sort_by_key(|s| s.key.range);
        Ok(out)
    }

    async fn reserved_between(
        &self,
        resource_id: Ulid,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<SlotKey>, StoreError> {
        let rows = self.rows_matching(|k| {
            k.resource_id == resource_id && k.date >= from && k.date < until
        });
        let mut out = Vec::new();
        for row in rows {
            let slot = row.lock().await;
            if slot.reserved {
                out.push(slot.key);
            }
        }
        Ok(out)
    }

    async fn insert_reserved(&self, key: SlotKey) -> Result<Slot, StoreError> {
        let _gate = self.gate.read().await;
        let id = Ulid::new();
        let slot = Slot {
            id,
            key,
            reserved: true,
            booking_id: None,
            reserved_at: Some(now_ms()),
        };
        let shared: SharedSlot = Arc::new(Mutex::new(slot.clone()));
        // Readers that find the new id through the index wait here until the
        // insert is durable.
        let mut row = shared.lock().await;

        match self.slot_index.entry(key) {
            Entry::Occupied(_) => return Err(StoreError::UniqueViolation(key)),
            Entry::Vacant(v) => {
                v.insert(id);
            }
        }
        self.slots.insert(id, shared.clone());

        let event = Event::SlotInserted { slot: slot.clone() };
        if let Err(e) = self.wal_append(&event).await {
            row.reserved = false;
            self.slots.remove(&id);
            self.slot_index.remove(&key);
            return Err(e);
        }
        self.notify.publish(&event);
        Ok(slot)
    }

    async fn compare_and_swap_reserved(
        &self,
        id: Ulid,
        expected: bool,
        new: bool,
    ) -> Result<bool, StoreError> {
        let shared = self.shared_slot(&id).ok_or(StoreError::NotFound(id))?;
        let _gate = self.gate.read().await;
        let mut row = shared.lock().await;
        if row.reserved != expected {
            return Ok(false);
        }
        if expected == new {
            return Ok(true);
        }
        let resource_id = row.key.resource_id;
        let event = if new {
            Event::SlotReserved {
                id,
                resource_id,
                reserved_at: next_stamp(row.reserved_at),
            }
        } else {
            Event::SlotReleased { id, resource_id }
        };
        self.persist_and_apply(&mut row, event).await?;
        Ok(true)
    }

    async fn claim_slot(&self, id: Ulid) -> Result<Option<Slot>, StoreError> {
        let shared = self.shared_slot(&id).ok_or(StoreError::NotFound(id))?;
        let _gate = self.gate.read().await;
        let mut row = shared.lock().await;
        if row.reserved {
            return Ok(None);
        }
        let event = Event::SlotReserved {
            id,
            resource_id: row.key.resource_id,
            reserved_at: next_stamp(row.reserved_at),
        };
        self.persist_and_apply(&mut row, event).await?;
        Ok(Some(row.clone()))
    }

    async fn stamp_booking(&self, id: Ulid, booking_id: Ulid) -> Result<bool, StoreError> {
        let shared = self.shared_slot(&id).ok_or(StoreError::NotFound(id))?;
        let _gate = self.gate.read().await;
        let mut row = shared.lock().await;
        if !row.reserved || row.booking_id.is_some() {
            return Ok(false);
        }
        let event = Event::SlotStamped {
            id,
            resource_id: row.key.resource_id,
            booking_id,
        };
        self.persist_and_apply(&mut row, event).await?;
        Ok(true)
    }

    async fn release_slot(&self, id: Ulid, booking_id: Ulid) -> Result<(), StoreError> {
        let Some(shared) = self.shared_slot(&id) else {
            return Ok(());
        };
        let _gate = self.gate.read().await;
        let mut row = shared.lock().await;
        if row.booking_id != Some(booking_id) {
            return Ok(());
        }
        let event = Event::SlotReleased {
            id,
            resource_id: row.key.resource_id,
        };
        self.persist_and_apply(&mut row, event).await
    }

    async fn unbound_reserved(&self, reserved_before: Ms) -> Result<Vec<Slot>, StoreError> {
        let rows: Vec<SharedSlot> = self.slots.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for row in rows {
            let slot = row.lock().await;
            if slot.state() == SlotState::Reserved
                && slot.reserved_at.is_some_and(|at| at <= reserved_before)
            {
                out.push(slot.clone());
            }
        }
        Ok(out)
    }

    async fn reclaim_orphan(&self, id: Ulid, reserved_at: Ms) -> Result<bool, StoreError> {
        let shared = self.shared_slot(&id).ok_or(StoreError::NotFound(id))?;
        let _gate = self.gate.read().await;
        let mut row = shared.lock().await;
        if row.state() != SlotState::Reserved || row.reserved_at != Some(reserved_at) {
            return Ok(false);
        }
        let event = Event::SlotReleased {
            id,
            resource_id: row.key.resource_id,
        };
        self.persist_and_apply(&mut row, event).await?;
        Ok(true)
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.wal_append(&event).await?;
        // Subscribers hear about a booking once it commits.
        self.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn booking(&self, id: Ulid) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.get(&id).map(|e| e.value().clone()))
    }

    async fn bookings_for_date(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Booking>, StoreError> {
        let mut out: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|e| e.resource_id == resource_id && e.date == date)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|b| b.start);
        Ok(out)
    }

    async fn commit_booking(&self, id: Ulid) -> Result<bool, StoreError> {
        let _gate = self.gate.read().await;
        let Some(resource_id) = self.bookings.get(&id).map(|b| b.resource_id) else {
            return Ok(false);
        };
        let event = Event::BookingCommitted { id, resource_id };
        self.wal_append(&event).await?;
        let Some(mut booking) = self.bookings.get_mut(&id) else {
            return Ok(false);
        };
        booking.status = BookingStatus::Committed;
        drop(booking);
        self.notify.publish(&event);
        Ok(true)
    }

    async fn delete_booking(&self, id: Ulid) -> Result<bool, StoreError> {
        let _gate = self.gate.read().await;
        let Some((resource_id, status)) = self.bookings.get(&id).map(|b| (b.resource_id, b.status))
        else {
            return Ok(false);
        };
        let event = Event::BookingDeleted { id, resource_id };
        self.wal_append(&event).await?;
        let removed = self.bookings.remove(&id).is_some();
        if status == BookingStatus::Committed {
            self.notify.publish(&event);
        }
        Ok(removed)
    }
}

#[async_trait]
impl ResourceCatalog for InMemoryStore {
    async fn resource(&self, id: Ulid) -> Result<Option<Resource>, StoreError> {
        Ok(self.resources.get(&id).map(|e| e.value().clone()))
    }

    async fn put_resource(&self, resource: Resource) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let event = Event::ResourcePut { resource };
        self.wal_append(&event).await?;
        if let Event::ResourcePut { resource } = &event {
            self.resources.insert(resource.id, resource.clone());
        }
        self.notify.publish(&event);
        Ok(())
    }
}
