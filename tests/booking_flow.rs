use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use tokio::sync::broadcast;
use ulid::Ulid;

use slotbook::engine::{Engine, EngineSettings, ErrorKind};
use slotbook::model::*;
use slotbook::store::InMemoryStore;

// ── Test infrastructure ──────────────────────────────────────

fn open_engine(dir: &std::path::Path) -> Engine {
    let store = InMemoryStore::open(dir.join("slotbook.wal")).unwrap();
    Engine::new(Arc::new(store), EngineSettings::default())
}

fn temp_dir() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("slotbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 9, 15).unwrap()
}

fn customer(name: &str) -> Customer {
    Customer {
        name: name.into(),
        email: format!("{}@example.com", name.to_lowercase()),
        phone: None,
    }
}

/// Handles as a form would post them back: text, parsed on the way in.
async fn handles(engine: &Engine, rid: Ulid, picks: &[usize]) -> Vec<SlotRef> {
    let listed = engine.list_slots(rid, date()).await.unwrap();
    picks
        .iter()
        .map(|&i| listed[i].slot_ref.to_string().parse::<SlotRef>().unwrap())
        .collect()
}

async fn recv_event(rx: &mut broadcast::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timeout waiting for event")
        .expect("channel closed")
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn customer_books_from_listed_handles() {
    let engine = open_engine(&temp_dir());
    let config = SlotConfig::new(
        NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        30,
    );
    let rid = engine.create_resource(Some("Van 3".into()), config).await.unwrap();

    let refs = handles(&engine, rid, &[2, 3, 4]).await;
    let booking_id = engine.book(rid, date(), &refs, customer("Grace")).await.unwrap();

    let booking = engine.get_booking(booking_id).await.unwrap();
    assert_eq!(booking.start, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    assert_eq!(booking.end, NaiveTime::from_hms_opt(10, 30, 0).unwrap());

    let listed = engine.list_slots(rid, date()).await.unwrap();
    assert_eq!(listed.len(), 8);
    for (i, view) in listed.iter().enumerate() {
        let expected = if (2..=4).contains(&i) {
            SlotStatus::Booked
        } else {
            SlotStatus::Open
        };
        assert_eq!(view.status, expected, "slot {}", view.range);
    }

    // A second customer working from a stale listing loses cleanly.
    let err = engine
        .book(rid, date(), &refs[1..], customer("Alan"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn admin_closures_shape_the_listing() {
    let engine = open_engine(&temp_dir());
    let rid = engine.create_resource(None, SlotConfig::default()).await.unwrap();

    let nine = SlotRange::new(
        NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
    );
    engine.close_slot(rid, date(), nine).await.unwrap();
    let view = engine.admin_day_view(rid, date()).await.unwrap();
    assert!(!view.whole_day_closed);
    assert_eq!(view.slots.iter().filter(|s| s.closed_by_admin).count(), 1);

    engine.close_day(rid, date()).await.unwrap();
    let listed = engine.list_slots(rid, date()).await.unwrap();
    assert_eq!(listed.len(), 8);
    assert!(listed.iter().all(|s| s.status == SlotStatus::Closed));
    assert!(!engine.has_opening(rid, date()).await.unwrap());

    let open = engine.open_dates(rid, date(), Some(3)).await.unwrap();
    assert_eq!(open, vec![date().succ_opt().unwrap(), date() + chrono::Days::new(2)]);

    engine.reopen_day(rid, date()).await.unwrap();
    let listed = engine.list_slots(rid, date()).await.unwrap();
    assert!(listed.iter().all(|s| s.status == SlotStatus::Open));
}

#[tokio::test]
async fn subscribers_see_booking_lifecycle() {
    let engine = open_engine(&temp_dir());
    let rid = engine.create_resource(None, SlotConfig::default()).await.unwrap();
    let mut rx = engine.store().notify().subscribe(rid);

    let refs = handles(&engine, rid, &[0]).await;
    let booking_id = engine.book(rid, date(), &refs, customer("Edsger")).await.unwrap();

    // The pending booking itself is never announced, only its commit.
    assert!(matches!(recv_event(&mut rx).await, Event::SlotInserted { .. }));
    let Event::SlotStamped { booking_id: stamped, .. } = recv_event(&mut rx).await else {
        panic!("expected SlotStamped");
    };
    assert_eq!(stamped, booking_id);
    assert_eq!(
        recv_event(&mut rx).await,
        Event::BookingCommitted {
            id: booking_id,
            resource_id: rid
        }
    );

    engine.cancel_booking(booking_id).await.unwrap();
    assert!(matches!(recv_event(&mut rx).await, Event::SlotReleased { .. }));
    assert_eq!(
        recv_event(&mut rx).await,
        Event::BookingDeleted {
            id: booking_id,
            resource_id: rid
        }
    );
}

#[tokio::test]
async fn state_survives_restart_and_compaction() {
    let dir = temp_dir();
    let (rid, kept, cancelled) = {
        let engine = open_engine(&dir);
        let rid = engine.create_resource(None, SlotConfig::default()).await.unwrap();
        let a = handles(&engine, rid, &[0, 1]).await;
        let kept = engine.book(rid, date(), &a, customer("Barbara")).await.unwrap();
        let b = handles(&engine, rid, &[4]).await;
        let cancelled = engine.book(rid, date(), &b, customer("John")).await.unwrap();
        engine.cancel_booking(cancelled).await.unwrap();
        engine.store().compact_wal().await.unwrap();
        (rid, kept, cancelled)
    };

    let engine = open_engine(&dir);
    let statuses: Vec<SlotStatus> = engine
        .list_slots(rid, date())
        .await
        .unwrap()
        .iter()
        .map(|s| s.status)
        .collect();
    assert_eq!(&statuses[..2], &[SlotStatus::Booked, SlotStatus::Booked]);
    assert!(statuses[2..].iter().all(|s| *s == SlotStatus::Open));

    let bookings = engine.list_bookings(rid, date()).await.unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].id, kept);
    assert!(engine.get_booking(cancelled).await.is_err());

    // The released row is reused rather than duplicated.
    let again = handles(&engine, rid, &[4]).await;
    assert!(matches!(again[0], SlotRef::Persisted(_)));
    engine.book(rid, date(), &again, customer("Niklaus")).await.unwrap();
}
