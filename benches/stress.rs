use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate, NaiveTime};
use ulid::Ulid;

use slotbook::engine::{Engine, EngineSettings, ErrorKind};
use slotbook::model::{Customer, SlotConfig, SlotKey, SlotRange, SlotRef};
use slotbook::store::InMemoryStore;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len().max(1) as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().copied().unwrap_or_default().as_secs_f64() * 1000.0,
    );
}

fn customer(i: usize) -> Customer {
    Customer {
        name: format!("Bench {i}"),
        email: format!("bench{i}@example.com"),
        phone: None,
    }
}

fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// 15-minute slots from 08:00 to 20:00: 48 per day.
fn config() -> SlotConfig {
    SlotConfig::new(time(8, 0), time(20, 0), 15)
}

fn slot(rid: Ulid, date: NaiveDate, index: u32) -> SlotRef {
    let start = time(8, 0) + chrono::TimeDelta::minutes(15 * i64::from(index));
    let end = start + chrono::TimeDelta::minutes(15);
    SlotRef::Virtual(SlotKey::new(rid, date, SlotRange::new(start, end)))
}

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()
}

async fn open_engine(name: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join("slotbook_bench");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{name}.wal"));
    let _ = std::fs::remove_file(&path);
    let store = Arc::new(InMemoryStore::open(path).unwrap());
    Arc::new(Engine::new(store, EngineSettings::default()))
}

async fn phase1_sequential() {
    let engine = open_engine("sequential").await;
    let rid = engine.create_resource(None, config()).await.unwrap();

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let date = base_date() + Days::new((i / 48) as u64);
        let t = Instant::now();
        engine
            .book(rid, date, &[slot(rid, date, (i % 48) as u32)], customer(i))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("book latency", &mut latencies);
}

async fn phase2_concurrent() {
    let engine = open_engine("concurrent").await;
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            // One resource per task: no contention, measures group commit.
            let rid = engine.create_resource(None, config()).await.unwrap();
            for j in 0..n_per_task {
                let date = base_date() + Days::new((j / 48) as u64);
                engine
                    .book(rid, date, &[slot(rid, date, (j % 48) as u32)], customer(task))
                    .await
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_contention() {
    let engine = open_engine("contention").await;
    let rid = engine.create_resource(None, config()).await.unwrap();
    let date = base_date();

    let n_tasks = 64;
    let booked = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..n_tasks {
        let engine = engine.clone();
        let booked = booked.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            // Every task wants a two-slot window somewhere in the first hour.
            for attempt in 0..4u32 {
                let first = (task as u32 + attempt) % 3;
                let refs = [slot(rid, date, first), slot(rid, date, first + 1)];
                match engine.book(rid, date, &refs, customer(task)).await {
                    Ok(_) => {
                        booked.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    Err(e) if e.kind() == ErrorKind::Conflict => {
                        conflicts.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => panic!("unexpected failure: {e}"),
                }
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let bookings = engine.list_bookings(rid, date).await.unwrap();
    assert_eq!(bookings.len(), booked.load(Ordering::Relaxed));
    let slots: usize = bookings.iter().map(|b| b.slot_ids.len()).sum();
    assert!(slots <= 4, "double booking: {slots} slots held in a 4-slot hour");
    println!(
        "  {n_tasks} tasks racing for one hour: {} booked, {} conflicts in {:.2}ms",
        booked.load(Ordering::Relaxed),
        conflicts.load(Ordering::Relaxed),
        start.elapsed().as_secs_f64() * 1000.0
    );
}

async fn phase4_reads_under_load() {
    let engine = open_engine("reads").await;
    let rid = engine.create_resource(None, config()).await.unwrap();
    for i in 0..500 {
        let date = base_date() + Days::new((i / 24) as u64);
        let idx = (i % 24) as u32 * 2;
        engine
            .book(rid, date, &[slot(rid, date, idx)], customer(i))
            .await
            .unwrap();
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for w in 0..4 {
        let engine = engine.clone();
        let stop = stop.clone();
        writers.push(tokio::spawn(async move {
            let wrid = engine.create_resource(None, config()).await.unwrap();
            let mut i = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let date = base_date() + Days::new((w * 1000 + i / 48) as u64);
                let _ = engine
                    .book(wrid, date, &[slot(wrid, date, (i % 48) as u32)], customer(i))
                    .await;
                i += 1;
            }
        }));
    }

    let mut readers = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        readers.push(tokio::spawn(async move {
            let mut list = Vec::with_capacity(200);
            let mut dates = Vec::with_capacity(50);
            for i in 0..200 {
                let date = base_date() + Days::new(i % 21);
                let t = Instant::now();
                engine.list_slots(rid, date).await.unwrap();
                list.push(t.elapsed());
                if i % 4 == 0 {
                    let t = Instant::now();
                    engine.open_dates(rid, base_date(), None).await.unwrap();
                    dates.push(t.elapsed());
                }
            }
            (list, dates)
        }));
    }

    let mut list_latencies = Vec::new();
    let mut date_latencies = Vec::new();
    for h in readers {
        let (list, dates) = h.await.unwrap();
        list_latencies.extend(list);
        date_latencies.extend(dates);
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }

    print_latency("list_slots", &mut list_latencies);
    print_latency("open_dates (60 days)", &mut date_latencies);
}

#[tokio::main]
async fn main() {
    println!("=== slotbook stress benchmark ===\n");

    println!("[phase 1] sequential booking throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent booking throughput");
    phase2_concurrent().await;

    println!("\n[phase 3] contention on one resource");
    phase3_contention().await;

    println!("\n[phase 4] read latency under write load");
    phase4_reads_under_load().await;

    println!("\n=== benchmark complete ===");
}
