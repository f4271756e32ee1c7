use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::DateTime;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use slotbook::model::{Actor, Ms};
use slotbook::{Config, EngineError, Services};

const HOUR: Ms = 3_600_000;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn open_services(phase: &str) -> Services {
    let config = Config {
        data_dir: std::env::temp_dir().join(format!("slotbook_bench_{phase}_{}", Ulid::new())),
        ..Config::default()
    };
    Services::open(&config).expect("open services")
}

async fn phase1_sequential() {
    let services = open_services("sequential");
    let ctx = CancellationToken::new();
    let user = Ulid::new();
    let n = 2_000;

    let start = Instant::now();
    for i in 0..n {
        services
            .scheduler
            .create_booking(&ctx, Ulid::new(), user, i * HOUR, 30)
            .await
            .expect("sequential booking");
    }
    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
}

/// Many writers contend for a small set of hours; every hour must end up with
/// exactly one booking.
async fn phase2_contended() {
    let services = Arc::new(open_services("contended"));
    let hours: Ms = 50;
    let writers = 64;
    let attempts_per_writer = 50;
    let committed = Arc::new(AtomicU64::new(0));
    let conflicts = Arc::new(AtomicU64::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for w in 0..writers {
        let services = services.clone();
        let committed = committed.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let ctx = CancellationToken::new();
            let user = Ulid::new();
            let mut latencies = Vec::with_capacity(attempts_per_writer);
            for a in 0..attempts_per_writer {
                let hour = ((w * 7 + a * 13) as Ms) % hours;
                let t = Instant::now();
                let result = services
                    .scheduler
                    .create_booking(&ctx, Ulid::new(), user, hour * HOUR + 15 * 60_000, 30)
                    .await;
                latencies.push(t.elapsed());
                match result {
                    Ok(_) => committed.fetch_add(1, Ordering::Relaxed),
                    Err(EngineError::BookingConflict(_)) => conflicts.fetch_add(1, Ordering::Relaxed),
                    Err(e) => panic!("unexpected error: {e}"),
                };
            }
            latencies
        }));
    }

    let mut latencies = Vec::new();
    for h in handles {
        latencies.extend(h.await.expect("writer task"));
    }
    let elapsed = start.elapsed();

    let ctx = CancellationToken::new();
    let stored = services.scheduler.list_all_bookings(&ctx).await.expect("list");
    println!(
        "  {} attempts in {:.2}s: {} committed, {} conflicts, {} stored",
        writers * attempts_per_writer,
        elapsed.as_secs_f64(),
        committed.load(Ordering::Relaxed),
        conflicts.load(Ordering::Relaxed),
        stored.len()
    );
    assert_eq!(stored.len() as Ms, hours, "every hour booked exactly once");
    print_latency("create_booking", &mut latencies);
}

/// Readers list free slots while writers book and cancel.
async fn phase3_read_under_load() {
    let services = Arc::new(open_services("read_load"));
    let ctx = CancellationToken::new();
    let provider = Ulid::new();
    services
        .materializer
        .create_pattern_and_slots(
            &ctx,
            provider,
            1,
            DateTime::parse_from_rfc3339("2025-01-06T08:00:00Z").expect("start"),
            DateTime::parse_from_rfc3339("2025-12-29T18:00:00Z").expect("end"),
        )
        .await
        .expect("materialize");
    let slots = services.materializer.list_slots(&ctx, provider).await.expect("slots");
    println!("  materialized {} slots", slots.len());
    let window_end = slots.last().map(|s| s.end).unwrap_or(0) + 1;
    let slots = Arc::new(slots);

    let stop = CancellationToken::new();
    let mut writer_handles = Vec::new();
    for w in 0..8usize {
        let services = services.clone();
        let slots = slots.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let ctx = CancellationToken::new();
            let actor = Actor::user(Ulid::new());
            let mut i = w;
            while !stop.is_cancelled() && !slots.is_empty() {
                let slot_id = slots[i % slots.len()].id;
                if let Ok(b) = services.scheduler.book_slot(&ctx, Ulid::new(), actor.user_id, slot_id).await {
                    let _ = services.scheduler.delete_booking(&ctx, b.id, actor).await;
                }
                i += 8;
            }
        }));
    }

    let mut latencies = Vec::new();
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(3) {
        let t = Instant::now();
        services
            .materializer
            .list_free_slots(&ctx, provider, 0, window_end)
            .await
            .expect("free slots");
        latencies.push(t.elapsed());
    }
    stop.cancel();
    for h in writer_handles {
        let _ = h.await;
    }
    print_latency("list_free_slots", &mut latencies);
}

async fn phase4_compaction() {
    let services = open_services("compaction");
    let ctx = CancellationToken::new();
    let actor = Actor::user(Ulid::new());
    for i in 0..5_000 {
        let b = services
            .scheduler
            .create_booking(&ctx, Ulid::new(), actor.user_id, i * HOUR, 30)
            .await
            .expect("booking");
        if i % 2 == 0 {
            services
                .scheduler
                .delete_booking(&ctx, b.id, actor)
                .await
                .expect("delete");
        }
    }
    let appends = services.store.appends_since_compact().await;
    let start = Instant::now();
    services.store.compact().await.expect("compact");
    println!(
        "  compacted {appends} journal records in {:.2}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
}

fn main() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");

    runtime.block_on(async {
        println!("=== slotbook stress benchmark ===\n");

        println!("[phase 1] sequential write throughput");
        phase1_sequential().await;

        println!("\n[phase 2] contended writes");
        phase2_contended().await;

        println!("\n[phase 3] free-slot reads under write load");
        phase3_read_under_load().await;

        println!("\n[phase 4] compaction");
        phase4_compaction().await;

        println!("\n=== benchmark complete ===");
    });
}
