use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Config, NoTls};
use slotkeep::model::format_hhmm;
use ulid::Ulid;

const SLOT: u32 = 30; // minutes
const DAY_END: u32 = 23 * 60 + 30;
const STARTS_PER_DAY: u32 = DAY_END / SLOT;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("slotkeep")
        .user("slotkeep")
        .password("slotkeep");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

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
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

/// The n-th bookable (date, start) pair, walking forward a day at a time.
fn nth_slot(base: NaiveDate, n: u32) -> (NaiveDate, u32) {
    let date = base
        .checked_add_days(Days::new((n / STARTS_PER_DAY) as u64))
        .expect("date overflow");
    (date, (n % STARTS_PER_DAY) * SLOT)
}

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 7).expect("valid date")
}

struct Vendor {
    id: Ulid,
    service: Ulid,
}

/// A vendor open every day 00:00–23:30 with a 30-minute service and
/// `staff` professionals (none means the vendor itself is the only resource).
async fn open_vendor(client: &tokio_postgres::Client, staff: usize) -> Vendor {
    let id = Ulid::new();
    let service = Ulid::new();
    let mut sql = format!("INSERT INTO vendors (id, name) VALUES ('{id}', 'bench');");
    for weekday in 0..7 {
        sql.push_str(&format!(
            r#"INSERT INTO working_hours (vendor_id, weekday, is_available, start, "end") VALUES ('{id}', {weekday}, true, '00:00', '{}');"#,
            format_hhmm(DAY_END)
        ));
    }
    sql.push_str(&format!(
        "INSERT INTO services (id, vendor_id, duration, price) VALUES ('{service}', '{id}', {SLOT}, 3000);"
    ));
    for _ in 0..staff {
        let sid = Ulid::new();
        sql.push_str(&format!(
            "INSERT INTO staff (id, vendor_id, name) VALUES ('{sid}', '{id}', NULL);"
        ));
    }
    client.batch_execute(&sql).await.unwrap();
    Vendor { id, service }
}

fn lock_sql(vendor: &Vendor, lock_id: Ulid, client_id: &str, date: NaiveDate, start: u32) -> String {
    format!(
        r#"INSERT INTO locks (id, vendor_id, staff_id, service_id, date, start, "end", client_id) VALUES ('{lock_id}', '{}', 'any', '{}', '{date}', '{}', '{}', '{client_id}')"#,
        vendor.id,
        vendor.service,
        format_hhmm(start),
        format_hhmm(start + SLOT)
    )
}

fn booking_sql(lock_id: Ulid) -> String {
    format!("INSERT INTO bookings (lock_id) VALUES ('{lock_id}')")
}

/// Lock then book the n-th slot of `vendor`.
async fn book(client: &tokio_postgres::Client, vendor: &Vendor, client_id: &str, n: u32) {
    let (date, start) = nth_slot(base_date(), n);
    let lock_id = Ulid::new();
    client
        .batch_execute(&lock_sql(vendor, lock_id, client_id, date, start))
        .await
        .unwrap();
    client.batch_execute(&booking_sql(lock_id)).await.unwrap();
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let vendor = open_vendor(&client, 0).await;

    let n = 2000;
    let mut lock_latencies = Vec::with_capacity(n as usize);
    let mut book_latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();

    for i in 0..n {
        let (date, slot) = nth_slot(base_date(), i);
        let lock_id = Ulid::new();

        let t = Instant::now();
        client
            .batch_execute(&lock_sql(&vendor, lock_id, "seq", date, slot))
            .await
            .unwrap();
        lock_latencies.push(t.elapsed());

        let t = Instant::now();
        client.batch_execute(&booking_sql(lock_id)).await.unwrap();
        book_latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} lock+book pairs in {:.2}s = {ops:.0} bookings/sec", elapsed.as_secs_f64());
    print_latency("lock latency", &mut lock_latencies);
    print_latency("book latency", &mut book_latencies);
}

async fn phase2_contended(host: &str, port: u16) {
    let n_tasks = 20;
    let staff = 3;
    let n_slots = STARTS_PER_DAY * 2;

    let setup = connect(host, port).await;
    let vendor = Arc::new(open_vendor(&setup, staff).await);
    drop(setup);

    let won = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for t in 0..n_tasks {
        let host = host.to_string();
        let vendor = vendor.clone();
        let won = won.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let client_id = format!("racer-{t}");
            for n in 0..n_slots {
                let (date, slot) = nth_slot(base_date(), n);
                let lock_id = Ulid::new();
                match client
                    .batch_execute(&lock_sql(&vendor, lock_id, &client_id, date, slot))
                    .await
                {
                    Ok(()) => {
                        // Book straight away: a client holds one lock at a time.
                        client.batch_execute(&booking_sql(lock_id)).await.unwrap();
                        won.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) if e.code() == Some(&SqlState::EXCLUSION_VIOLATION) => {
                        conflicts.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let won = won.load(Ordering::Relaxed);
    let conflicts = conflicts.load(Ordering::Relaxed);
    let attempts = n_tasks * n_slots as usize;
    println!(
        "  {n_tasks} clients racing for {n_slots} slots x {staff} staff: {won} booked, {conflicts} conflicts in {:.2}s = {:.0} attempts/sec",
        elapsed.as_secs_f64(),
        attempts as f64 / elapsed.as_secs_f64()
    );
    assert_eq!(won, n_slots as usize * staff, "double booking or lost capacity");
}

async fn phase3_listing_under_load(host: &str, port: u16) {
    let setup = connect(host, port).await;
    let vendor = Arc::new(open_vendor(&setup, 4).await);
    // Pre-fill a day so listings are not trivial
    for n in 0..STARTS_PER_DAY {
        book(&setup, &vendor, "prefill", n).await;
    }
    drop(setup);

    // Writers keep booking further out on the same vendor
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5u32 {
        let host = host.to_string();
        let stop = stop.clone();
        let vendor = vendor.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let client_id = format!("writer-{w}");
            let mut n = STARTS_PER_DAY * (1 + w * 100);
            while !stop.load(Ordering::Relaxed) {
                let (date, slot) = nth_slot(base_date(), n);
                let lock_id = Ulid::new();
                if client
                    .batch_execute(&lock_sql(&vendor, lock_id, &client_id, date, slot))
                    .await
                    .is_ok()
                {
                    let _ = client.batch_execute(&booking_sql(lock_id)).await;
                }
                n += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        let vendor = vendor.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let sql = format!(
                "SELECT * FROM slots WHERE vendor_id = '{}' AND date = '{}' AND service_ids = '{}'",
                vendor.id,
                base_date(),
                vendor.service
            );
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client.simple_query(&sql).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("slot listing", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for c in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let vendor = open_vendor(&client, 1).await;
            let client_id = format!("storm-{c}");
            for n in 0..ops_per_conn {
                book(&client, &vendor, &client_id, n).await;
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} bookings each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("SLOTKEEP_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("SLOTKEEP_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid SLOTKEEP_PORT");

    println!("=== slotkeep stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase books against its own vendor

    println!("[phase 1] sequential lock + book");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended locks");
    phase2_contended(&host, port).await;

    println!("\n[phase 3] slot listing under write load");
    phase3_listing_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
