use std::time::{Duration, Instant};

use chrono::{Datelike, NaiveDate, Weekday};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const FIRST_MONDAY: (i32, u32, u32) = (2030, 1, 7);

async fn connect(host: &str, port: u16, dbname: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(dbname)
        .user("calslot")
        .password("calslot");

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
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
    );
}

/// The first `n` weekdays from 2030-01-07.
fn weekdays(n: usize) -> Vec<NaiveDate> {
    let (y, m, d) = FIRST_MONDAY;
    let start = NaiveDate::from_ymd_opt(y, m, d).expect("valid start date");
    start
        .iter_days()
        .filter(|date| !matches!(date.weekday(), Weekday::Sat | Weekday::Sun))
        .take(n)
        .collect()
}

/// Half-hour starts of a 09:00-17:00 day.
fn half_hours() -> Vec<(String, String)> {
    (0..16)
        .map(|i| {
            let start = 9 * 60 + i * 30;
            let end = start + 30;
            (
                format!("{:02}:{:02}", start / 60, start % 60),
                format!("{:02}:{:02}", end / 60, end % 60),
            )
        })
        .collect()
}

async fn create_event_type(client: &tokio_postgres::Client) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO event_types (id, title, duration) VALUES ('{id}', 'Bench Chat', 30)"
        ))
        .await
        .unwrap();
    id
}

async fn book(
    client: &tokio_postgres::Client,
    event_type: Ulid,
    date: NaiveDate,
    start: &str,
    end: &str,
) -> Result<(), tokio_postgres::Error> {
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, event_type_id, name, email, date, start_time, end_time) \
             VALUES ('{}', '{event_type}', 'Bench', 'bench@example.com', '{date}', '{start}', '{end}')",
            Ulid::new()
        ))
        .await
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, &format!("bench_{}", Ulid::new())).await;
    let event_type = create_event_type(&client).await;

    let mut latencies = Vec::new();
    let started = Instant::now();
    for date in weekdays(20) {
        for (start, end) in half_hours() {
            let t = Instant::now();
            book(&client, event_type, date, &start, &end).await.unwrap();
            latencies.push(t.elapsed());
        }
    }
    let elapsed = started.elapsed();
    println!(
        "  {} bookings in {:.2}s ({:.0}/s)",
        latencies.len(),
        elapsed.as_secs_f64(),
        latencies.len() as f64 / elapsed.as_secs_f64()
    );
    print_latency("insert", &mut latencies);
}

async fn phase2_contention(host: &str, port: u16) {
    let dbname = format!("bench_{}", Ulid::new());
    let setup = connect(host, port, &dbname).await;
    let event_type = create_event_type(&setup).await;
    let date = weekdays(1)[0];

    let clients = 32;
    let mut handles = Vec::new();
    for _ in 0..clients {
        let host = host.to_string();
        let dbname = dbname.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &dbname).await;
            book(&client, event_type, date, "10:00", "10:30").await.is_ok()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap_or(false) {
            winners += 1;
        }
    }
    println!("  {clients} clients raced for one slot, {winners} won");
    assert_eq!(winners, 1, "exactly one booking must be admitted");
}

async fn phase3_reads_under_load(host: &str, port: u16) {
    let dbname = format!("bench_{}", Ulid::new());
    let setup = connect(host, port, &dbname).await;
    let event_type = create_event_type(&setup).await;
    let dates = weekdays(40);

    let writer = {
        let host = host.to_string();
        let dbname = dbname.clone();
        let dates = dates.clone();
        tokio::spawn(async move {
            let client = connect(&host, port, &dbname).await;
            for date in dates {
                for (start, end) in half_hours() {
                    let _ = book(&client, event_type, date, &start, &end).await;
                }
            }
        })
    };

    let reader = connect(host, port, &dbname).await;
    let mut latencies = Vec::new();
    for date in dates.iter().cycle().take(500) {
        let t = Instant::now();
        reader
            .simple_query(&format!(
                "SELECT * FROM slots WHERE event_type = '{event_type}' AND date = '{date}'"
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    let _ = writer.await;
    print_latency("slots query", &mut latencies);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("CALSLOT_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("CALSLOT_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid CALSLOT_PORT");

    println!("=== calslot booking benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential bookings");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contention on one slot");
    phase2_contention(&host, port).await;

    println!("\n[phase 3] slot reads under write load");
    phase3_reads_under_load(&host, port).await;

    println!("\n=== benchmark complete ===");
}
