use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16, dbname: &str, user: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(dbname)
        .user(user)
        .password("roomlock");

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
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// One hotel with one room type, in its own tenant.
struct Hotel {
    db: String,
    hotel: Ulid,
    room_type: Ulid,
}

impl Hotel {
    async fn create(client: &tokio_postgres::Client, db: String) -> Self {
        let (hotel, room_type) = (Ulid::new(), Ulid::new());
        client
            .batch_execute(&format!(
                "INSERT INTO room_types (id, hotel_id, name) VALUES ('{room_type}', '{hotel}', 'Standard')"
            ))
            .await
            .unwrap();
        Self { db, hotel, room_type }
    }

    async fn rooms(&self, client: &tokio_postgres::Client, n: usize) -> Vec<Ulid> {
        let mut ids = Vec::with_capacity(n);
        for i in 0..n {
            let id = Ulid::new();
            client
                .batch_execute(&format!(
                    "INSERT INTO rooms (id, hotel_id, room_type_id, number) VALUES ('{id}', '{}', '{}', '{}')",
                    self.hotel,
                    self.room_type,
                    100 + i
                ))
                .await
                .unwrap();
            ids.push(id);
        }
        ids
    }

    async fn booking(&self, client: &tokio_postgres::Client, check_in: NaiveDate, nights: u64) -> Ulid {
        let id = Ulid::new();
        let check_out = check_in + Days::new(nights);
        client
            .batch_execute(&format!(
                "INSERT INTO bookings (id, hotel_id, room_type_id, check_in, check_out, status) \
                 VALUES ('{id}', '{}', '{}', '{check_in}', '{check_out}', 'CONFIRMED')",
                self.hotel, self.room_type
            ))
            .await
            .unwrap();
        id
    }
}

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
}

async fn phase1_sequential(host: &str, port: u16) {
    let db = format!("bench_{}", Ulid::new());
    let client = connect(host, port, &db, "bench").await;
    let hotel = Hotel::create(&client, db).await;
    let rooms = hotel.rooms(&client, 10).await;

    // Back-to-back one-night stays, round-robin over the rooms: never a conflict.
    let n = 2000;
    let mut bookings = Vec::with_capacity(n);
    for i in 0..n {
        let day = base_date() + Days::new((i / rooms.len()) as u64);
        bookings.push(hotel.booking(&client, day, 1).await);
    }

    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for (i, booking) in bookings.iter().enumerate() {
        let room = rooms[i % rooms.len()];
        let t = Instant::now();
        client
            .batch_execute(&format!("UPDATE bookings SET assigned_room_id = '{room}' WHERE id = '{booking}'"))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} assignments in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("assign latency", &mut latencies);
}

async fn phase2_contended(host: &str, port: u16) {
    let db = format!("bench_{}", Ulid::new());
    let setup = connect(host, port, &db, "bench").await;
    let hotel = Arc::new(Hotel::create(&setup, db).await);
    let rooms = Arc::new(hotel.rooms(&setup, 3).await);

    // Every booking covers the same week, so each room has exactly one winner.
    let n_tasks = 50;
    let mut bookings = Vec::with_capacity(n_tasks);
    for _ in 0..n_tasks {
        bookings.push(hotel.booking(&setup, base_date(), 7).await);
    }

    let start = Instant::now();
    let mut handles = Vec::new();
    for (i, booking) in bookings.into_iter().enumerate() {
        let host = host.to_string();
        let hotel = hotel.clone();
        let rooms = rooms.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &hotel.db, &format!("agent{i}")).await;
            let room = rooms[i % rooms.len()];
            let t = Instant::now();
            let result = client
                .batch_execute(&format!("UPDATE bookings SET assigned_room_id = '{room}' WHERE id = '{booking}'"))
                .await;
            let state = result
                .err()
                .and_then(|e| e.as_db_error().map(|db| db.code().code().to_string()));
            (t.elapsed(), state)
        }));
    }

    let (mut won, mut conflicted, mut timed_out) = (0, 0, 0);
    let mut latencies = Vec::with_capacity(n_tasks);
    for h in handles {
        let (latency, state) = h.await.unwrap();
        latencies.push(latency);
        match state.as_deref() {
            None => won += 1,
            Some("23P01") => conflicted += 1,
            Some("55P03") => timed_out += 1,
            Some(other) => println!("  unexpected SQLSTATE {other}"),
        }
    }

    println!(
        "  {n_tasks} agents on {} rooms in {:.2}s: {won} assigned, {conflicted} conflicts, {timed_out} lock timeouts",
        rooms.len(),
        start.elapsed().as_secs_f64()
    );
    print_latency("contended assign latency", &mut latencies);
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let db = format!("bench_{}", Ulid::new());
    let setup = connect(host, port, &db, "bench").await;
    let hotel = Arc::new(Hotel::create(&setup, db).await);
    let rooms = Arc::new(hotel.rooms(&setup, 20).await);
    let probe = hotel.booking(&setup, base_date(), 3).await;

    let mut writer_bookings = Vec::new();
    for i in 0..400 {
        writer_bookings.push(hotel.booking(&setup, base_date() + Days::new(10 + (i / 20) as u64), 1).await);
    }

    let writer = {
        let host = host.to_string();
        let hotel = hotel.clone();
        let rooms = rooms.clone();
        tokio::spawn(async move {
            let client = connect(&host, port, &hotel.db, "writer").await;
            for (i, booking) in writer_bookings.iter().enumerate() {
                let room = rooms[i % rooms.len()];
                let _ = client
                    .batch_execute(&format!("UPDATE bookings SET assigned_room_id = '{room}' WHERE id = '{booking}'"))
                    .await;
            }
        })
    };

    let reader = connect(host, port, &hotel.db, "reader").await;
    let mut latencies = Vec::with_capacity(500);
    for _ in 0..500 {
        let t = Instant::now();
        reader
            .simple_query(&format!("SELECT * FROM available_rooms WHERE booking_id = '{probe}'"))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    writer.await.unwrap();

    print_latency("available_rooms latency", &mut latencies);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("ROOMLOCK_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("ROOMLOCK_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid ROOMLOCK_PORT");

    println!("=== roomlock contention benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential assignment throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] agents racing for the same rooms");
    phase2_contended(&host, port).await;

    println!("\n[phase 3] availability reads under assignment load");
    phase3_read_under_load(&host, port).await;

    println!("\n=== benchmark complete ===");
}
