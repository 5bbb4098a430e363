use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use slotkeep::config::EngineConfig;
use slotkeep::engine::Engine;
use slotkeep::notify::NotifyHub;
use slotkeep::wire;

// A Monday far enough ahead that no slot is in the past.
const DAY: &str = "2030-01-07";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("slotkeep_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(
        Engine::new(
            dir.join("slotkeep.wal"),
            Arc::new(NotifyHub::new()),
            EngineConfig::default(),
        )
        .unwrap(),
    );

    let served = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = served.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "slotkeep".to_string(), None).await;
            });
        }
    });

    (addr, engine)
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("slotkeep")
        .user("slotkeep")
        .password("slotkeep");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &tokio_postgres::Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

struct Salon {
    vendor: Ulid,
    service: Ulid,
    staff: Ulid,
}

/// Vendor open Mondays 09:00–12:00 with one staff member and a 30-minute service.
async fn open_salon(client: &tokio_postgres::Client) -> Salon {
    let salon = Salon {
        vendor: Ulid::new(),
        service: Ulid::new(),
        staff: Ulid::new(),
    };
    let Salon { vendor, service, staff } = &salon;
    client
        .batch_execute(&format!(
            r#"INSERT INTO vendors (id, name) VALUES ('{vendor}', 'Glow');
               INSERT INTO working_hours (vendor_id, weekday, is_available, start, "end") VALUES ('{vendor}', 'monday', true, '09:00', '12:00');
               INSERT INTO services (id, vendor_id, duration, price) VALUES ('{service}', '{vendor}', 30, 4500);
               INSERT INTO staff (id, vendor_id, name) VALUES ('{staff}', '{vendor}', 'Ada');"#
        ))
        .await
        .unwrap();
    salon
}

fn slots_sql(salon: &Salon, staff: &str) -> String {
    format!(
        "SELECT * FROM slots WHERE vendor_id = '{}' AND date = '{DAY}' AND staff_id = '{staff}' AND service_ids = '{}'",
        salon.vendor, salon.service
    )
}

fn lock_sql(salon: &Salon, lock_id: Ulid, client_id: &str, start: &str, end: &str) -> String {
    format!(
        r#"INSERT INTO locks (id, vendor_id, staff_id, service_id, date, start, "end", client_id, amount) VALUES ('{lock_id}', '{}', '{}', '{}', '{DAY}', '{start}', '{end}', '{client_id}', 4500)"#,
        salon.vendor, salon.staff, salon.service
    )
}

fn starts(rows: &[SimpleQueryRow]) -> Vec<String> {
    rows.iter()
        .map(|r| r.get("start").unwrap().to_string())
        .collect()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn list_lock_and_book() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let salon = open_salon(&client).await;

    let listed = rows(&client, &slots_sql(&salon, "any")).await;
    assert_eq!(
        starts(&listed),
        vec!["09:00", "09:30", "10:00", "10:30", "11:00", "11:30"]
    );
    assert_eq!(listed[0].get("available_staff_count"), Some("1"));

    let lock_id = Ulid::new();
    let granted = rows(&client, &lock_sql(&salon, lock_id, "c1", "10:00", "10:30")).await;
    assert_eq!(granted.len(), 1);
    assert_eq!(granted[0].get("id"), Some(lock_id.to_string().as_str()));
    assert_eq!(granted[0].get("staff_id"), Some(salon.staff.to_string().as_str()));
    let appointment_id = granted[0].get("appointment_id").unwrap().to_string();

    let listed = rows(&client, &slots_sql(&salon, &salon.staff.to_string())).await;
    assert!(!starts(&listed).contains(&"10:00".to_string()));

    let booked = rows(&client, &format!("INSERT INTO bookings (lock_id) VALUES ('{lock_id}')")).await;
    assert_eq!(booked.len(), 1);
    assert_eq!(booked[0].get("id"), Some(appointment_id.as_str()));
    assert_eq!(booked[0].get("status"), Some("scheduled"));

    let appointments = rows(
        &client,
        &format!(
            "SELECT * FROM appointments WHERE vendor_id = '{}' AND date = '{DAY}'",
            salon.vendor
        ),
    )
    .await;
    assert_eq!(appointments.len(), 1);
    assert_eq!(appointments[0].get("start"), Some("10:00"));
    assert_eq!(appointments[0].get("client_id"), Some("c1"));
}

#[tokio::test]
async fn second_client_gets_exclusion_violation() {
    let (addr, _engine) = start_test_server().await;
    let first = connect(addr).await;
    let second = connect(addr).await;
    let salon = open_salon(&first).await;

    first
        .batch_execute(&lock_sql(&salon, Ulid::new(), "c1", "10:00", "10:30"))
        .await
        .unwrap();

    let err = assert_err!(
        second
            .batch_execute(&lock_sql(&salon, Ulid::new(), "c2", "10:00", "10:30"))
            .await
    );
    assert_eq!(err.code(), Some(&SqlState::EXCLUSION_VIOLATION));

    // An adjacent slot is still free.
    assert_ok!(
        second
            .batch_execute(&lock_sql(&salon, Ulid::new(), "c2", "10:30", "11:00"))
            .await
    );
}

#[tokio::test]
async fn off_grid_lock_is_invalid_input() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let salon = open_salon(&client).await;

    let err = client
        .batch_execute(&lock_sql(&salon, Ulid::new(), "c1", "10:10", "10:40"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::INVALID_PARAMETER_VALUE));
}

#[tokio::test]
async fn release_twice_is_fine() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;
    let salon = open_salon(&client).await;

    let lock_id = Ulid::new();
    client
        .batch_execute(&lock_sql(&salon, lock_id, "c1", "09:00", "09:30"))
        .await
        .unwrap();
    let release = format!("DELETE FROM locks WHERE id = '{lock_id}'");
    client.batch_execute(&release).await.unwrap();
    client.batch_execute(&release).await.unwrap();

    assert!(engine.get_lock(lock_id).await.is_none());
    let listed = rows(&client, &slots_sql(&salon, "any")).await;
    assert_eq!(starts(&listed).len(), 6);
}

#[tokio::test]
async fn cancelled_appointment_frees_its_slot() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let salon = open_salon(&client).await;

    let appointment = Ulid::new();
    client
        .batch_execute(&format!(
            r#"INSERT INTO appointments (id, vendor_id, staff_id, date, start, "end", status) VALUES ('{appointment}', '{}', '{}', '{DAY}', '10:00', '10:30', 'scheduled')"#,
            salon.vendor, salon.staff
        ))
        .await
        .unwrap();
    let listed = rows(&client, &slots_sql(&salon, "any")).await;
    assert!(!starts(&listed).contains(&"10:00".to_string()));

    client
        .batch_execute(&format!("DELETE FROM appointments WHERE id = '{appointment}'"))
        .await
        .unwrap();
    let listed = rows(&client, &slots_sql(&salon, "any")).await;
    assert!(starts(&listed).contains(&"10:00".to_string()));
}

#[tokio::test]
async fn lock_lookup_with_bound_parameter() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let salon = open_salon(&client).await;

    let lock_id = Ulid::new();
    client
        .batch_execute(&lock_sql(&salon, lock_id, "c1", "11:00", "11:30"))
        .await
        .unwrap();

    let id = lock_id.to_string();
    let found = client
        .query("SELECT * FROM locks WHERE id = $1", &[&id])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get::<_, String>("id"), id);
}

#[tokio::test]
async fn unknown_table_is_a_syntax_error() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;

    let err = client.simple_query("SELECT * FROM invoices").await.unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::SYNTAX_ERROR));
}
