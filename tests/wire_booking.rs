use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use calslot::host::HostManager;
use calslot::wire;

// 2030-01-07 is a Monday.
const MONDAY: &str = "2030-01-07";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("calslot_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let hosts = Arc::new(HostManager::new(dir, 1000));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let hosts = hosts.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, hosts, "calslot".to_string(), None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr, dbname: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(dbname)
        .user("calslot")
        .password("calslot");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

/// Text of `column` in every row of a simple query.
async fn column(client: &tokio_postgres::Client, sql: &str, column: usize) -> Vec<String> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => row.get(column).map(str::to_string),
            _ => None,
        })
        .collect()
}

async fn slots(client: &tokio_postgres::Client, event_type: &str) -> Vec<String> {
    column(
        client,
        &format!(
            "SELECT * FROM slots WHERE event_type = '{event_type}' AND date = '{MONDAY}' AND format = '24h'"
        ),
        0,
    )
    .await
}

fn sqlstate(err: &tokio_postgres::Error) -> Option<&str> {
    err.code().map(|c| c.code())
}

async fn create_event_type(client: &tokio_postgres::Client, title: &str, duration: u32, buffer: u32) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO event_types (id, title, duration, buffer) VALUES ('{id}', '{title}', {duration}, {buffer})"
        ))
        .await
        .unwrap();
    id
}

async fn book(
    client: &tokio_postgres::Client,
    event_type_id: Ulid,
    start: &str,
    end: &str,
) -> Result<Ulid, tokio_postgres::Error> {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, event_type_id, name, email, date, start_time, end_time) \
             VALUES ('{id}', '{event_type_id}', 'Ada', 'ada@example.com', '{MONDAY}', '{start}', '{end}')"
        ))
        .await
        .map(|()| id)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn default_schedule_over_the_wire() {
    let addr = start_test_server().await;
    let client = connect(addr, "alice").await;

    let weekdays = column(&client, "SELECT * FROM weekly_schedule", 0).await;
    assert_eq!(weekdays, vec!["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"]);
    let enabled = column(&client, "SELECT * FROM weekly_schedule", 1).await;
    assert_eq!(enabled, vec!["f", "t", "t", "t", "t", "t", "f"]);

    create_event_type(&client, "Quick Chat", 30, 0).await;
    let open = slots(&client, "quick-chat").await;
    assert_eq!(open.len(), 16);
    assert_eq!(open.first().map(String::as_str), Some("09:00"));
    assert_eq!(open.last().map(String::as_str), Some("16:30"));
}

#[tokio::test]
async fn booking_removes_slots_and_conflicts() {
    let addr = start_test_server().await;
    let client = connect(addr, "bob").await;

    let chat = create_event_type(&client, "Quick Chat", 30, 0).await;
    let booking = book(&client, chat, "10:00", "10:30").await.unwrap();

    let open = slots(&client, "quick-chat").await;
    assert!(!open.contains(&"10:00".to_string()));
    assert!(open.contains(&"10:30".to_string()));

    let err = book(&client, chat, "10:15", "10:45").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("23P01"));

    let booked = column(&client, &format!("SELECT * FROM booked_slots WHERE date = '{MONDAY}'"), 0).await;
    assert_eq!(booked, vec![booking.to_string()]);

    client
        .batch_execute(&format!("DELETE FROM bookings WHERE id = '{booking}'"))
        .await
        .unwrap();
    assert!(slots(&client, "quick-chat").await.contains(&"10:00".to_string()));

    let statuses = column(&client, "SELECT * FROM bookings WHERE tab = 'cancelled'", 9).await;
    assert_eq!(statuses, vec!["CANCELLED"]);
}

#[tokio::test]
async fn blocked_override_empties_the_day() {
    let addr = start_test_server().await;
    let client = connect(addr, "carol").await;

    let chat = create_event_type(&client, "Quick Chat", 30, 0).await;
    client
        .batch_execute(&format!(
            "INSERT INTO date_overrides (date, enabled, reason) VALUES ('{MONDAY}', false, 'Holiday')"
        ))
        .await
        .unwrap();

    assert!(slots(&client, "quick-chat").await.is_empty());
    let err = book(&client, chat, "09:00", "09:30").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("23P01"));

    let reasons = column(&client, "SELECT * FROM date_overrides", 4).await;
    assert_eq!(reasons, vec!["Holiday"]);

    client
        .batch_execute(&format!("DELETE FROM date_overrides WHERE date = '{MONDAY}'"))
        .await
        .unwrap();
    assert_eq!(slots(&client, "quick-chat").await.len(), 16);
}

#[tokio::test]
async fn wrong_password_is_refused() {
    let addr = start_test_server().await;
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("alice")
        .user("anyone")
        .password("not-the-password");
    assert!(config.connect(NoTls).await.is_err());

    // Any user name is accepted with the shared password.
    let client = connect(addr, "alice").await;
    assert!(column(&client, "SELECT * FROM event_types", 0).await.is_empty());
}

#[tokio::test]
async fn hosts_are_isolated_by_database() {
    let addr = start_test_server().await;
    let alice = connect(addr, "alice").await;
    let bob = connect(addr, "bob").await;

    create_event_type(&alice, "Quick Chat", 30, 0).await;

    let err = bob
        .simple_query(&format!(
            "SELECT * FROM slots WHERE event_type = 'quick-chat' AND date = '{MONDAY}'"
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("P0002"));
    assert!(column(&bob, "SELECT * FROM event_types", 0).await.is_empty());
}

#[tokio::test]
async fn extended_protocol_with_parameters() {
    let addr = start_test_server().await;
    let client = connect(addr, "dave").await;

    create_event_type(&client, "Long Meeting", 60, 0).await;
    let rows = client
        .query(
            "SELECT * FROM slots WHERE event_type = $1 AND date = $2 AND format = $3",
            &[&"long-meeting", &MONDAY, &"12h"],
        )
        .await
        .unwrap();
    let open: Vec<String> = rows.iter().map(|r| r.get(0)).collect();
    assert_eq!(open.len(), 8);
    assert_eq!(open[0], "09:00 AM");
    assert_eq!(open[7], "04:00 PM");
}

#[tokio::test]
async fn errors_carry_sqlstate() {
    let addr = start_test_server().await;
    let client = connect(addr, "erin").await;

    let err = client.batch_execute("SELECT * FROM rooms").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("42601"));

    let err = client
        .batch_execute("INSERT INTO event_types (title, duration) VALUES ('Zero', 0)")
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("22023"));

    create_event_type(&client, "Quick Chat", 30, 0).await;
    let err = client
        .batch_execute("INSERT INTO event_types (title, duration) VALUES ('Quick Chat', 15)")
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("23505"));
}
