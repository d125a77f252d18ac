use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "calslot_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "calslot_query_duration_seconds";

/// Counter: booking attempts. Labels: outcome (created, conflict, rejected).
pub const BOOKINGS_TOTAL: &str = "calslot_bookings_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "calslot_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "calslot_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "calslot_connections_rejected_total";

/// Gauge: number of hosts with a loaded engine.
pub const HOSTS_ACTIVE: &str = "calslot_hosts_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "calslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "calslot_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
/// A failed install is logged and the server keeps running without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter on port {port}: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::UpsertEventType { .. } => "upsert_event_type",
        Command::DeleteEventType { .. } => "delete_event_type",
        Command::SelectEventTypes { .. } => "select_event_types",
        Command::SaveWeeklySchedule { .. } => "save_weekly_schedule",
        Command::SelectWeeklySchedule => "select_weekly_schedule",
        Command::SaveDateOverrides { .. } => "save_date_overrides",
        Command::DeleteDateOverride { .. } => "delete_date_override",
        Command::SelectDateOverrides { .. } => "select_date_overrides",
        Command::InsertBooking(_) => "insert_booking",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectBookedSlots { .. } => "select_booked_slots",
        Command::SelectSlots { .. } => "select_slots",
    }
}
