use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roomlock_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roomlock_query_duration_seconds";

/// Counter: room assignment attempts. Labels: outcome (assigned, reassigned,
/// unchanged, or the error code).
pub const ASSIGNMENTS_TOTAL: &str = "roomlock_assignments_total";

/// Histogram: end-to-end assignment latency, lock waits included.
pub const ASSIGNMENT_DURATION_SECONDS: &str = "roomlock_assignment_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "roomlock_connections_active";
pub const CONNECTIONS_TOTAL: &str = "roomlock_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomlock_connections_rejected_total";

/// Gauge: loaded tenant engines.
pub const TENANTS_ACTIVE: &str = "roomlock_tenants_active";

pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomlock_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomlock_wal_flush_batch_size";

/// Histogram: time spent waiting for a row write lock. Labels: row.
pub const ROW_LOCK_WAIT_SECONDS: &str = "roomlock_row_lock_wait_seconds";

/// Counter: row lock waits that hit the lock timeout. Labels: row.
pub const ROW_LOCK_TIMEOUTS_TOTAL: &str = "roomlock_row_lock_timeouts_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
/// A failed install is logged; the server keeps running without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter on {addr}: {e}"),
    }
}

/// Short label for a command, used on query metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoomType { .. } => "insert_room_type",
        Command::InsertRoom { .. } => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateBookingStatus { .. } => "update_booking_status",
        Command::CheckIn { .. } => "check_in",
        Command::CheckOut { .. } => "check_out",
        Command::AssignRoom { .. } => "assign_room",
        Command::SelectAvailableRooms { .. } => "select_available_rooms",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectRooms => "select_rooms",
    }
}
