use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotkeep_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotkeep_query_duration_seconds";

// ── Reservation metrics ─────────────────────────────────────────

/// Counter: locks granted. Labels: kind (standard, package).
pub const LOCKS_ACQUIRED_TOTAL: &str = "slotkeep_locks_acquired_total";

/// Counter: acquisitions refused because the slot was taken or gone.
pub const LOCK_CONFLICTS_TOTAL: &str = "slotkeep_lock_conflicts_total";

/// Counter: locks released by their client.
pub const LOCKS_RELEASED_TOTAL: &str = "slotkeep_locks_released_total";

/// Counter: expired locks collected by the reaper.
pub const LOCKS_EXPIRED_TOTAL: &str = "slotkeep_locks_expired_total";

/// Counter: locks confirmed into appointments.
pub const BOOKINGS_CONFIRMED_TOTAL: &str = "slotkeep_bookings_confirmed_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotkeep_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotkeep_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotkeep_connections_rejected_total";

/// Gauge: vendors loaded.
pub const VENDORS_ACTIVE: &str = "slotkeep_vendors_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotkeep_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertVendor { .. } => "insert_vendor",
        Command::InsertWorkingHours { .. } => "insert_working_hours",
        Command::InsertService { .. } => "insert_service",
        Command::InsertPackage { .. } => "insert_package",
        Command::InsertStaff { .. } => "insert_staff",
        Command::DeleteStaff { .. } => "delete_staff",
        Command::InsertStaffHours { .. } => "insert_staff_hours",
        Command::InsertBlockedTime { .. } => "insert_blocked_time",
        Command::DeleteBlockedTime { .. } => "delete_blocked_time",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::CancelAppointment { .. } => "cancel_appointment",
        Command::InsertLock { .. } => "insert_lock",
        Command::InsertPackageLock { .. } => "insert_package_lock",
        Command::DeleteLock { .. } => "delete_lock",
        Command::InsertBooking { .. } => "insert_booking",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectLock { .. } => "select_lock",
        Command::SelectStaff { .. } => "select_staff",
    }
}
