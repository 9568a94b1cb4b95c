use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "spotlight_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "spotlight_query_duration_seconds";

/// Counter: slot proposals. Labels: outcome (admitted, conflict, rejected, error).
pub const SLOTS_PROPOSED_TOTAL: &str = "spotlight_slots_proposed_total";

/// Counter: active-slot lookups. Labels: result (hit, miss).
pub const ACTIVE_RESOLVES_TOTAL: &str = "spotlight_active_resolves_total";

/// Counter: lookups that found more than one live slot.
pub const INVARIANT_VIOLATIONS_TOTAL: &str = "spotlight_invariant_violations_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: slots physically stored, expired-but-unreaped included.
pub const SLOTS_STORED: &str = "spotlight_slots_stored";

/// Counter: slots deleted by the reaper.
pub const SLOTS_REAPED_TOTAL: &str = "spotlight_slots_reaped_total";

/// Counter: reaper passes that hit a storage error.
pub const REAPER_ERRORS_TOTAL: &str = "spotlight_reaper_errors_total";

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "spotlight_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "spotlight_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "spotlight_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "spotlight_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "spotlight_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertSlot { .. } => "insert_slot",
        Command::SelectActive { .. } => "select_active",
    }
}
