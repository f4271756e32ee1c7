use std::net::SocketAddr;
use std::sync::Mutex;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine operations. Labels: op, status.
pub const OPERATIONS_TOTAL: &str = "slotbook_operations_total";

/// Histogram: engine operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "slotbook_operation_duration_seconds";

/// Counter: booking writes rejected for overlapping an existing booking.
pub const BOOKING_CONFLICTS_TOTAL: &str = "slotbook_booking_conflicts_total";

/// Counter: slots written by pattern expansion.
pub const SLOTS_MATERIALIZED_TOTAL: &str = "slotbook_slots_materialized_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "slotbook_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (records per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "slotbook_journal_flush_batch_size";

/// Port of the exporter this process installed, if any.
pub(crate) static EXPORTER_PORT: Mutex<Option<u16>> = Mutex::new(None);

/// Install the Prometheus exporter on `port`. No-op if port is None.
///
/// The recorder is process-global, so only the first successful call
/// installs anything; later calls keep the first exporter.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let mut installed = EXPORTER_PORT.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(existing) = *installed {
        if existing != port {
            tracing::warn!("metrics exporter already on port {existing}; ignoring port {port}");
        }
        return Ok(());
    }
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    *installed = Some(port);
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install the fmt subscriber. Safe to call more than once; later calls are
/// ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// Record one finished engine operation.
pub(crate) fn record_op(op: &'static str, ok: bool, started: std::time::Instant) {
    let status = if ok { "ok" } else { "error" };
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
}
