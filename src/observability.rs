use std::net::SocketAddr;
use std::time::Instant;

use crate::engine::{EngineError, ErrorKind};

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total operations executed. Labels: op, outcome.
pub const OPERATIONS_TOTAL: &str = "bedledger_operations_total";

/// Histogram: operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "bedledger_operation_duration_seconds";

/// Counter: writes rejected because the bed was not available. Labels: op.
pub const CONFLICTS_TOTAL: &str = "bedledger_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of open facilities (loaded engines).
pub const FACILITIES_ACTIVE: &str = "bedledger_facilities_active";

/// Counter: bed statuses corrected by drift repair.
pub const STATUS_REPAIRS_TOTAL: &str = "bedledger_status_repairs_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bedledger_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bedledger_wal_flush_batch_size";

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

/// Short label for an operation outcome.
pub fn outcome_label<T>(result: &Result<T, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind().as_str(),
    }
}

/// Record metrics for a finished operation. Storage failures are logged
/// here with the operation name; domain failures only at debug.
pub fn observe<T>(op: &'static str, started: Instant, result: &Result<T, EngineError>) {
    let outcome = outcome_label(result);
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "outcome" => outcome).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = result {
        match e.kind() {
            ErrorKind::Storage => tracing::error!(op, "{e}"),
            ErrorKind::Conflict => {
                metrics::counter!(CONFLICTS_TOTAL, "op" => op).increment(1);
                tracing::debug!(op, "{e}");
            }
            ErrorKind::NotFound | ErrorKind::Validation => tracing::debug!(op, "{e}"),
        }
    }
}
