//! Observability setup: structured logging and request metrics.

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with structured logging.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,kestrel=debug"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Record one handled request.
pub fn record_request_metrics(endpoint: &str, status: u16, duration_us: u64) {
    metrics::counter!(
        "kestrel_requests_total",
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "kestrel_request_duration_us",
        "endpoint" => endpoint.to_string()
    )
    .record(duration_us as f64);
}

/// Record transferred file octets. `direction` is "upload" or "download".
pub fn record_transfer_octets(direction: &str, octets: u64) {
    metrics::counter!(
        "kestrel_transfer_octets_total",
        "direction" => direction.to_string()
    )
    .increment(octets);
}

/// Record the current live session count.
pub fn record_active_sessions(count: usize) {
    metrics::gauge!("kestrel_active_sessions").set(count as f64);
}
