//! Prometheus metrics, recorded through the `metrics` facade.
//!
//! The recorder is installed once per process; `/metrics` renders the
//! handle. Handlers report through the free functions below instead of
//! touching any global state directly.

use anyhow::Result;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder, or returns the existing handle.
///
/// Idempotent so tests can build several routers in one process.
pub fn install() -> Result<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS.get() {
        return Ok(handle.clone());
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Ok(PROMETHEUS.get_or_init(|| handle).clone()),
        // lost the install race to another thread
        Err(err) => match PROMETHEUS.get() {
            Some(handle) => Ok(handle.clone()),
            None => Err(err.into()),
        },
    }
}

fn stream_label(stream: bool) -> &'static str {
    if stream {
        "true"
    } else {
        "false"
    }
}

/// Records a completed request with its outcome and duration.
pub fn record_request(status: &'static str, stream: bool, duration: Duration) {
    let stream = stream_label(stream);
    counter!("proxy_requests_total", "status" => status, "stream" => stream).increment(1);
    histogram!("proxy_request_duration_seconds", "stream" => stream)
        .record(duration.as_secs_f64());
}

/// Records how long the backend took to produce (or start producing) output.
pub fn record_backend_duration(duration: Duration) {
    histogram!("backend_duration_seconds").record(duration.as_secs_f64());
}

/// Counts a mapped error by failure category.
pub fn record_error(category: &'static str) {
    counter!("proxy_errors_total", "category" => category).increment(1);
}

pub fn increment_active() {
    gauge!("proxy_active_requests").increment(1.0);
}

pub fn decrement_active() {
    gauge!("proxy_active_requests").decrement(1.0);
}
