//! Prometheus metrics for the interception pipeline.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `edge_host_redirects_total` - Bare-host requests redirected to the canonical host
//! - `edge_threat_signals_total` - Requests whose user-agent matched a low-trust marker
//! - `edge_callback_normalizations_total` - Telegram callbacks rewritten (label: source)
//! - `edge_interceptor_faults_total` - Faults absorbed by an interceptor (label: interceptor)
//!
//! Recording functions are no-ops until [`init_metrics`] installs a recorder,
//! so they are safe to call from tests.

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const HOST_REDIRECTS_TOTAL: &str = "edge_host_redirects_total";
    pub const THREAT_SIGNALS_TOTAL: &str = "edge_threat_signals_total";
    pub const CALLBACK_NORMALIZATIONS_TOTAL: &str = "edge_callback_normalizations_total";
    pub const INTERCEPTOR_FAULTS_TOTAL: &str = "edge_interceptor_faults_total";
}

/// Initialize the Prometheus metrics exporter.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (e.g. port in use
/// or a recorder is already registered).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::HOST_REDIRECTS_TOTAL,
        "Requests redirected from the bare host to the canonical host"
    );
    describe_counter!(
        names::THREAT_SIGNALS_TOTAL,
        "Requests whose User-Agent matched a low-trust marker"
    );
    describe_counter!(
        names::CALLBACK_NORMALIZATIONS_TOTAL,
        "Telegram login callbacks rewritten into the tgAuthResult form field"
    );
    describe_counter!(
        names::INTERCEPTOR_FAULTS_TOTAL,
        "Internal faults absorbed by an interceptor"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

pub fn record_host_redirect() {
    counter!(names::HOST_REDIRECTS_TOTAL).increment(1);
}

pub fn record_threat_signal() {
    counter!(names::THREAT_SIGNALS_TOTAL).increment(1);
}

pub fn record_callback_normalized(source: &'static str) {
    counter!(names::CALLBACK_NORMALIZATIONS_TOTAL, "source" => source).increment(1);
}

pub fn record_interceptor_fault(interceptor: &'static str) {
    counter!(names::INTERCEPTOR_FAULTS_TOTAL, "interceptor" => interceptor).increment(1);
}
