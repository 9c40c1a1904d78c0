//! Prometheus metrics exposition
//!
//! The library crates record their own counters (`resource_requests_total`,
//! `resource_retries_total`, `auth_refresh_total`, `auth_login_total`). The
//! agent adds:
//!
//! - `agent_polls_total` (counter): label `result`
//! - `agent_device_reads_total` (counter): label `result`
//! - `agent_authenticated` (gauge): 1 while a session is held

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the global recorder with a scrape endpoint on `listen_addr`.
///
/// Must be called from inside the tokio runtime, which drives the listener.
pub fn install_recorder(listen_addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(listen_addr)
        .install()
}

/// Record the end of one polling round.
pub fn record_poll(result: &'static str) {
    metrics::counter!("agent_polls_total", "result" => result).increment(1);
}

/// Record one device status read.
pub fn record_device_read(ok: bool) {
    let result = if ok { "success" } else { "error" };
    metrics::counter!("agent_device_reads_total", "result" => result).increment(1);
}

pub fn set_authenticated(authenticated: bool) {
    metrics::gauge!("agent_authenticated").set(if authenticated { 1.0 } else { 0.0 });
}
