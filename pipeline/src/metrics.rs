//! Prometheus metrics for the producer and the consumer components.
//!
//! Counters are recorded where the work happens (`orderstream-producer`,
//! `orderstream-projections`); this module only describes them and installs
//! the exporter.
//!
//! # Example
//!
//! ```rust,no_run
//! use orderstream_pipeline::metrics::install_exporter;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! install_exporter("0.0.0.0:9100".parse()?)?;
//! // Metrics available at http://localhost:9100/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{Unit, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build or install the exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns [`MetricsError::Install`] if the listener cannot be set up or a
/// recorder is already installed.
pub fn install_exporter(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    register_metrics();
    tracing::info!(addr = %addr, "Metrics exporter listening");
    Ok(())
}

/// Describe every orderstream counter.
pub fn register_metrics() {
    describe_counter!(
        "orderstream_events_produced_total",
        Unit::Count,
        "Envelopes published to the event log"
    );
    describe_counter!(
        "orderstream_batches_processed_total",
        Unit::Count,
        "Micro-batches committed, by component"
    );
    describe_counter!(
        "orderstream_records_written_total",
        Unit::Count,
        "Records written to a sink, by component"
    );
    describe_counter!(
        "orderstream_records_dropped_total",
        Unit::Count,
        "Records dropped, by component and reason"
    );
}
