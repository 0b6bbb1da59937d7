//! # Orderstream Pipeline
//!
//! Deployment glue for the orderstream binaries:
//!
//! - [`config`]: environment-driven [`Config`]
//! - [`components`]: assembly of the raw archiver and the three projectors
//! - [`supervisor`]: per-component restart policy
//! - [`metrics`]: Prometheus exporter setup
//!
//! Two binaries are built from this crate:
//!
//! ```bash
//! # Publish the CSV datasets to the log
//! cargo run --bin orderstream-producer
//!
//! # Archive and project the log until Ctrl+C
//! cargo run --bin orderstream-consumer
//! ```

pub mod components;
pub mod config;
pub mod metrics;
pub mod supervisor;

pub use components::{COMPONENTS, ComponentContext, start_components};
pub use config::{Config, ConfigError};
pub use supervisor::{ComponentExit, Supervisor};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the tracing subscriber used by both binaries.
///
/// `RUST_LOG` wins; without it orderstream crates log at `info`.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "orderstream=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
