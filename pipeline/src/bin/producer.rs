//! Orderstream producer.
//!
//! Reads the orders, order-items, and payments datasets, turns every row into
//! an envelope, and publishes a capped, shuffled selection to the log.
//!
//! # Usage
//!
//! ```bash
//! ORDERSTREAM_BROKERS=localhost:9092 cargo run --bin orderstream-producer
//! ```

use anyhow::Context;
use orderstream_core::environment::SystemClock;
use orderstream_pipeline::{Config, init_tracing, metrics};
use orderstream_producer::EventProducer;
use orderstream_redpanda::RedpandaEventLog;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        brokers = %config.log.brokers,
        topic = %config.log.topic,
        max_events = config.producer.max_events,
        "Configuration loaded"
    );

    if let Some(addr) = config.metrics_addr {
        metrics::install_exporter(addr)?;
    }

    let log = RedpandaEventLog::builder()
        .brokers(config.log.brokers.clone())
        .topic(config.log.topic.clone())
        .cluster(config.log.cluster.clone())
        .metadata_timeout(Duration::from_millis(config.log.probe_timeout_ms))
        .build()?;
    log.probe().await.context("Event log unreachable")?;

    let producer = EventProducer::new(
        Arc::new(log),
        Arc::new(SystemClock),
        config.producer_settings(),
    );

    let events = producer.load(&config.source_set())?;
    println!("STREAMING EVENTS: {}", events.len());

    let emitted = producer.emit(&events).await?;
    tracing::info!(emitted = emitted, "Producer finished");
    println!("Done");

    Ok(())
}
