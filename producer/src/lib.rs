//! # Orderstream Producer
//!
//! Turns the orders, order-items, and payments CSV datasets into envelopes
//! and publishes a capped, randomly ordered selection of them to the log.
//!
//! ## Example
//!
//! ```no_run
//! use orderstream_core::environment::SystemClock;
//! use orderstream_core::event_bus::LogPublisher;
//! use orderstream_producer::{EventProducer, ProducerSettings, SourceSet};
//! use std::sync::Arc;
//!
//! # async fn example(log: Arc<dyn LogPublisher>) -> Result<(), orderstream_producer::ProducerError> {
//! let sources = SourceSet {
//!     orders: "data/orders.csv".into(),
//!     items: "data/order_items.csv".into(),
//!     payments: "data/order_payments.csv".into(),
//! };
//! let producer = EventProducer::new(log, Arc::new(SystemClock), ProducerSettings::default());
//! let emitted = producer.run(&sources).await?;
//! # let _ = emitted;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod producer;
pub mod source;

pub use error::ProducerError;
pub use producer::{EventProducer, ProducerSettings};
pub use source::{SourceSet, for_each_row, read_rows};
