//! Stream processing for orderstream.
//!
//! # Overview
//!
//! This crate turns the raw envelope log into durable datasets:
//! - **[`MicroBatchRunner`]**: per-component lifecycle and checkpointed loop
//! - **[`RawArchiver`]**: verbatim audit trail of every envelope
//! - **[`DomainProjector`]**: filter, project, validate, derive, dedup, write
//!   for one envelope variant ([`OrdersProjection`], [`ItemsProjection`],
//!   [`PaymentsProjection`])
//! - **Storage**: JSON-lines file sinks, file and `PostgreSQL` checkpoints
//!
//! # Independence
//!
//! Each of the four components owns its reader, sink, and checkpoint:
//!
//! ```text
//!            ┌──► RawArchiver ─────────────► raw/            checkpoint "raw"
//! Event Log ─┼──► DomainProjector<Orders> ─► orders/         checkpoint "orders"
//!            ├──► DomainProjector<Items> ──► items/          checkpoint "items"
//!            └──► DomainProjector<Payments>► payments/       checkpoint "payments"
//! ```
//!
//! A failing component never stalls or rewinds the others.
//!
//! # Example
//!
//! ```ignore
//! use orderstream_projections::*;
//!
//! let projector = DomainProjector::new(
//!     OrdersProjection,
//!     FileRecordSink::new("processed/orders"),
//! );
//! let (mut runner, shutdown) = MicroBatchRunner::new(
//!     projector,
//!     Box::new(log.reader("orders").await?),
//!     Arc::new(FileCheckpointStore::new("checkpoints")),
//!     Arc::new(SystemClock),
//! );
//!
//! runner.run().await?;
//! ```

pub mod archiver;
pub mod error;
pub mod file;
pub mod items;
pub mod orders;
pub mod payments;
pub mod postgres;
pub mod projector;
pub mod runner;

// Re-export main types for convenience
pub use archiver::{RAW_COMPONENT, RawArchiver};
pub use error::PipelineError;
pub use file::{FileArchiveStore, FileCheckpointStore, FileRecordSink};
pub use items::{ItemRecord, ItemsProjection};
pub use orders::{OrderRecord, OrdersProjection};
pub use payments::{PaymentRecord, PaymentsProjection};
pub use postgres::PostgresCheckpointStore;
pub use projector::DomainProjector;
pub use runner::{BatchHandler, BatchStats, ComponentState, MicroBatchRunner, RunnerSettings};
