//! # Orderstream Core
//!
//! Envelope model and collaborator contracts for the orderstream pipeline.
//!
//! The pipeline ingests e-commerce domain events (orders, line items,
//! payments) into a durable append-only log and continuously projects the
//! raw stream into three typed, deduplicated datasets.
//!
//! ## Core Concepts
//!
//! - **Envelope**: The uniform wire record wrapping one domain event plus its raw field bag
//! - **Payload**: The strongly-typed view of an envelope, decoded once at projection time
//! - **Log**: Publish/subscribe transport with partition keys and at-least-once delivery
//! - **Checkpoint**: Persisted cursor marking the last fully-processed micro-batch
//! - **Sink**: Output store that materializes projected records exactly once
//!
//! ## Data Flow
//!
//! ```text
//! source rows ──► envelopes ──► log ──┬──► raw archiver
//!                                     ├──► orders projector
//!                                     ├──► items projector
//!                                     └──► payments projector
//! ```
//!
//! Every subscriber owns its own cursor and checkpoint, so one component can
//! fail and restart without stalling or rewinding the others.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod event;
pub mod event_bus;
pub mod payload;
pub mod projection;

/// Environment module - Injected dependencies
///
/// All time-dependent behaviour (payment `event_time`, per-batch
/// `ingested_at`, checkpoint timestamps) goes through [`Clock`] so tests can
/// pin it.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use orderstream_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
