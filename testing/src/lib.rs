//! # Orderstream Testing
//!
//! Testing utilities for the orderstream pipeline.
//!
//! This crate provides:
//! - A deterministic clock ([`FixedClock`])
//! - An in-memory event log with fault injection ([`InMemoryEventLog`])
//! - In-memory checkpoint and sink doubles ([`InMemoryCheckpointStore`],
//!   [`InMemoryRecordSink`], [`InMemoryArchiveStore`])
//! - Source row fixtures ([`fixtures`])
//!
//! ## Example
//!
//! ```
//! use orderstream_core::event::Envelope;
//! use orderstream_core::event_bus::LogPublisher;
//! use orderstream_testing::{InMemoryEventLog, fixtures};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let log = InMemoryEventLog::new(3);
//! let envelope = Envelope::order_snapshot(&fixtures::order_row("o1", "delivered"));
//!
//! log.publish(envelope.partition_key(), &envelope.to_bytes()?).await?;
//! assert_eq!(log.len(), 1);
//! # Ok(())
//! # }
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Utc};
use orderstream_core::environment::Clock;

mod log_mocks;
mod projection_mocks;

pub use log_mocks::{InMemoryEventLog, InMemoryLogReader};
pub use projection_mocks::{InMemoryArchiveStore, InMemoryCheckpointStore, InMemoryRecordSink};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use orderstream_testing::mocks::FixedClock;
    /// use orderstream_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        )
    }
}

/// Source rows shaped like the three CSV datasets.
///
/// Every helper fills the remaining columns with plausible values; tests
/// override single cells with [`with`].
pub mod fixtures {
    use orderstream_core::event::SourceRow;

    /// Build a row from `(column, value)` pairs.
    #[must_use]
    pub fn row(cells: &[(&str, &str)]) -> SourceRow {
        cells
            .iter()
            .map(|(column, value)| ((*column).to_string(), (*value).to_string()))
            .collect()
    }

    /// Replace or add one cell.
    #[must_use]
    pub fn with(mut row: SourceRow, column: &str, value: &str) -> SourceRow {
        row.insert(column.to_string(), value.to_string());
        row
    }

    /// An orders row purchased 2018-01-01, delivered 2018-01-05, estimated
    /// 2018-01-10.
    #[must_use]
    pub fn order_row(order_id: &str, status: &str) -> SourceRow {
        row(&[
            ("order_id", order_id),
            ("customer_id", "c-1"),
            ("order_status", status),
            ("order_purchase_timestamp", "2018-01-01 10:00:00"),
            ("order_approved_at", "2018-01-01 10:15:00"),
            ("order_delivered_carrier_at", "2018-01-02 09:00:00"),
            ("order_delivered_customer_date", "2018-01-05 12:00:00"),
            ("order_estimated_delivery_date", "2018-01-10 00:00:00"),
        ])
    }

    /// An order-items row.
    #[must_use]
    pub fn item_row(order_id: &str, order_item_id: &str) -> SourceRow {
        row(&[
            ("order_id", order_id),
            ("order_item_id", order_item_id),
            ("product_id", "p-1"),
            ("seller_id", "s-1"),
            ("shipping_limit_date", "2018-01-03 10:00:00"),
            ("price", "59.90"),
            ("freight_value", "8.72"),
        ])
    }

    /// A payments row.
    #[must_use]
    pub fn payment_row(order_id: &str, sequential: &str, value: &str) -> SourceRow {
        row(&[
            ("order_id", order_id),
            ("payment_sequential", sequential),
            ("payment_type", "credit_card"),
            ("payment_installments", "1"),
            ("payment_value", value),
        ])
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};
