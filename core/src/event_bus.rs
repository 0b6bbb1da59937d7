//! Durable event log abstraction.
//!
//! The log is an external collaborator: a publish/subscribe store with
//! partition keys and at-least-once delivery. This module defines what the
//! pipeline needs from it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  publish(order_id, bytes)   ┌─────────────┐
//! │   Producer   │ ──────────────────────────► │  Event Log  │
//! └──────────────┘                             └──────┬──────┘
//!                                                     │ read(position)
//!                      ┌──────────────┬───────────────┼──────────────┐
//!                      ▼              ▼               ▼              ▼
//!                ┌──────────┐  ┌────────────┐  ┌───────────┐  ┌────────────┐
//!                │   Raw    │  │   Orders   │  │   Items   │  │  Payments  │
//!                │ archiver │  │ projector  │  │ projector │  │ projector  │
//!                └──────────┘  └────────────┘  └───────────┘  └────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Keyed ordering**: all events of one `order_id` land on one partition, in
//!   publish order. No ordering exists across keys.
//! - **Read-many**: subscribers never mutate the log; each owns its own
//!   [`LogReader`] and [`LogPosition`].
//! - **At-least-once**: a position is only trusted once checkpointed, so a
//!   restart may observe records again.
//!
//! # Dyn Compatibility
//!
//! Both traits return `Pin<Box<dyn Future>>` so they can be held as
//! `Arc<dyn LogPublisher>` / `Box<dyn LogReader>`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during log operations.
#[derive(Error, Debug, Clone)]
pub enum LogError {
    /// A read did not complete in time. Readers retry these.
    #[error("Log read timed out: {0}")]
    Timeout(String),

    /// The log could not be reached.
    #[error("Log unavailable: {0}")]
    Unavailable(String),

    /// Failed to publish a record.
    #[error("Publish failed for key '{key}': {reason}")]
    PublishFailed {
        /// Partition key of the record
        key: String,
        /// The reason for failure
        reason: String,
    },

    /// The position does not describe this log (unknown partition, or an
    /// offset outside the retained range).
    #[error("Invalid log position: {0}")]
    InvalidPosition(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    Transport(String),
}

impl LogError {
    /// Whether the caller should simply retry the read.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Opaque, persistable cursor into the log.
///
/// Tracks the next offset to read for every partition seen so far. A
/// partition absent from the map is read from its earliest retained record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    offsets: BTreeMap<i32, i64>,
}

impl LogPosition {
    /// Position at the earliest retained record of every partition.
    #[must_use]
    pub fn earliest() -> Self {
        Self::default()
    }

    /// Whether nothing has been consumed yet.
    #[must_use]
    pub fn is_earliest(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Next offset to read on `partition`, if any record there was consumed.
    #[must_use]
    pub fn next_offset(&self, partition: i32) -> Option<i64> {
        self.offsets.get(&partition).copied()
    }

    /// Record that `offset` on `partition` has been consumed.
    ///
    /// Never moves a partition backwards.
    pub fn advance(&mut self, partition: i32, offset: i64) {
        let next = offset.saturating_add(1);
        let entry = self.offsets.entry(partition).or_insert(next);
        if *entry < next {
            *entry = next;
        }
    }

    /// Iterate `(partition, next_offset)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (i32, i64)> + '_ {
        self.offsets.iter().map(|(p, o)| (*p, *o))
    }

    /// Total number of records consumed across partitions, assuming every
    /// partition starts at offset zero.
    #[must_use]
    pub fn consumed(&self) -> i64 {
        self.offsets.values().sum()
    }
}

/// One record delivered by the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Partition the record was read from.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Partition key the record was published with.
    pub key: Option<String>,
    /// Serialized envelope, verbatim.
    pub payload: Vec<u8>,
}

/// Result of one [`LogReader::read`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBatch {
    /// Records in delivery order (per-partition order is preserved).
    pub records: Vec<LogRecord>,
    /// Position after the last delivered record.
    pub next_position: LogPosition,
}

impl LogBatch {
    /// An empty batch that leaves the position unchanged.
    #[must_use]
    pub const fn empty(position: LogPosition) -> Self {
        Self {
            records: Vec::new(),
            next_position: position,
        }
    }

    /// Whether no records were delivered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Publishing half of the log.
pub trait LogPublisher: Send + Sync {
    /// Append `payload` to the log under `partition_key`.
    ///
    /// Retrying is the client's concern; an error here means the record was
    /// not accepted.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::PublishFailed`] if the log rejects the record, or
    /// another [`LogError`] if it cannot be reached.
    fn publish(
        &self,
        partition_key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), LogError>> + Send + '_>>;
}

/// Reading half of the log. One reader per subscriber.
pub trait LogReader: Send {
    /// Read up to `max_records` records starting at `position`.
    ///
    /// Returns an empty batch when no new data is available before the
    /// reader's poll timeout.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Timeout`] if the read should be retried, or another
    /// [`LogError`] if the log is unreachable or `position` is invalid.
    fn read(
        &mut self,
        position: &LogPosition,
        max_records: usize,
    ) -> Pin<Box<dyn Future<Output = Result<LogBatch, LogError>> + Send + '_>>;
}
