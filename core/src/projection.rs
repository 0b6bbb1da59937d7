//! Projection contracts: checkpoints, sinks, and domain projections.
//!
//! # Overview
//!
//! Each subscriber of the log processes a sequence of micro-batches. For every
//! batch it writes its output and only then advances its checkpoint:
//!
//! ```text
//! read(position) ──► project/validate/dedup ──► sink.write_batch(id) ──► checkpoint.save(id)
//! ```
//!
//! A crash between the write and the checkpoint is safe: on restart the sink
//! discards output of batches newer than the checkpoint
//! ([`RecordSink::recover`]) and the batch is replayed under the same id.
//!
//! ## Key Concepts
//!
//! - **Checkpoint**: last committed batch id and log position of one component
//! - **Natural key**: attributes that identify one logical output row
//! - **Rejection**: why a single envelope was dropped (never fatal)
//!
//! ## Example
//!
//! ```ignore
//! struct PaymentsProjection;
//!
//! impl DomainProjection for PaymentsProjection {
//!     type Record = PaymentRecord;
//!
//!     fn name(&self) -> &'static str {
//!         "payments"
//!     }
//!
//!     fn event_type(&self) -> EventType {
//!         EventType::PaymentReceived
//!     }
//!
//!     fn project(&self, envelope: &Envelope, ingested_at: DateTime<Utc>) -> Result<PaymentRecord, Rejection> {
//!         // decode, validate, derive
//!     }
//! }
//! ```

use crate::event::{Envelope, EventType};
use crate::event_bus::{LogPosition, LogRecord};
use crate::payload::FieldError;
use crate::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;

/// Error type for checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Storage backend error
    #[error("Checkpoint storage error: {0}")]
    Storage(String),

    /// The stored checkpoint cannot be decoded.
    #[error("Checkpoint for '{component}' is corrupted: {reason}")]
    Corrupted {
        /// Component whose checkpoint was read
        component: String,
        /// Decoder message
        reason: String,
    },

    /// The stored checkpoint belongs to another component.
    #[error("Checkpoint for '{component}' belongs to '{found}'")]
    Mismatch {
        /// Component whose checkpoint was read
        component: String,
        /// Component recorded inside the checkpoint
        found: String,
    },
}

impl CheckpointError {
    /// Whether the error needs an operator to reset the position.
    #[must_use]
    pub const fn needs_operator(&self) -> bool {
        matches!(self, Self::Corrupted { .. } | Self::Mismatch { .. })
    }
}

/// Persisted progress of one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Component that owns this checkpoint.
    pub component: String,
    /// Id of the last micro-batch whose output is durable.
    pub batch_id: u64,
    /// Log position after that batch.
    pub position: LogPosition,
    /// When the batch was committed.
    pub committed_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a new checkpoint.
    #[must_use]
    pub fn new(
        component: impl Into<String>,
        batch_id: u64,
        position: LogPosition,
        committed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            component: component.into(),
            batch_id,
            position,
            committed_at,
        }
    }

    /// Ensure a loaded checkpoint belongs to `component`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Mismatch`] if it was written by another
    /// component.
    pub fn verify(self, component: &str) -> Result<Self, CheckpointError> {
        if self.component == component {
            Ok(self)
        } else {
            Err(CheckpointError::Mismatch {
                component: component.to_string(),
                found: self.component,
            })
        }
    }
}

/// Checkpoint persistence, one independent entry per component.
///
/// Implementations must never silently fall back to "earliest" or "latest"
/// on a checkpoint they cannot read: that is a [`CheckpointError::Corrupted`].
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns so runners can hold
/// it as `Arc<dyn CheckpointStore>`.
pub trait CheckpointStore: Send + Sync {
    /// Load the last committed checkpoint of `component`.
    ///
    /// # Returns
    ///
    /// - `Some(checkpoint)` if the component committed before
    /// - `None` if this is a new component (start from earliest)
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] if the store cannot be read or the stored
    /// checkpoint is corrupted or belongs to another component.
    fn load(
        &self,
        component: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>, CheckpointError>> + Send + '_>>;

    /// Durably replace the checkpoint of `checkpoint.component`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Storage`] if the write fails.
    fn save(
        &self,
        checkpoint: &Checkpoint,
    ) -> Pin<Box<dyn Future<Output = Result<(), CheckpointError>> + Send + '_>>;
}

/// Error type for sink operations.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// I/O failure writing or reading output.
    #[error("Sink I/O error: {0}")]
    Io(String),

    /// Rows could not be encoded.
    #[error("Sink serialization error: {0}")]
    Serialization(String),

    /// Committed output cannot be decoded or does not match the checkpoint.
    #[error("Sink output at '{location}' is corrupted: {reason}")]
    Corrupted {
        /// File or directory holding the bad output
        location: String,
        /// What is wrong with it
        reason: String,
    },
}

impl From<std::io::Error> for SinkError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

/// Output partition of a record, written Hive-style as `column=value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    /// Partition column name.
    pub column: &'static str,
    /// Partition value.
    pub value: String,
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.column, self.value)
    }
}

/// A typed output row with a natural key.
pub trait OutputRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Natural key: unique within the sink.
    type Key: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static;

    /// The natural key of this row.
    fn key(&self) -> Self::Key;

    /// Output partition, `None` for unpartitioned datasets.
    fn partition(&self) -> Option<Partition> {
        None
    }
}

/// Typed, partitioned output store owned by exactly one projector.
pub trait RecordSink<R: OutputRecord>: Send + Sync {
    /// Reconcile the sink with the last committed batch.
    ///
    /// Discards output of the one batch that may have been written after
    /// `committed` (batch 0 when `None`) and returns the natural keys of
    /// everything still materialized.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if output cannot be listed, removed, or decoded.
    /// Output of any later batch means the checkpoint does not match the
    /// sink and is reported as [`SinkError::Corrupted`].
    fn recover(
        &self,
        committed: Option<u64>,
    ) -> impl Future<Output = Result<HashSet<R::Key>, SinkError>> + Send;

    /// Durably write the rows of batch `batch_id`, grouped by partition.
    ///
    /// Writing the same batch id again replaces the previous attempt.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the write is not durable.
    fn write_batch(
        &self,
        batch_id: u64,
        rows: &[R],
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Verbatim store of raw envelopes, owned by the raw archiver.
pub trait ArchiveStore: Send + Sync {
    /// Discard the archived batch written after `committed`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if batches cannot be listed or removed, and
    /// [`SinkError::Corrupted`] if the archive holds batches the checkpoint
    /// cannot account for.
    fn recover(&self, committed: Option<u64>) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Durably write the records of batch `batch_id`, payloads unmodified.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the write is not durable.
    fn write_batch(
        &self,
        batch_id: u64,
        records: &[LogRecord],
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Why a single envelope was dropped by a projection.
///
/// Rejections are local to one record: they are counted and logged, never
/// propagated past the micro-batch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    /// A column did not coerce to its declared type.
    #[error(transparent)]
    Coercion(#[from] FieldError),

    /// A required column is null.
    #[error("required column '{0}' is null")]
    MissingField(&'static str),

    /// A column violates a domain predicate.
    #[error("column '{column}' {reason}")]
    Invalid {
        /// Column that failed the predicate
        column: &'static str,
        /// Predicate description
        reason: String,
    },

    /// The envelope is of another variant.
    #[error("expected a {expected} envelope, found {found}")]
    WrongVariant {
        /// Variant the projection consumes
        expected: EventType,
        /// Variant of the envelope
        found: EventType,
    },
}

impl Rejection {
    /// Stable label for counters.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Coercion(_) => "coercion",
            Self::MissingField(_) => "missing_field",
            Self::Invalid { .. } => "invalid",
            Self::WrongVariant { .. } => "wrong_variant",
        }
    }
}

/// Per-variant projection: project, validate, and derive one record.
///
/// Implementations are pure; deduplication and writing belong to the
/// projector that drives them.
pub trait DomainProjection: Send + Sync {
    /// Output row type.
    type Record: OutputRecord;

    /// Projection name (used for checkpointing and identification).
    fn name(&self) -> &'static str;

    /// The only envelope variant this projection consumes.
    fn event_type(&self) -> EventType;

    /// Turn one envelope into one output row.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] if the envelope must be dropped.
    fn project(
        &self,
        envelope: &Envelope,
        ingested_at: DateTime<Utc>,
    ) -> Result<Self::Record, Rejection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_rejects_foreign_checkpoint() {
        let checkpoint = Checkpoint::new("orders", 3, LogPosition::earliest(), Utc::now());

        assert!(checkpoint.clone().verify("orders").is_ok());
        let err = checkpoint.verify("items");
        assert!(matches!(
            err,
            Err(CheckpointError::Mismatch { ref component, ref found })
                if component == "items" && found == "orders"
        ));
    }

    #[test]
    fn corruption_needs_operator() {
        let corrupted = CheckpointError::Corrupted {
            component: "raw".into(),
            reason: "eof".into(),
        };
        assert!(corrupted.needs_operator());
        assert!(!CheckpointError::Storage("disk full".into()).needs_operator());
    }

    #[test]
    fn partition_renders_hive_style() {
        let partition = Partition {
            column: "purchase_date",
            value: "2018-01-01".into(),
        };
        assert_eq!(partition.to_string(), "purchase_date=2018-01-01");
    }
}
