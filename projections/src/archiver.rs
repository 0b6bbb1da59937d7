//! Raw archiver: the audit trail of everything on the log.
//!
//! Every record is written verbatim, one archive batch per micro-batch. No
//! decoding, filtering, or deduplication happens here, so even envelopes the
//! projectors reject remain available for replay.

use crate::error::PipelineError;
use crate::runner::{BatchHandler, BatchStats};
use orderstream_core::event_bus::LogRecord;
use orderstream_core::projection::ArchiveStore;
use orderstream_core::{DateTime, Utc};

/// Default component id of the raw archiver.
pub const RAW_COMPONENT: &str = "raw";

/// Batch handler that archives raw payloads.
pub struct RawArchiver<A: ArchiveStore> {
    component: String,
    store: A,
}

impl<A: ArchiveStore> RawArchiver<A> {
    /// Create an archiver with the default component id.
    #[must_use]
    pub fn new(store: A) -> Self {
        Self {
            component: RAW_COMPONENT.to_string(),
            store,
        }
    }

    /// Use a different component id (and therefore checkpoint).
    #[must_use]
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }

    /// The archive store.
    #[must_use]
    pub const fn store(&self) -> &A {
        &self.store
    }
}

impl<A: ArchiveStore> BatchHandler for RawArchiver<A> {
    fn component(&self) -> &str {
        &self.component
    }

    async fn recover(&mut self, committed: Option<u64>) -> Result<(), PipelineError> {
        self.store.recover(committed).await?;
        tracing::info!(component = %self.component, committed = ?committed, "Raw archive reconciled");
        Ok(())
    }

    async fn handle_batch(
        &mut self,
        batch_id: u64,
        records: &[LogRecord],
        _ingested_at: DateTime<Utc>,
    ) -> Result<BatchStats, PipelineError> {
        self.store.write_batch(batch_id, records).await?;

        let mut stats = BatchStats::new(records.len());
        stats.written = records.len();
        Ok(stats)
    }
}
