//! Domain projector: filter, project, deduplicate, write.
//!
//! A [`DomainProjector`] turns one [`DomainProjection`] into a
//! [`BatchHandler`]. Deduplication is cumulative over the whole sink: the set
//! of written natural keys is rebuilt from the sink itself on every start, so
//! it survives restarts and never includes output of uncommitted batches.

use crate::error::PipelineError;
use crate::runner::{BatchHandler, BatchStats};
use orderstream_core::event::Envelope;
use orderstream_core::event_bus::LogRecord;
use orderstream_core::projection::{DomainProjection, OutputRecord, RecordSink};
use orderstream_core::{DateTime, Utc};
use std::collections::HashSet;

/// Drop reason for payloads that are not a valid envelope.
pub const MALFORMED: &str = "malformed";
/// Drop reason for natural keys that were already written.
pub const DUPLICATE: &str = "duplicate";

type KeyOf<P> = <<P as DomainProjection>::Record as OutputRecord>::Key;

/// Batch handler for one envelope variant.
pub struct DomainProjector<P, S>
where
    P: DomainProjection,
    S: RecordSink<P::Record>,
{
    projection: P,
    sink: S,
    written: HashSet<KeyOf<P>>,
}

impl<P, S> DomainProjector<P, S>
where
    P: DomainProjection,
    S: RecordSink<P::Record>,
{
    /// Create a projector writing to `sink`.
    ///
    /// The dedup set starts empty and is seeded by
    /// [`BatchHandler::recover`].
    #[must_use]
    pub fn new(projection: P, sink: S) -> Self {
        Self {
            projection,
            sink,
            written: HashSet::new(),
        }
    }

    /// The output sink.
    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Number of natural keys materialized so far.
    #[must_use]
    pub fn written_keys(&self) -> usize {
        self.written.len()
    }

    /// Project the records of one batch into fresh, unique rows.
    fn project_batch(
        &self,
        records: &[LogRecord],
        ingested_at: DateTime<Utc>,
    ) -> (Vec<P::Record>, BatchStats) {
        let name = self.projection.name();
        let variant = self.projection.event_type();
        let mut stats = BatchStats::new(records.len());
        let mut batch_keys = HashSet::new();
        let mut rows = Vec::new();

        for record in records {
            let envelope = match Envelope::from_bytes(&record.payload) {
                Ok(envelope) => envelope,
                Err(error) => {
                    tracing::warn!(
                        component = name,
                        partition = record.partition,
                        offset = record.offset,
                        error = %error,
                        "Dropping malformed envelope"
                    );
                    stats.drop_record(MALFORMED);
                    continue;
                }
            };

            if envelope.event_type != variant {
                stats.ignored += 1;
                continue;
            }

            match self.projection.project(&envelope, ingested_at) {
                Ok(row) => {
                    let key = row.key();
                    if self.written.contains(&key) || !batch_keys.insert(key.clone()) {
                        tracing::debug!(component = name, key = ?key, "Suppressing duplicate key");
                        stats.drop_record(DUPLICATE);
                    } else {
                        rows.push(row);
                    }
                }
                Err(rejection) => {
                    tracing::warn!(
                        component = name,
                        order_id = %envelope.order_id,
                        reason = rejection.reason(),
                        error = %rejection,
                        "Dropping record"
                    );
                    stats.drop_record(rejection.reason());
                }
            }
        }

        stats.written = rows.len();
        (rows, stats)
    }
}

impl<P, S> BatchHandler for DomainProjector<P, S>
where
    P: DomainProjection,
    S: RecordSink<P::Record>,
{
    fn component(&self) -> &str {
        self.projection.name()
    }

    async fn recover(&mut self, committed: Option<u64>) -> Result<(), PipelineError> {
        self.written = self.sink.recover(committed).await?;
        tracing::info!(
            component = self.projection.name(),
            committed = ?committed,
            keys = self.written.len(),
            "Sink reconciled"
        );
        Ok(())
    }

    async fn handle_batch(
        &mut self,
        batch_id: u64,
        records: &[LogRecord],
        ingested_at: DateTime<Utc>,
    ) -> Result<BatchStats, PipelineError> {
        let (rows, stats) = self.project_batch(records, ingested_at);

        if !rows.is_empty() {
            self.sink.write_batch(batch_id, &rows).await?;
            self.written.extend(rows.iter().map(OutputRecord::key));
        }

        Ok(stats)
    }
}
