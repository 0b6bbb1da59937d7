//! In-memory event log
//!
//! A partitioned, append-only log that behaves like the real one where the
//! pipeline cares: records with equal keys share a partition, positions are
//! per-partition offsets, and readers never consume records destructively.
//! Failures can be scripted for publishing and reading.

use orderstream_core::event_bus::{
    LogBatch, LogError, LogPosition, LogPublisher, LogReader, LogRecord,
};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
struct Stored {
    /// Global publish sequence, used to interleave partitions on read.
    sequence: u64,
    key: String,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct LogState {
    partitions: Vec<Vec<Stored>>,
    published: u64,
    /// Publish attempt (0-based) that should fail.
    fail_publish_at: Option<u64>,
    read_failures: VecDeque<LogError>,
}

/// In-memory event log for fast, deterministic tests.
///
/// Clones share the same log, so a test can keep a handle while the
/// producer and readers own theirs.
///
/// # Example
///
/// ```
/// use orderstream_core::event_bus::{LogPosition, LogPublisher, LogReader};
/// use orderstream_testing::InMemoryEventLog;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let log = InMemoryEventLog::new(2);
/// log.publish("order-1", b"payload").await?;
///
/// let mut reader = log.reader();
/// let batch = reader.read(&LogPosition::earliest(), 10).await?;
/// assert_eq!(batch.records.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryEventLog {
    state: Arc<RwLock<LogState>>,
}

impl InMemoryEventLog {
    /// Create an empty log with `partitions` partitions (at least one).
    #[must_use]
    pub fn new(partitions: usize) -> Self {
        let state = LogState {
            partitions: vec![Vec::new(); partitions.max(1)],
            ..LogState::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Create a reader over this log.
    #[must_use]
    pub fn reader(&self) -> InMemoryLogReader {
        InMemoryLogReader {
            state: Arc::clone(&self.state),
        }
    }

    /// Total number of records in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().unwrap().partitions.iter().map(Vec::len).sum()
    }

    /// Whether the log holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every `(key, payload)` in publish order.
    #[must_use]
    pub fn records(&self) -> Vec<(String, Vec<u8>)> {
        let state = self.state.read().unwrap();
        let mut all: Vec<&Stored> = state.partitions.iter().flatten().collect();
        all.sort_by_key(|s| s.sequence);
        all.into_iter()
            .map(|s| (s.key.clone(), s.payload.clone()))
            .collect()
    }

    /// Partition that `key` is routed to.
    #[must_use]
    pub fn partition_for(&self, key: &str) -> i32 {
        let count = self.state.read().unwrap().partitions.len();
        partition_for(key, count)
    }

    /// Make the `attempt`-th publish (0-based, counting every attempt) fail.
    pub fn fail_publish_at(&self, attempt: u64) {
        self.state.write().unwrap().fail_publish_at = Some(attempt);
    }

    /// Queue an error to be returned by the next read of any reader.
    pub fn fail_next_read(&self, error: LogError) {
        self.state.write().unwrap().read_failures.push_back(error);
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn partition_for(key: &str, partitions: usize) -> i32 {
    let hash = key
        .bytes()
        .fold(17_u64, |h, b| h.wrapping_mul(31).wrapping_add(u64::from(b)));
    (hash % partitions as u64) as i32
}

impl LogPublisher for InMemoryEventLog {
    #[allow(clippy::cast_sign_loss)]
    fn publish(
        &self,
        partition_key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), LogError>> + Send + '_>> {
        let key = partition_key.to_string();
        let payload = payload.to_vec();
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let attempt = state.published;
            state.published += 1;

            if state.fail_publish_at == Some(attempt) {
                return Err(LogError::PublishFailed {
                    key,
                    reason: "injected failure".to_string(),
                });
            }

            let partition = partition_for(&key, state.partitions.len());
            state.partitions[partition as usize].push(Stored {
                sequence: attempt,
                key,
                payload,
            });
            Ok(())
        })
    }
}

/// Reader over an [`InMemoryEventLog`].
#[derive(Debug)]
pub struct InMemoryLogReader {
    state: Arc<RwLock<LogState>>,
}

impl LogReader for InMemoryLogReader {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss
    )]
    fn read(
        &mut self,
        position: &LogPosition,
        max_records: usize,
    ) -> Pin<Box<dyn Future<Output = Result<LogBatch, LogError>> + Send + '_>> {
        let position = position.clone();
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            if let Some(error) = state.read_failures.pop_front() {
                return Err(error);
            }

            let partition_count = state.partitions.len();
            for (partition, _) in position.iter() {
                if partition < 0 || partition as usize >= partition_count {
                    return Err(LogError::InvalidPosition(format!(
                        "partition {partition} does not exist"
                    )));
                }
            }

            let mut pending: Vec<(i32, i64, &Stored)> = Vec::new();
            for (index, records) in state.partitions.iter().enumerate() {
                let partition = index as i32;
                let start = position.next_offset(partition).unwrap_or(0);
                for (offset, stored) in records.iter().enumerate().skip(start as usize) {
                    pending.push((partition, offset as i64, stored));
                }
            }
            pending.sort_by_key(|(_, _, stored)| stored.sequence);
            pending.truncate(max_records);

            let mut next_position = position;
            let records = pending
                .into_iter()
                .map(|(partition, offset, stored)| {
                    next_position.advance(partition, offset);
                    LogRecord {
                        partition,
                        offset,
                        key: Some(stored.key.clone()),
                        payload: stored.payload.clone(),
                    }
                })
                .collect();

            Ok(LogBatch {
                records,
                next_position,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_key_same_partition_in_order() {
        let log = InMemoryEventLog::new(4);
        log.publish("order-1", b"a").await.unwrap();
        log.publish("order-2", b"x").await.unwrap();
        log.publish("order-1", b"b").await.unwrap();

        let mut reader = log.reader();
        let batch = reader.read(&LogPosition::earliest(), 10).await.unwrap();

        let order_one: Vec<_> = batch
            .records
            .iter()
            .filter(|r| r.key.as_deref() == Some("order-1"))
            .collect();
        assert_eq!(order_one.len(), 2);
        assert_eq!(order_one[0].partition, order_one[1].partition);
        assert_eq!(order_one[0].payload, b"a".to_vec());
        assert_eq!(order_one[1].payload, b"b".to_vec());
    }

    #[tokio::test]
    async fn reads_resume_from_position_without_consuming() {
        let log = InMemoryEventLog::new(2);
        for n in 0..5_u8 {
            log.publish(&format!("k{n}"), &[n]).await.unwrap();
        }

        let mut reader = log.reader();
        let first = reader.read(&LogPosition::earliest(), 3).await.unwrap();
        assert_eq!(first.records.len(), 3);

        let rest = reader.read(&first.next_position, 10).await.unwrap();
        assert_eq!(rest.records.len(), 2);

        let again = log.reader().read(&LogPosition::earliest(), 10).await.unwrap();
        assert_eq!(again.records.len(), 5);

        let idle = reader.read(&rest.next_position, 10).await.unwrap();
        assert!(idle.is_empty());
        assert_eq!(idle.next_position, rest.next_position);
    }

    #[tokio::test]
    async fn injected_failures_surface_once() {
        let log = InMemoryEventLog::new(1);
        log.fail_publish_at(1);
        log.fail_next_read(LogError::Timeout("poll".into()));

        assert!(log.publish("a", b"1").await.is_ok());
        assert!(matches!(
            log.publish("b", b"2").await,
            Err(LogError::PublishFailed { ref key, .. }) if key == "b"
        ));
        assert!(log.publish("c", b"3").await.is_ok());

        let mut reader = log.reader();
        assert!(reader.read(&LogPosition::earliest(), 10).await.is_err());
        assert_eq!(reader.read(&LogPosition::earliest(), 10).await.unwrap().records.len(), 2);
    }

    #[tokio::test]
    async fn unknown_partition_is_invalid() {
        let log = InMemoryEventLog::new(1);
        let mut position = LogPosition::earliest();
        position.advance(7, 0);

        let result = log.reader().read(&position, 10).await;
        assert!(matches!(result, Err(LogError::InvalidPosition(_))));
    }
}
