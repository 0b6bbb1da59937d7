//! In-memory checkpoint and sink doubles
//!
//! Provides fast, deterministic storage for projector tests:
//! - [`InMemoryCheckpointStore`]: per-component checkpoints, with corruption
//!   and failure injection
//! - [`InMemoryRecordSink`]: batch-addressed typed output
//! - [`InMemoryArchiveStore`]: batch-addressed raw payloads
//!
//! All three are `Clone` and share state between clones, so a test keeps a
//! handle while the runner owns another.

use orderstream_core::event_bus::LogRecord;
use orderstream_core::projection::{
    ArchiveStore, Checkpoint, CheckpointError, CheckpointStore, OutputRecord, RecordSink,
    SinkError,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
enum StoredCheckpoint {
    Valid(Checkpoint),
    Corrupt(String),
}

/// In-memory checkpoint store for testing resumption.
///
/// # Example
///
/// ```
/// use orderstream_core::event_bus::LogPosition;
/// use orderstream_core::projection::{Checkpoint, CheckpointStore};
/// use orderstream_testing::InMemoryCheckpointStore;
/// use chrono::Utc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryCheckpointStore::new();
///
/// let checkpoint = Checkpoint::new("orders", 0, LogPosition::earliest(), Utc::now());
/// store.save(&checkpoint).await?;
///
/// assert_eq!(store.load("orders").await?, Some(checkpoint));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<String, StoredCheckpoint>>>,
    fail_next_save: Arc<AtomicBool>,
    saves: Arc<AtomicUsize>,
}

impl InMemoryCheckpointStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored checkpoint of `component`, bypassing validation.
    #[must_use]
    pub fn get(&self, component: &str) -> Option<Checkpoint> {
        match self.checkpoints.read().unwrap().get(component) {
            Some(StoredCheckpoint::Valid(checkpoint)) => Some(checkpoint.clone()),
            _ => None,
        }
    }

    /// Store `checkpoint` under `component`, even if it names another one.
    pub fn insert(&self, component: &str, checkpoint: Checkpoint) {
        self.checkpoints
            .write()
            .unwrap()
            .insert(component.to_string(), StoredCheckpoint::Valid(checkpoint));
    }

    /// Replace the checkpoint of `component` with unreadable content.
    pub fn corrupt(&self, component: &str) {
        self.checkpoints.write().unwrap().insert(
            component.to_string(),
            StoredCheckpoint::Corrupt("unexpected end of input".to_string()),
        );
    }

    /// Make the next save fail with a storage error.
    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }

    /// Number of successful saves.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(
        &self,
        component: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>, CheckpointError>> + Send + '_>>
    {
        let component = component.to_string();
        Box::pin(async move {
            let stored = self.checkpoints.read().unwrap().get(&component).cloned();
            match stored {
                None => Ok(None),
                Some(StoredCheckpoint::Valid(checkpoint)) => {
                    checkpoint.verify(&component).map(Some)
                }
                Some(StoredCheckpoint::Corrupt(reason)) => {
                    Err(CheckpointError::Corrupted { component, reason })
                }
            }
        })
    }

    fn save(
        &self,
        checkpoint: &Checkpoint,
    ) -> Pin<Box<dyn Future<Output = Result<(), CheckpointError>> + Send + '_>> {
        let checkpoint = checkpoint.clone();
        Box::pin(async move {
            if self.fail_next_save.swap(false, Ordering::SeqCst) {
                return Err(CheckpointError::Storage("injected failure".to_string()));
            }
            self.checkpoints.write().unwrap().insert(
                checkpoint.component.clone(),
                StoredCheckpoint::Valid(checkpoint),
            );
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// In-memory typed sink, addressed by batch id.
///
/// Rewriting a batch id replaces that batch, exactly like the file sink.
#[derive(Debug)]
pub struct InMemoryRecordSink<R> {
    batches: Arc<RwLock<BTreeMap<u64, Vec<R>>>>,
    fail_next_write: Arc<AtomicBool>,
}

impl<R> Clone for InMemoryRecordSink<R> {
    fn clone(&self) -> Self {
        Self {
            batches: Arc::clone(&self.batches),
            fail_next_write: Arc::clone(&self.fail_next_write),
        }
    }
}

impl<R> Default for InMemoryRecordSink<R> {
    fn default() -> Self {
        Self {
            batches: Arc::new(RwLock::new(BTreeMap::new())),
            fail_next_write: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<R: Clone> InMemoryRecordSink<R> {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every materialized row, in batch order.
    #[must_use]
    pub fn rows(&self) -> Vec<R> {
        self.batches
            .read()
            .unwrap()
            .values()
            .flatten()
            .cloned()
            .collect()
    }

    /// Ids of the batches currently materialized.
    #[must_use]
    pub fn batch_ids(&self) -> Vec<u64> {
        self.batches.read().unwrap().keys().copied().collect()
    }

    /// Make the next write fail with an I/O error.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }
}

/// Drop the batch written after `committed`, refusing when later batches
/// exist. Mirrors the filesystem sinks.
fn reconcile<T>(
    batches: &mut BTreeMap<u64, T>,
    committed: Option<u64>,
    location: &str,
) -> Result<(), SinkError> {
    let in_flight = committed.map_or(Some(0), |c| c.checked_add(1));
    let orphan = batches
        .keys()
        .copied()
        .find(|id| committed.is_none_or(|c| *id > c) && Some(*id) != in_flight);
    if let Some(batch_id) = orphan {
        return Err(SinkError::Corrupted {
            location: location.to_string(),
            reason: format!("holds batch {batch_id} the checkpoint does not account for"),
        });
    }
    if let Some(id) = in_flight {
        batches.remove(&id);
    }
    Ok(())
}

impl<R: OutputRecord> RecordSink<R> for InMemoryRecordSink<R> {
    async fn recover(&self, committed: Option<u64>) -> Result<HashSet<R::Key>, SinkError> {
        let mut batches = self.batches.write().unwrap();
        reconcile(&mut batches, committed, "memory://records")?;
        Ok(batches.values().flatten().map(OutputRecord::key).collect())
    }

    async fn write_batch(&self, batch_id: u64, rows: &[R]) -> Result<(), SinkError> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(SinkError::Io("injected failure".to_string()));
        }
        self.batches.write().unwrap().insert(batch_id, rows.to_vec());
        Ok(())
    }
}

/// In-memory raw archive, addressed by batch id.
#[derive(Clone, Debug, Default)]
pub struct InMemoryArchiveStore {
    batches: Arc<RwLock<BTreeMap<u64, Vec<LogRecord>>>>,
    fail_next_write: Arc<AtomicBool>,
}

impl InMemoryArchiveStore {
    /// Create an empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every archived record, in batch order.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.batches
            .read()
            .unwrap()
            .values()
            .flatten()
            .cloned()
            .collect()
    }

    /// Every archived payload, in batch order.
    #[must_use]
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.records().into_iter().map(|r| r.payload).collect()
    }

    /// Make the next write fail with an I/O error.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }
}

impl ArchiveStore for InMemoryArchiveStore {
    async fn recover(&self, committed: Option<u64>) -> Result<(), SinkError> {
        reconcile(&mut self.batches.write().unwrap(), committed, "memory://archive")
    }

    async fn write_batch(&self, batch_id: u64, records: &[LogRecord]) -> Result<(), SinkError> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(SinkError::Io("injected failure".to_string()));
        }
        self.batches
            .write()
            .unwrap()
            .insert(batch_id, records.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use orderstream_core::event_bus::LogPosition;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: u32,
    }

    impl OutputRecord for Row {
        type Key = u32;

        fn key(&self) -> u32 {
            self.id
        }
    }

    #[tokio::test]
    async fn checkpoint_load_detects_corruption_and_mismatch() {
        let store = InMemoryCheckpointStore::new();
        assert_eq!(store.load("raw").await.unwrap(), None);

        store.corrupt("raw");
        assert!(matches!(
            store.load("raw").await,
            Err(CheckpointError::Corrupted { .. })
        ));

        store.insert(
            "orders",
            Checkpoint::new("items", 1, LogPosition::earliest(), Utc::now()),
        );
        assert!(matches!(
            store.load("orders").await,
            Err(CheckpointError::Mismatch { .. })
        ));
    }

    #[tokio::test]
    async fn failed_save_keeps_previous_checkpoint() {
        let store = InMemoryCheckpointStore::new();
        let first = Checkpoint::new("items", 0, LogPosition::earliest(), Utc::now());
        store.save(&first).await.unwrap();

        store.fail_next_save();
        let second = Checkpoint::new("items", 1, LogPosition::earliest(), Utc::now());
        assert!(store.save(&second).await.is_err());

        assert_eq!(store.load("items").await.unwrap(), Some(first));
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn sink_recover_discards_uncommitted_batches() {
        let sink = InMemoryRecordSink::<Row>::new();
        sink.write_batch(0, &[Row { id: 1 }]).await.unwrap();
        sink.write_batch(1, &[Row { id: 2 }]).await.unwrap();

        let keys = sink.recover(Some(0)).await.unwrap();

        assert_eq!(keys, HashSet::from([1]));
        assert_eq!(sink.batch_ids(), vec![0]);
    }

    #[tokio::test]
    async fn sink_recover_refuses_output_without_checkpoint() {
        let sink = InMemoryRecordSink::<Row>::new();
        sink.write_batch(0, &[Row { id: 1 }]).await.unwrap();
        sink.write_batch(1, &[Row { id: 2 }]).await.unwrap();

        assert!(matches!(
            sink.recover(None).await,
            Err(SinkError::Corrupted { .. })
        ));
        assert_eq!(sink.batch_ids(), vec![0, 1]);

        let fresh = InMemoryRecordSink::<Row>::new();
        fresh.write_batch(0, &[Row { id: 1 }]).await.unwrap();
        assert!(fresh.recover(None).await.unwrap().is_empty());
        assert!(fresh.rows().is_empty());
    }

    #[tokio::test]
    async fn archive_rewrite_replaces_batch() {
        let record = |payload: &[u8]| LogRecord {
            partition: 0,
            offset: 0,
            key: None,
            payload: payload.to_vec(),
        };
        let archive = InMemoryArchiveStore::new();
        archive.write_batch(0, &[record(b"a")]).await.unwrap();
        archive.write_batch(0, &[record(b"b")]).await.unwrap();

        assert_eq!(archive.payloads(), vec![b"b".to_vec()]);
    }
}
