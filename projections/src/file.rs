//! Filesystem sinks and checkpoint store.
//!
//! # Layout
//!
//! ```text
//! raw_dir/
//!   batch-00000000000000000000.jsonl        one archived record per line
//! processed_dir/orders/
//!   purchase_date=2018-01-01/
//!     part-00000000000000000000.jsonl       one JSON row per line
//! processed_dir/items/
//!   part-00000000000000000000.jsonl
//! checkpoint_dir/
//!   orders.json
//! ```
//!
//! Every file is written to a hidden temporary name, synced, then renamed, so
//! readers only ever see complete files. Data files carry the zero-padded
//! batch id, which is how [`RecordSink::recover`] finds the output of the
//! batch written after the checkpoint. Output the checkpoint cannot account
//! for is never deleted: recovery fails with [`SinkError::Corrupted`].

use orderstream_core::event_bus::LogRecord;
use orderstream_core::projection::{
    ArchiveStore, Checkpoint, CheckpointError, CheckpointStore, OutputRecord, Partition,
    RecordSink, SinkError,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const PART_PREFIX: &str = "part-";
const BATCH_PREFIX: &str = "batch-";
const DATA_SUFFIX: &str = ".jsonl";
const TEMP_PREFIX: &str = ".";
const TEMP_SUFFIX: &str = ".tmp";

fn data_file_name(prefix: &str, batch_id: u64) -> String {
    format!("{prefix}{batch_id:020}{DATA_SUFFIX}")
}

/// Batch id of a data file name, `None` for anything else.
fn batch_of(prefix: &str, file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix(prefix)?
        .strip_suffix(DATA_SUFFIX)?
        .parse()
        .ok()
}

/// Write `contents` to `dir/name` atomically.
async fn write_atomic(dir: &Path, name: &str, contents: &[u8]) -> std::io::Result<()> {
    fs::create_dir_all(dir).await?;
    let temp = dir.join(format!("{TEMP_PREFIX}{name}{TEMP_SUFFIX}"));
    let target = dir.join(name);

    let mut file = fs::File::create(&temp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temp, &target).await
}

/// Files directly under `dir`, or nothing if it does not exist.
async fn list_files(dir: &Path) -> std::io::Result<Vec<(PathBuf, String)>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            let name = entry.file_name().to_string_lossy().into_owned();
            files.push((entry.path(), name));
        }
    }
    files.sort();
    Ok(files)
}

/// Reconcile one data directory with the last committed batch.
///
/// At most one batch, the one after `committed` (batch 0 without a
/// checkpoint), can have been written without being checkpointed; its file
/// and leftover temporaries are removed. Any newer data file means the
/// checkpoint was lost or rolled back, and nothing is deleted.
///
/// Returns the data files that remain.
async fn prune(
    dir: &Path,
    prefix: &str,
    committed: Option<u64>,
) -> Result<Vec<PathBuf>, SinkError> {
    let in_flight = committed.map_or(Some(0), |c| c.checked_add(1));
    let files = list_files(dir).await?;

    let mut temporaries = Vec::new();
    let mut kept = Vec::new();
    let mut discarded = Vec::new();
    for (path, name) in files {
        if name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX) {
            temporaries.push(path);
            continue;
        }
        let Some(batch_id) = batch_of(prefix, &name) else {
            continue;
        };
        if committed.is_some_and(|c| batch_id <= c) {
            kept.push(path);
        } else if Some(batch_id) == in_flight {
            discarded.push((path, batch_id));
        } else {
            let reason = match committed {
                Some(c) => format!("holds batch {batch_id} past the last committed batch {c}"),
                None => format!("holds batch {batch_id} but no checkpoint exists"),
            };
            return Err(SinkError::Corrupted {
                location: dir.display().to_string(),
                reason,
            });
        }
    }

    for path in temporaries {
        fs::remove_file(&path).await?;
    }
    for (path, batch_id) in discarded {
        tracing::info!(file = %path.display(), batch_id = batch_id, "Discarding uncommitted output");
        fs::remove_file(&path).await?;
    }
    Ok(kept)
}

/// JSON-lines record sink, optionally Hive-partitioned.
pub struct FileRecordSink<R> {
    root: PathBuf,
    _record: PhantomData<fn() -> R>,
}

impl<R> FileRecordSink<R> {
    /// Create a sink rooted at `root` (created on first write).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            _record: PhantomData,
        }
    }

    /// Root directory of the dataset.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, partition: Option<&Partition>) -> PathBuf {
        partition.map_or_else(|| self.root.clone(), |p| self.root.join(p.to_string()))
    }

    /// Unpartitioned root plus every `column=value` subdirectory.
    async fn data_dirs(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut dirs = vec![self.root.clone()];
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() && name.contains('=') {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

impl<R: OutputRecord> FileRecordSink<R> {
    /// Read every committed row (test and inspection helper).
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if a file cannot be read or decoded.
    pub async fn read_all(&self) -> Result<Vec<R>, SinkError> {
        let mut rows = Vec::new();
        for dir in self.data_dirs().await? {
            for (path, name) in list_files(&dir).await? {
                if batch_of(PART_PREFIX, &name).is_some() {
                    rows.extend(read_rows::<R>(&path).await?);
                }
            }
        }
        Ok(rows)
    }
}

async fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, SinkError> {
    let contents = fs::read_to_string(path).await?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| SinkError::Corrupted {
                location: path.display().to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

impl<R: OutputRecord> RecordSink<R> for FileRecordSink<R> {
    async fn recover(&self, committed: Option<u64>) -> Result<HashSet<R::Key>, SinkError> {
        let mut keys = HashSet::new();
        for dir in self.data_dirs().await? {
            for path in prune(&dir, PART_PREFIX, committed).await? {
                keys.extend(read_rows::<R>(&path).await?.iter().map(OutputRecord::key));
            }
        }
        Ok(keys)
    }

    async fn write_batch(&self, batch_id: u64, rows: &[R]) -> Result<(), SinkError> {
        let mut groups: BTreeMap<Option<Partition>, Vec<u8>> = BTreeMap::new();
        for row in rows {
            let buffer = groups.entry(row.partition()).or_default();
            serde_json::to_writer(&mut *buffer, row)
                .map_err(|e| SinkError::Serialization(e.to_string()))?;
            buffer.push(b'\n');
        }

        let name = data_file_name(PART_PREFIX, batch_id);
        for (partition, contents) in groups {
            let dir = self.dir_for(partition.as_ref());
            write_atomic(&dir, &name, &contents).await?;
        }
        Ok(())
    }
}

/// Line of the raw archive: one log record with its position.
#[derive(Debug, Serialize, Deserialize)]
struct ArchivedRecord {
    partition: i32,
    offset: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    payload: ArchivedPayload,
}

/// Payload bytes, kept as a JSON string when they are UTF-8.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ArchivedPayload {
    Text(String),
    Bytes(Vec<u8>),
}

impl From<&LogRecord> for ArchivedRecord {
    fn from(record: &LogRecord) -> Self {
        let payload = match std::str::from_utf8(&record.payload) {
            Ok(text) => ArchivedPayload::Text(text.to_string()),
            Err(_) => ArchivedPayload::Bytes(record.payload.clone()),
        };
        Self {
            partition: record.partition,
            offset: record.offset,
            key: record.key.clone(),
            payload,
        }
    }
}

impl From<ArchivedRecord> for LogRecord {
    fn from(archived: ArchivedRecord) -> Self {
        Self {
            partition: archived.partition,
            offset: archived.offset,
            key: archived.key,
            payload: match archived.payload {
                ArchivedPayload::Text(text) => text.into_bytes(),
                ArchivedPayload::Bytes(bytes) => bytes,
            },
        }
    }
}

/// JSON-lines raw archive, one file per micro-batch.
///
/// Each line is a JSON object carrying the partition, offset, key, and
/// payload of one log record, so payloads containing newlines or invalid
/// UTF-8 come back byte for byte.
#[derive(Debug, Clone)]
pub struct FileArchiveStore {
    dir: PathBuf,
}

impl FileArchiveStore {
    /// Create an archive in `dir` (created on first write).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Archive directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read every archived record in batch order (replay and inspection).
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if a batch file cannot be read or decoded.
    pub async fn read_all(&self) -> Result<Vec<LogRecord>, SinkError> {
        let mut records = Vec::new();
        for (path, name) in list_files(&self.dir).await? {
            if batch_of(BATCH_PREFIX, &name).is_some() {
                let archived = read_rows::<ArchivedRecord>(&path).await?;
                records.extend(archived.into_iter().map(LogRecord::from));
            }
        }
        Ok(records)
    }
}

impl ArchiveStore for FileArchiveStore {
    async fn recover(&self, committed: Option<u64>) -> Result<(), SinkError> {
        prune(&self.dir, BATCH_PREFIX, committed).await?;
        Ok(())
    }

    async fn write_batch(&self, batch_id: u64, records: &[LogRecord]) -> Result<(), SinkError> {
        let mut contents = Vec::new();
        for record in records {
            serde_json::to_writer(&mut contents, &ArchivedRecord::from(record))
                .map_err(|e| SinkError::Serialization(e.to_string()))?;
            contents.push(b'\n');
        }
        write_atomic(&self.dir, &data_file_name(BATCH_PREFIX, batch_id), &contents).await?;
        Ok(())
    }
}

/// One JSON checkpoint file per component.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Store checkpoints under `dir` (created on first save).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_name(component: &str) -> String {
        format!("{component}.json")
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(
        &self,
        component: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>, CheckpointError>> + Send + '_>>
    {
        let component = component.to_string();
        Box::pin(async move {
            let path = self.dir.join(Self::file_name(&component));
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => {
                    return Err(CheckpointError::Storage(format!(
                        "Failed to read {}: {e}",
                        path.display()
                    )));
                }
            };

            let checkpoint: Checkpoint =
                serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Corrupted {
                    component: component.clone(),
                    reason: e.to_string(),
                })?;
            checkpoint.verify(&component).map(Some)
        })
    }

    fn save(
        &self,
        checkpoint: &Checkpoint,
    ) -> Pin<Box<dyn Future<Output = Result<(), CheckpointError>> + Send + '_>> {
        let checkpoint = checkpoint.clone();
        Box::pin(async move {
            let contents = serde_json::to_vec_pretty(&checkpoint)
                .map_err(|e| CheckpointError::Storage(format!("Failed to encode checkpoint: {e}")))?;
            write_atomic(&self.dir, &Self::file_name(&checkpoint.component), &contents)
                .await
                .map_err(|e| CheckpointError::Storage(format!("Failed to save checkpoint: {e}")))?;

            tracing::trace!(
                component = %checkpoint.component,
                batch_id = checkpoint.batch_id,
                "Checkpoint saved"
            );
            Ok(())
        })
    }
}
