//! Per-device sync checkpoints.
//!
//! A checkpoint is the instant up to which a device's data has been synced
//! successfully. The next fetch asks the device for data from there on.

use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// How far back the first fetch of a device reaches.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 100;

/// [`DEFAULT_LOOKBACK_DAYS`] as a duration.
pub fn default_lookback() -> Duration {
    Duration::days(DEFAULT_LOOKBACK_DAYS)
}

/// Durable mapping from device id to last successful sync timestamp.
///
/// # Invariants
///
/// - after `set(d, t)` returns `Ok`, `load(d) == Some(t)`, also after reopening
/// - a failed `set` leaves the previous value visible
pub trait CheckpointStore: Send + Sync {
    /// Returns the stored checkpoint, if any.
    fn load(&self, device_id: &str) -> Option<DateTime<Utc>>;

    /// Overwrites the checkpoint. Durable before returning.
    fn set(&self, device_id: &str, timestamp: DateTime<Utc>) -> StorageResult<()>;

    /// Removes the checkpoint. Returns true if one existed.
    fn clear(&self, device_id: &str) -> StorageResult<bool>;

    /// Returns all stored checkpoints, ordered by device id.
    fn entries(&self) -> Vec<(String, DateTime<Utc>)>;

    /// Returns the stored checkpoint, or `now - lookback` if there is none.
    fn get_or_lookback(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
        lookback: Duration,
    ) -> DateTime<Utc> {
        self.load(device_id).unwrap_or(now - lookback)
    }

    /// Returns the stored checkpoint, or 100 days before now.
    fn get(&self, device_id: &str) -> DateTime<Utc> {
        self.get_or_lookback(device_id, Utc::now(), default_lookback())
    }
}

/// A checkpoint store kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    entries: RwLock<BTreeMap<String, DateTime<Utc>>>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self, device_id: &str) -> Option<DateTime<Utc>> {
        self.entries.read().get(device_id).copied()
    }

    fn set(&self, device_id: &str, timestamp: DateTime<Utc>) -> StorageResult<()> {
        self.entries.write().insert(device_id.to_string(), timestamp);
        Ok(())
    }

    fn clear(&self, device_id: &str) -> StorageResult<bool> {
        Ok(self.entries.write().remove(device_id).is_some())
    }

    fn entries(&self) -> Vec<(String, DateTime<Utc>)> {
        self.entries
            .read()
            .iter()
            .map(|(device, ts)| (device.clone(), *ts))
            .collect()
    }
}

const CHECKPOINT_FILE_VERSION: u32 = 2;

/// Version 1 files stored whole milliseconds.
const MILLIS_FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    version: u32,
    entries: BTreeMap<String, StoredCheckpoint>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredCheckpoint {
    /// RFC 3339 with nanoseconds.
    Exact(DateTime<Utc>),
    Millis(i64),
}

/// A checkpoint store persisted as one CBOR file.
///
/// Every mutation writes the complete map to a sibling temp file, syncs it and
/// renames it over the previous file, so readers see either the old or the
/// new contents. The in-memory copy is only updated after the rename succeeds.
#[derive(Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, DateTime<Utc>>>,
}

impl FileCheckpointStore {
    /// Opens the store at `path`, creating parent directories. A missing file
    /// is an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let entries = if path.exists() {
            Self::read_file(path)?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), count = entries.len(), "opened checkpoint store");

        Ok(Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
        })
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(path: &Path) -> StorageResult<BTreeMap<String, DateTime<Utc>>> {
        let reader = BufReader::new(File::open(path)?);
        let file: CheckpointFile = ciborium::from_reader(reader)
            .map_err(|e| StorageError::Corrupted(format!("checkpoint file: {e}")))?;

        if file.version != CHECKPOINT_FILE_VERSION && file.version != MILLIS_FILE_VERSION {
            return Err(StorageError::Corrupted(format!(
                "unsupported checkpoint file version {}",
                file.version
            )));
        }

        file.entries
            .into_iter()
            .map(|(device, stored)| match stored {
                StoredCheckpoint::Exact(ts) => Ok((device, ts)),
                StoredCheckpoint::Millis(millis) => DateTime::from_timestamp_millis(millis)
                    .map(|ts| (device.clone(), ts))
                    .ok_or_else(|| {
                        StorageError::Corrupted(format!(
                            "checkpoint for {device} out of range: {millis}"
                        ))
                    }),
            })
            .collect()
    }

    fn persist(&self, entries: &BTreeMap<String, DateTime<Utc>>) -> StorageResult<()> {
        let file = CheckpointFile {
            version: CHECKPOINT_FILE_VERSION,
            entries: entries
                .iter()
                .map(|(device, ts)| (device.clone(), StoredCheckpoint::Exact(*ts)))
                .collect(),
        };

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            ciborium::into_writer(&file, &mut writer)
                .map_err(|e| StorageError::Encoding(e.to_string()))?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn update<F>(&self, mutate: F) -> StorageResult<bool>
    where
        F: FnOnce(&mut BTreeMap<String, DateTime<Utc>>) -> bool,
    {
        let mut entries = self.entries.write();
        let mut next = entries.clone();
        if !mutate(&mut next) {
            return Ok(false);
        }
        self.persist(&next)?;
        *entries = next;
        Ok(true)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, device_id: &str) -> Option<DateTime<Utc>> {
        self.entries.read().get(device_id).copied()
    }

    fn set(&self, device_id: &str, timestamp: DateTime<Utc>) -> StorageResult<()> {
        self.update(|entries| {
            entries.insert(device_id.to_string(), timestamp);
            true
        })?;
        Ok(())
    }

    fn clear(&self, device_id: &str) -> StorageResult<bool> {
        self.update(|entries| entries.remove(device_id).is_some())
    }

    fn entries(&self) -> Vec<(String, DateTime<Utc>)> {
        self.entries
            .read()
            .iter()
            .map(|(device, ts)| (device.clone(), *ts))
            .collect()
    }
}
