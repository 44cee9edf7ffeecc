//! Collaborators the engine reports to: the activity sink, the progress
//! reporter and the busy marker, plus in-memory implementations.

use crate::error::{SyncError, SyncResult};
use bandsync_storage::{ActivityLog, ActivityRecord, StorageBackend};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Receives the reassembled data of every successful fetch.
pub trait ActivitySink: Send + Sync {
    /// Stores one transfer. Called exactly once per successful session,
    /// before the checkpoint is written.
    fn commit(&self, device_id: &str, data: &[u8], range_start: DateTime<Utc>) -> SyncResult<()>;
}

/// Receives progress events.
pub trait ProgressReporter: Send + Sync {
    /// Reports progress in percent. `ongoing` is false for the final event.
    fn report(&self, device_id: &str, percent: u8, message: &str, ongoing: bool);
}

/// Tracks which devices are busy with a fetch.
pub trait BusyMarker: Send + Sync {
    /// Marks the device busy.
    fn mark_busy(&self, device_id: &str, reason: &str);

    /// Clears the busy marker.
    fn clear_busy(&self, device_id: &str);
}

impl<B: StorageBackend> ActivitySink for ActivityLog<B> {
    fn commit(&self, device_id: &str, data: &[u8], range_start: DateTime<Utc>) -> SyncResult<()> {
        let record = ActivityRecord {
            device_id: device_id.to_string(),
            range_start,
            data: data.to_vec(),
        };
        self.append(&record)
            .map(|_| ())
            .map_err(|e| SyncError::StorageCommitFailure(e.to_string()))
    }
}

/// A transfer captured by [`MemoryActivitySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTransfer {
    /// Source device.
    pub device_id: String,
    /// Reassembled bytes.
    pub data: Vec<u8>,
    /// Device-reported range start.
    pub range_start: DateTime<Utc>,
}

/// An in-memory activity sink for testing.
#[derive(Debug, Default)]
pub struct MemoryActivitySink {
    commits: RwLock<Vec<CommittedTransfer>>,
    reject: AtomicBool,
}

impl MemoryActivitySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent commits fail.
    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// All committed transfers.
    pub fn commits(&self) -> Vec<CommittedTransfer> {
        self.commits.read().clone()
    }
}

impl ActivitySink for MemoryActivitySink {
    fn commit(&self, device_id: &str, data: &[u8], range_start: DateTime<Utc>) -> SyncResult<()> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(SyncError::StorageCommitFailure(
                "activity sink rejected transfer".into(),
            ));
        }
        self.commits.write().push(CommittedTransfer {
            device_id: device_id.to_string(),
            data: data.to_vec(),
            range_start,
        });
        Ok(())
    }
}

/// Logs progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressReporter;

impl ProgressReporter for TracingProgressReporter {
    fn report(&self, device_id: &str, percent: u8, message: &str, ongoing: bool) {
        info!(device_id, percent, ongoing, "{message}");
    }
}

/// A progress event captured by [`RecordingProgressReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Device the event is about.
    pub device_id: String,
    /// Percent complete.
    pub percent: u8,
    /// Status text.
    pub message: String,
    /// False for the last event of a session.
    pub ongoing: bool,
}

/// Records progress events for tests.
#[derive(Debug, Default)]
pub struct RecordingProgressReporter {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgressReporter {
    /// Creates an empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// All events so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// The most recent event.
    pub fn last(&self) -> Option<ProgressEvent> {
        self.events.lock().last().cloned()
    }
}

impl ProgressReporter for RecordingProgressReporter {
    fn report(&self, device_id: &str, percent: u8, message: &str, ongoing: bool) {
        self.events.lock().push(ProgressEvent {
            device_id: device_id.to_string(),
            percent,
            message: message.to_string(),
            ongoing,
        });
    }
}

/// Busy markers kept in memory.
#[derive(Debug, Default)]
pub struct BusyRegistry {
    busy: RwLock<HashMap<String, String>>,
}

impl BusyRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the device is marked busy.
    pub fn is_busy(&self, device_id: &str) -> bool {
        self.busy.read().contains_key(device_id)
    }

    /// The reason given when the device was marked busy.
    pub fn reason(&self, device_id: &str) -> Option<String> {
        self.busy.read().get(device_id).cloned()
    }
}

impl BusyMarker for BusyRegistry {
    fn mark_busy(&self, device_id: &str, reason: &str) {
        self.busy
            .write()
            .insert(device_id.to_string(), reason.to_string());
    }

    fn clear_busy(&self, device_id: &str) {
        self.busy.write().remove(device_id);
    }
}
