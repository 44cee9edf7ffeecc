//! Append-only log of raw activity transfers.
//!
//! Each record is framed as a little-endian `u32` length followed by the
//! CBOR-encoded [`ActivityRecord`].

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Size of the length prefix in front of every record.
pub const RECORD_HEADER_LEN: usize = 4;

/// One successfully fetched transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Device the data came from.
    pub device_id: String,
    /// Device-reported start of the streamed range.
    pub range_start: DateTime<Utc>,
    /// Reassembled payload, sequence bytes removed.
    pub data: Vec<u8>,
}

/// A raw activity log over any [`StorageBackend`].
#[derive(Debug)]
pub struct ActivityLog<B: StorageBackend> {
    backend: Mutex<B>,
}

impl<B: StorageBackend> ActivityLog<B> {
    /// Wraps a backend. Existing records are kept.
    pub fn new(backend: B) -> Self {
        Self {
            backend: Mutex::new(backend),
        }
    }

    /// Appends a record and syncs it. Returns the record's offset.
    pub fn append(&self, record: &ActivityRecord) -> StorageResult<u64> {
        let mut payload = Vec::new();
        ciborium::into_writer(record, &mut payload)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;
        let len = u32::try_from(payload.len())
            .map_err(|_| StorageError::Encoding(format!("record too large: {}", payload.len())))?;

        let mut frame = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);

        let mut backend = self.backend.lock();
        let offset = backend.append(&frame)?;
        backend.sync()?;
        debug!(
            device_id = %record.device_id,
            offset,
            bytes = record.data.len(),
            "appended activity record"
        );
        Ok(offset)
    }

    /// Reads every record in append order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] if a frame is truncated or does not decode.
    pub fn records(&self) -> StorageResult<Vec<ActivityRecord>> {
        let backend = self.backend.lock();
        let size = backend.size()?;
        let mut offset = 0u64;
        let mut records = Vec::new();

        while offset < size {
            if size - offset < RECORD_HEADER_LEN as u64 {
                return Err(StorageError::Corrupted(format!(
                    "truncated record header at offset {offset}"
                )));
            }
            let header = backend.read_at(offset, RECORD_HEADER_LEN)?;
            let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let body_offset = offset + RECORD_HEADER_LEN as u64;

            if size - body_offset < len as u64 {
                return Err(StorageError::Corrupted(format!(
                    "truncated record at offset {offset}: need {len} bytes"
                )));
            }
            let body = backend.read_at(body_offset, len)?;
            let record: ActivityRecord = ciborium::from_reader(body.as_slice()).map_err(|e| {
                StorageError::Corrupted(format!("record at offset {offset}: {e}"))
            })?;

            records.push(record);
            offset = body_offset + len as u64;
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use chrono::TimeZone;

    fn record(device: &str, data: &[u8]) -> ActivityRecord {
        ActivityRecord {
            device_id: device.into(),
            range_start: Utc.with_ymd_and_hms(2018, 7, 1, 0, 0, 0).unwrap(),
            data: data.to_vec(),
        }
    }

    #[test]
    fn appends_and_reads_back_in_order() {
        let log = ActivityLog::new(InMemoryBackend::new());
        assert_eq!(log.append(&record("a", &[1, 2, 3])).unwrap(), 0);
        let second = log.append(&record("b", &[])).unwrap();
        assert!(second > 0);

        let records = log.records().unwrap();
        assert_eq!(records, vec![record("a", &[1, 2, 3]), record("b", &[])]);
    }

    #[test]
    fn empty_log_has_no_records() {
        let log = ActivityLog::new(InMemoryBackend::new());
        assert!(log.records().unwrap().is_empty());
    }

    #[test]
    fn truncated_frame_is_corruption() {
        let log = ActivityLog::new(InMemoryBackend::new());
        log.append(&record("a", &[9; 16])).unwrap();

        let mut bytes = log.backend.lock().data().to_vec();
        bytes.truncate(bytes.len() - 3);
        let log = ActivityLog::new(InMemoryBackend::with_data(bytes));
        assert!(matches!(log.records(), Err(StorageError::Corrupted(_))));

        let log = ActivityLog::new(InMemoryBackend::with_data(vec![1, 0]));
        assert!(matches!(log.records(), Err(StorageError::Corrupted(_))));
    }
}
