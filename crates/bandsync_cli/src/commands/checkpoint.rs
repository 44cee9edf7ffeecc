//! Checkpoint command implementation.

use super::checkpoint_path;
use bandsync_storage::{CheckpointStore, FileCheckpointStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// A checkpoint for output.
#[derive(Debug, Serialize)]
pub struct CheckpointInfo {
    /// Device identifier.
    pub device_id: String,
    /// Last synced instant, RFC 3339.
    pub checkpoint: String,
}

/// Shows all checkpoints, or one device's.
pub fn show(
    dir: &Path,
    device: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileCheckpointStore::open(&checkpoint_path(dir))?;
    let entries: Vec<CheckpointInfo> = store
        .entries()
        .into_iter()
        .filter(|(id, _)| device.map_or(true, |d| d == id.as_str()))
        .map(|(device_id, ts)| CheckpointInfo {
            device_id,
            checkpoint: ts.to_rfc3339(),
        })
        .collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            if entries.is_empty() {
                match device {
                    Some(d) => {
                        println!("No checkpoint for {d}; next fetch uses the lookback window")
                    }
                    None => println!("No checkpoints"),
                }
            }
            for entry in &entries {
                println!("{:<24} {}", entry.device_id, entry.checkpoint);
            }
        }
    }

    Ok(())
}

/// Sets a device checkpoint from an RFC 3339 timestamp.
pub fn set(dir: &Path, device: &str, timestamp: &str) -> Result<(), Box<dyn std::error::Error>> {
    let ts = parse_timestamp(timestamp)?;
    let store = FileCheckpointStore::open(&checkpoint_path(dir))?;
    store.set(device, ts)?;
    println!("{device} checkpoint set to {}", ts.to_rfc3339());
    Ok(())
}

/// Removes a device checkpoint.
pub fn clear(dir: &Path, device: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileCheckpointStore::open(&checkpoint_path(dir))?;
    if store.clear(device)? {
        println!("{device} checkpoint cleared");
    } else {
        println!("{device} had no checkpoint");
    }
    Ok(())
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, Box<dyn std::error::Error>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp {value:?}: {e}").into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn test_set_and_clear() {
        let dir = tempdir().unwrap();
        set(dir.path(), "dev", "2024-05-01T08:00:00+02:00").unwrap();

        let store = FileCheckpointStore::open(&checkpoint_path(dir.path())).unwrap();
        assert_eq!(
            store.load("dev"),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap())
        );

        clear(dir.path(), "dev").unwrap();
        let store = FileCheckpointStore::open(&checkpoint_path(dir.path())).unwrap();
        assert!(store.load("dev").is_none());
    }

    #[test]
    fn test_set_keeps_subsecond_precision() {
        let dir = tempdir().unwrap();
        set(dir.path(), "dev", "2024-01-01T00:00:00.123456Z").unwrap();

        let store = FileCheckpointStore::open(&checkpoint_path(dir.path())).unwrap();
        assert_eq!(
            store.load("dev").unwrap().to_rfc3339(),
            "2024-01-01T00:00:00.123456+00:00"
        );
    }

    #[test]
    fn test_invalid_timestamp() {
        let dir = tempdir().unwrap();
        assert!(set(dir.path(), "dev", "yesterday").is_err());
    }
}
