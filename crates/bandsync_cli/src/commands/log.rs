//! Log command implementation.

use super::activity_log_path;
use bandsync_storage::{ActivityLog, FileBackend};
use serde::Serialize;
use std::path::Path;

/// An activity record summary for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Position in the log, starting at 0.
    pub index: usize,
    /// Source device.
    pub device_id: String,
    /// Device-reported range start, RFC 3339.
    pub range_start: String,
    /// Payload size in bytes.
    pub size: usize,
    /// Leading payload bytes, hex-encoded.
    pub preview: String,
}

const PREVIEW_BYTES: usize = 16;

/// Runs the log command.
pub fn run(
    dir: &Path,
    device: Option<&str>,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = activity_log_path(dir);
    if !path.exists() {
        return Err(format!("No activity log at {}", path.display()).into());
    }

    let log = ActivityLog::new(FileBackend::open(&path)?);
    let records: Vec<RecordInfo> = log
        .records()?
        .into_iter()
        .enumerate()
        .filter(|(_, r)| device.map_or(true, |d| d == r.device_id))
        .take(limit.unwrap_or(usize::MAX))
        .map(|(index, r)| RecordInfo {
            index,
            range_start: r.range_start.to_rfc3339(),
            size: r.data.len(),
            preview: hex::encode(&r.data[..r.data.len().min(PREVIEW_BYTES)]),
            device_id: r.device_id,
        })
        .collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            println!("Activity log: {}", path.display());
            println!("{} record(s)", records.len());
            for r in &records {
                println!(
                    "[{}] {} since {}: {} bytes {}",
                    r.index, r.device_id, r.range_start, r.size, r.preview
                );
            }
        }
    }

    Ok(())
}
