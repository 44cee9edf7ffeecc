//! Replay command implementation.
//!
//! Feeds a recorded trace through a real [`FetchEngine`] backed by a
//! recording transport. Trace lines look like:
//!
//! ```text
//! # comment
//! C 100101260000 00e8070a0f0c000004
//! D 00 0a0b0c0d
//! ```
//!
//! `C` lines are control-channel messages, `D` lines data-channel chunks.
//! Whitespace inside the hex is ignored.

use super::{activity_log_path, checkpoint_path};
use bandsync_engine::{
    ActivitySink, FetchConfig, FetchEngine, FetchOutcome, MemoryActivitySink, MockTransport,
    SequencePolicy,
};
use bandsync_protocol::{
    default_registry, DeviceCandidate, DeviceFamily, DeviceProfile, TimestampCodec,
};
use bandsync_storage::{
    ActivityLog, CheckpointStore, FileBackend, FileCheckpointStore, InMemoryCheckpointStore,
};
use chrono::Utc;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors reading a trace file.
#[derive(Error, Debug)]
pub enum TraceError {
    /// Line does not start with `C` or `D`.
    #[error("line {line}: expected `C <hex>` or `D <hex>`")]
    Syntax {
        /// 1-based line number.
        line: usize,
    },

    /// Payload is not valid hex.
    #[error("line {line}: {source}")]
    Hex {
        /// 1-based line number.
        line: usize,
        /// Decoder error.
        source: hex::FromHexError,
    },
}

/// One recorded channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEntry {
    /// Control-channel message.
    Control(Vec<u8>),
    /// Data-channel chunk.
    Data(Vec<u8>),
}

/// How to resolve and configure the replayed device.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Device identifier.
    pub device: String,
    /// Advertised name.
    pub name: Option<String>,
    /// Explicit family.
    pub family: Option<String>,
    /// Strict packet counter checking.
    pub strict: bool,
    /// UTC device timestamps.
    pub utc: bool,
}

/// Replay result for output.
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    /// Device identifier.
    pub device_id: String,
    /// Device family.
    pub family: String,
    /// Trace entries fed to the engine.
    pub entries: usize,
    /// `succeeded`, `failed` or `incomplete`.
    pub result: String,
    /// Payload bytes committed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    /// New checkpoint, RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    /// Sequence gaps tolerated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_gaps: Option<u64>,
    /// Whether another fetch should follow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<bool>,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Commands the engine wrote, hex-encoded.
    pub commands: Vec<String>,
}

/// Parses trace text into entries.
pub fn parse_trace(text: &str) -> Result<Vec<TraceEntry>, TraceError> {
    let mut entries = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut chars = line.chars();
        let kind = chars.next();
        let digits: String = chars.filter(|c| !c.is_whitespace()).collect();
        let decode = |digits: &str| {
            hex::decode(digits).map_err(|source| TraceError::Hex { line: i + 1, source })
        };
        match kind {
            Some('C' | 'c') => entries.push(TraceEntry::Control(decode(&digits)?)),
            Some('D' | 'd') => entries.push(TraceEntry::Data(decode(&digits)?)),
            _ => return Err(TraceError::Syntax { line: i + 1 }),
        }
    }
    Ok(entries)
}

/// Runs the replay command.
pub fn run(
    data_dir: Option<&Path>,
    trace: &Path,
    options: &ReplayOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries = parse_trace(&std::fs::read_to_string(trace)?)?;
    let profile = resolve_profile(options)?;
    let config = FetchConfig::default().with_sequence_policy(if options.strict {
        SequencePolicy::Strict
    } else {
        SequencePolicy::BestEffort
    });

    let report = match data_dir {
        Some(dir) => {
            let checkpoints = FileCheckpointStore::open(&checkpoint_path(dir))?;
            let log =
                ActivityLog::new(FileBackend::open_with_create_dirs(&activity_log_path(dir))?);
            replay(config, checkpoints, log, &profile, &options.device, &entries)?
        }
        None => replay(
            config,
            InMemoryCheckpointStore::new(),
            MemoryActivitySink::new(),
            &profile,
            &options.device,
            &entries,
        )?,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => print_text_output(&report),
    }

    Ok(())
}

fn resolve_profile(options: &ReplayOptions) -> Result<DeviceProfile, Box<dyn std::error::Error>> {
    let profile = match (&options.family, &options.name) {
        (Some(family), _) => DeviceProfile::for_family(family.parse::<DeviceFamily>()?),
        (None, Some(name)) => default_registry()
            .resolve(&DeviceCandidate::new(name.clone(), options.device.clone()))
            .cloned()
            .ok_or_else(|| format!("no device profile matches {name:?}"))?,
        (None, None) => return Err("either --name or --family is required".into()),
    };

    Ok(if options.utc {
        profile.with_timestamp_codec(TimestampCodec::HuamiUtc)
    } else {
        profile
    })
}

fn replay<K, S>(
    config: FetchConfig,
    checkpoints: K,
    sink: S,
    profile: &DeviceProfile,
    device_id: &str,
    entries: &[TraceEntry],
) -> Result<ReplayReport, Box<dyn std::error::Error>>
where
    K: CheckpointStore,
    S: ActivitySink,
{
    let engine = FetchEngine::new(
        config,
        Arc::new(MockTransport::new()),
        Arc::new(checkpoints),
        Arc::new(sink),
    );

    let state = engine.start_fetch(device_id, profile)?;
    info!(device_id, %state, entries = entries.len(), "replaying trace");

    let mut outcome = engine.last_outcome(device_id).filter(|_| state.is_terminal());
    let mut fed = 0;
    for entry in entries {
        if outcome.is_some() {
            break;
        }
        fed += 1;
        outcome = match entry {
            TraceEntry::Control(bytes) => engine.handle_control_message(device_id, bytes),
            TraceEntry::Data(bytes) => engine.handle_data_chunk(device_id, bytes),
        };
    }

    let commands = engine
        .transport()
        .commands(device_id)
        .iter()
        .map(hex::encode)
        .collect();
    Ok(build_report(device_id, profile, fed, outcome.as_ref(), commands))
}

fn build_report(
    device_id: &str,
    profile: &DeviceProfile,
    entries: usize,
    outcome: Option<&FetchOutcome>,
    commands: Vec<String>,
) -> ReplayReport {
    let mut report = ReplayReport {
        device_id: device_id.to_string(),
        family: profile.family.to_string(),
        entries,
        result: "incomplete".to_string(),
        bytes: None,
        checkpoint: None,
        sequence_gaps: None,
        follow_up: None,
        error: None,
        commands,
    };

    match outcome.map(|o| &o.result) {
        Some(Ok(summary)) => {
            report.result = "succeeded".to_string();
            report.bytes = Some(summary.bytes_received);
            report.checkpoint = Some(summary.checkpoint.to_rfc3339());
            report.sequence_gaps = Some(summary.sequence_gaps);
            report.follow_up = Some(summary.needs_follow_up(Utc::now()));
        }
        Some(Err(failure)) => {
            report.result = "failed".to_string();
            report.error = Some(failure.to_string());
        }
        None => {}
    }
    report
}

fn print_text_output(report: &ReplayReport) {
    println!("Device:   {} ({})", report.device_id, report.family);
    println!("Entries:  {}", report.entries);
    println!("Result:   {}", report.result);
    if let Some(bytes) = report.bytes {
        println!("Bytes:    {bytes}");
    }
    if let Some(checkpoint) = &report.checkpoint {
        println!("Checkpoint: {checkpoint}");
    }
    if let Some(gaps) = report.sequence_gaps.filter(|g| *g > 0) {
        println!("Sequence gaps: {gaps}");
    }
    if report.follow_up == Some(true) {
        println!("More data is waiting on the device; fetch again.");
    }
    if let Some(error) = &report.error {
        println!("Error:    {error}");
    }
    for command in &report.commands {
        println!("  -> {command}");
    }
}
