//! Fetch session state machine.
//!
//! ```text
//! ┌──────┐ start  ┌──────────────────┐ StartAck ok ┌───────────┐ Finish ok ┌───────────┐ commit ok ┌───────────┐
//! │ Idle │───────►│ AwaitingMetadata │────────────►│ Streaming │──────────►│ Finishing │──────────►│ Succeeded │
//! └──────┘        └──────────────────┘             └───────────┘           └───────────┘           └───────────┘
//!                          │ any failure / abort          │                      │
//!                          ▼                              ▼                      ▼
//!                   ┌────────────────────────────────────────────────────────────────┐
//!                   │                              Failed                            │
//!                   └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The session performs no I/O. Every transition returns the
//! [`SessionAction`]s the caller must carry out; results that feed back into
//! the machine (the commit) come in through [`FetchSession::commit_succeeded`]
//! and [`FetchSession::commit_failed`].

use crate::config::{FetchConfig, SequencePolicy};
use crate::error::{Failure, FailureKind, SyncError, SyncResult};
use crate::reassembler::{ChunkReassembler, SequenceCheck};
use crate::transport::Channel;
use bandsync_protocol::{ControlMessage, DataChunk, DeviceFamily, DeviceProfile, FetchCommand, Status};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound on buffer pre-allocation, whatever the device announces.
const MAX_PREALLOCATION: usize = 1 << 20;

/// Follow-up fetches a caller should issue at most in one sync.
pub const MAX_FOLLOW_UP_ROUNDS: u32 = 5;

/// Lifecycle of a fetch session, in the order it advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FetchState {
    /// Created, not started.
    Idle,
    /// Fetch command sent, waiting for `StartAck`.
    AwaitingMetadata,
    /// Receiving data chunks.
    Streaming,
    /// Device reported completion; commit in progress.
    Finishing,
    /// Data and checkpoint committed.
    Succeeded,
    /// Ended without committing.
    Failed,
}

impl FetchState {
    /// Returns true for `Succeeded` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchState::Succeeded | FetchState::Failed)
    }

    /// Returns true while the session holds channels and the busy marker.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            FetchState::AwaitingMetadata | FetchState::Streaming | FetchState::Finishing
        )
    }
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FetchState::Idle => "idle",
            FetchState::AwaitingMetadata => "awaiting metadata",
            FetchState::Streaming => "streaming",
            FetchState::Finishing => "finishing",
            FetchState::Succeeded => "succeeded",
            FetchState::Failed => "failed",
        })
    }
}

/// Side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Enable or disable notifications on a channel.
    Subscribe {
        /// Which channel.
        channel: Channel,
        /// Its identifier in the device profile.
        id: Uuid,
        /// Requested state.
        enabled: bool,
    },
    /// Write a command.
    SendCommand {
        /// Channel to write to.
        channel: Uuid,
        /// Encoded command.
        bytes: Vec<u8>,
    },
    /// Mark the device busy.
    MarkBusy {
        /// Shown to the user.
        reason: String,
    },
    /// Clear the busy marker.
    ClearBusy,
    /// Report progress.
    Progress {
        /// Percent complete.
        percent: u8,
        /// Status text.
        message: String,
        /// False for the final event.
        ongoing: bool,
    },
    /// Commit the transfer: data to the sink first, then the checkpoint.
    Commit(CommitRequest),
}

/// Data and checkpoint to commit when a transfer completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    /// Reassembled payload.
    pub data: Bytes,
    /// Device-reported range start.
    pub range_start: DateTime<Utc>,
    /// New checkpoint for the device.
    pub checkpoint: DateTime<Utc>,
}

/// Figures from a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSummary {
    /// Device-reported range start.
    pub range_start: DateTime<Utc>,
    /// The committed checkpoint.
    pub checkpoint: DateTime<Utc>,
    /// Byte count announced in `StartAck`.
    pub expected_byte_count: u32,
    /// Payload bytes received.
    pub bytes_received: u64,
    /// Data chunks received.
    pub chunk_count: u64,
    /// Sequence gaps tolerated.
    pub sequence_gaps: u64,
    /// Time covered by one sample, for sample-based streams.
    pub sample_interval: Option<Duration>,
}

impl FetchSummary {
    /// Whether another fetch should follow to catch up to `now`.
    ///
    /// True when the stream is sample based and the new checkpoint lies on an
    /// earlier day than `now` without being in the future.
    pub fn needs_follow_up(&self, now: DateTime<Utc>) -> bool {
        self.sample_interval.is_some()
            && self.checkpoint <= now
            && self.checkpoint.date_naive() < now.date_naive()
    }
}

/// Terminal result of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Device the session ran against.
    pub device_id: String,
    /// Device family.
    pub family: DeviceFamily,
    /// Summary on success, failure otherwise.
    pub result: Result<FetchSummary, Failure>,
}

impl FetchOutcome {
    /// Returns true on success.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// The terminal state this outcome corresponds to.
    pub fn state(&self) -> FetchState {
        if self.is_success() {
            FetchState::Succeeded
        } else {
            FetchState::Failed
        }
    }

    /// The summary, on success.
    pub fn summary(&self) -> Option<&FetchSummary> {
        self.result.as_ref().ok()
    }

    /// The failure, on failure.
    pub fn failure(&self) -> Option<&Failure> {
        self.result.as_ref().err()
    }
}

/// One fetch attempt against one device. Not reusable.
#[derive(Debug)]
pub struct FetchSession {
    device_id: String,
    profile: DeviceProfile,
    config: FetchConfig,
    state: FetchState,
    since: Option<DateTime<Utc>>,
    expected_byte_count: u32,
    range_start: Option<DateTime<Utc>>,
    checkpoint: Option<DateTime<Utc>>,
    reassembler: ChunkReassembler,
    last_progress: u8,
    failure: Option<Failure>,
}

impl FetchSession {
    /// Creates an idle session.
    pub fn new(device_id: impl Into<String>, profile: DeviceProfile, config: FetchConfig) -> Self {
        Self {
            device_id: device_id.into(),
            profile,
            config,
            state: FetchState::Idle,
            since: None,
            expected_byte_count: 0,
            range_start: None,
            checkpoint: None,
            reassembler: ChunkReassembler::new(),
            last_progress: 0,
            failure: None,
        }
    }

    /// Target device.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Profile in use.
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Current state.
    pub fn state(&self) -> FetchState {
        self.state
    }

    /// Start of the requested range, once started.
    pub fn since(&self) -> Option<DateTime<Utc>> {
        self.since
    }

    /// Announced payload size; zero until `StartAck`.
    pub fn expected_byte_count(&self) -> u32 {
        self.expected_byte_count
    }

    /// Payload bytes received so far.
    pub fn bytes_received(&self) -> u64 {
        self.reassembler.bytes_received()
    }

    /// Sequence byte of the last accepted chunk; `None` before the first.
    pub fn last_sequence_counter(&self) -> Option<u8> {
        self.reassembler.last_sequence()
    }

    /// Sequence gaps seen so far.
    pub fn sequence_gaps(&self) -> u64 {
        self.reassembler.gap_count()
    }

    /// Device-reported range start, once known.
    pub fn range_start(&self) -> Option<DateTime<Utc>> {
        self.range_start
    }

    /// Why the session failed.
    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Starts the fetch for data recorded since `since`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidStateTransition`] unless the session is idle.
    pub fn start(&mut self, since: DateTime<Utc>) -> SyncResult<Vec<SessionAction>> {
        if self.state != FetchState::Idle {
            return Err(SyncError::InvalidStateTransition {
                from: self.state.to_string(),
                to: FetchState::AwaitingMetadata.to_string(),
            });
        }

        let command = match self
            .profile
            .fetch_command(since, self.config.device_utc_offset)
        {
            Ok(command) => command,
            Err(e) => {
                return Ok(self.fail(
                    FailureKind::ProtocolViolation,
                    format!("cannot encode fetch command: {e}"),
                ))
            }
        };

        self.since = Some(since);
        self.transition(FetchState::AwaitingMetadata);
        info!(
            device_id = %self.device_id,
            family = %self.profile.family,
            %since,
            "starting activity fetch"
        );

        Ok(vec![
            self.subscribe(Channel::Data, false),
            self.subscribe(Channel::Control, true),
            SessionAction::MarkBusy {
                reason: self.config.busy_reason.clone(),
            },
            SessionAction::SendCommand {
                channel: self.profile.control_channel,
                bytes: command,
            },
        ])
    }

    /// Handles a control-channel message.
    pub fn on_control_message(&mut self, bytes: &[u8]) -> Vec<SessionAction> {
        match self.state {
            FetchState::AwaitingMetadata | FetchState::Streaming | FetchState::Finishing => {}
            FetchState::Idle | FetchState::Succeeded | FetchState::Failed => {
                debug!(device_id = %self.device_id, state = %self.state, "control message ignored");
                return Vec::new();
            }
        }

        let message = self.profile.decode_control(bytes);
        debug!(device_id = %self.device_id, kind = message.kind(), "control message");

        match (self.state, message) {
            (
                FetchState::AwaitingMetadata,
                ControlMessage::StartAck {
                    status: Status::Success,
                    expected_byte_count,
                    start_timestamp: Some(start),
                },
            ) => self.begin_streaming(expected_byte_count, start),
            (
                FetchState::AwaitingMetadata,
                ControlMessage::StartAck {
                    status: Status::Failure(code),
                    ..
                },
            ) => self.fail(
                FailureKind::ProtocolViolation,
                format!("device refused fetch start (status {code:#04x})"),
            ),
            (
                FetchState::Streaming,
                ControlMessage::Finish {
                    status: Status::Success,
                },
            ) => self.finish(),
            (
                FetchState::Streaming,
                ControlMessage::Finish {
                    status: Status::Failure(code),
                },
            ) => self.fail(
                FailureKind::ProtocolViolation,
                format!("device reported failed transfer (status {code:#04x})"),
            ),
            (
                FetchState::Finishing,
                ControlMessage::Finish {
                    status: Status::Failure(code),
                },
            ) => self.fail(
                FailureKind::ProtocolViolation,
                format!("device reported failed transfer while committing (status {code:#04x})"),
            ),
            (_, ControlMessage::Unrecognized(raw)) => {
                warn!(
                    device_id = %self.device_id,
                    bytes = %hex::encode(&raw),
                    "unexpected activity metadata"
                );
                self.fail(
                    FailureKind::ProtocolViolation,
                    format!("unrecognized control message of {} bytes", raw.len()),
                )
            }
            (FetchState::Finishing, message) => {
                warn!(
                    device_id = %self.device_id,
                    kind = message.kind(),
                    "control message while committing, ignored"
                );
                Vec::new()
            }
            (state, message) => self.fail(
                FailureKind::ProtocolViolation,
                format!("unexpected {} while {}", message.kind(), state),
            ),
        }
    }

    /// Handles a data-channel message.
    pub fn on_data_chunk(&mut self, bytes: &[u8]) -> Vec<SessionAction> {
        match self.state {
            FetchState::Streaming => {}
            FetchState::AwaitingMetadata => {
                return self.fail(
                    FailureKind::ProtocolViolation,
                    "data chunk before start acknowledgement",
                )
            }
            FetchState::Finishing => {
                warn!(device_id = %self.device_id, "data chunk after finish, ignored");
                return Vec::new();
            }
            FetchState::Idle | FetchState::Succeeded | FetchState::Failed => {
                debug!(device_id = %self.device_id, state = %self.state, "data chunk ignored");
                return Vec::new();
            }
        }

        if bytes.len() > self.profile.chunk_size {
            return self.fail(
                FailureKind::ProtocolViolation,
                format!(
                    "data chunk of {} bytes exceeds {} byte limit",
                    bytes.len(),
                    self.profile.chunk_size
                ),
            );
        }
        let chunk = match DataChunk::parse(bytes) {
            Ok(chunk) => chunk,
            Err(e) => return self.fail(FailureKind::ProtocolViolation, e.to_string()),
        };

        if let SequenceCheck::Gap { expected, actual } =
            self.reassembler.check_sequence(chunk.sequence)
        {
            match self.config.sequence_policy {
                SequencePolicy::Strict => {
                    return self.fail(
                        FailureKind::ProtocolViolation,
                        format!("invalid packet counter: expected {expected}, got {actual}"),
                    )
                }
                SequencePolicy::BestEffort => warn!(
                    device_id = %self.device_id,
                    expected,
                    actual,
                    "packet counter gap, keeping chunk"
                ),
            }
        }

        let total = self.reassembler.bytes_received() + chunk.payload.len() as u64;
        if total > u64::from(self.expected_byte_count) {
            return self.fail(
                FailureKind::ProtocolViolation,
                format!(
                    "received {total} bytes but device announced {}",
                    self.expected_byte_count
                ),
            );
        }

        self.reassembler.append(&chunk);
        debug!(
            device_id = %self.device_id,
            sequence = chunk.sequence,
            received = total,
            expected = self.expected_byte_count,
            "data chunk"
        );
        self.streaming_progress()
    }

    /// Records that data and checkpoint were committed.
    pub fn commit_succeeded(&mut self) -> Vec<SessionAction> {
        if self.state != FetchState::Finishing {
            warn!(device_id = %self.device_id, state = %self.state, "commit result without pending commit");
            return Vec::new();
        }

        self.transition(FetchState::Succeeded);
        info!(
            device_id = %self.device_id,
            bytes = self.reassembler.bytes_received(),
            "activity fetch succeeded"
        );

        let mut actions = self.release();
        actions.push(SessionAction::Progress {
            percent: 100,
            message: "Activity data fetched".to_string(),
            ongoing: false,
        });
        actions
    }

    /// Records that the commit was rejected.
    pub fn commit_failed(&mut self, message: impl Into<String>) -> Vec<SessionAction> {
        self.fail(FailureKind::StorageCommitFailure, message)
    }

    /// Aborts the session.
    pub fn abort(&mut self, reason: impl Into<String>) -> Vec<SessionAction> {
        self.fail(FailureKind::Aborted, reason)
    }

    /// Moves to `Failed`, discarding buffered data. No-op once terminal.
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) -> Vec<SessionAction> {
        if self.state.is_terminal() {
            return Vec::new();
        }

        let failure = Failure::new(kind, message);
        warn!(
            device_id = %self.device_id,
            state = %self.state,
            %failure,
            "activity fetch failed"
        );

        let started = self.state != FetchState::Idle;
        self.transition(FetchState::Failed);
        self.reassembler.discard();

        let mut actions = if started { self.release() } else { Vec::new() };
        actions.push(SessionAction::Progress {
            percent: self.last_progress,
            message: format!("Activity data fetch failed: {}", failure.message),
            ongoing: false,
        });
        self.failure = Some(failure);
        actions
    }

    /// The outcome, once terminal.
    pub fn outcome(&self) -> Option<FetchOutcome> {
        let result = match self.state {
            FetchState::Succeeded => {
                let (Some(range_start), Some(checkpoint)) = (self.range_start, self.checkpoint)
                else {
                    return None;
                };
                Ok(FetchSummary {
                    range_start,
                    checkpoint,
                    expected_byte_count: self.expected_byte_count,
                    bytes_received: self.reassembler.bytes_received(),
                    chunk_count: self.reassembler.chunk_count(),
                    sequence_gaps: self.reassembler.gap_count(),
                    sample_interval: self.profile.checkpoint_policy.sample_interval(),
                })
            }
            FetchState::Failed => Err(self.failure.clone()?),
            _ => return None,
        };

        Some(FetchOutcome {
            device_id: self.device_id.clone(),
            family: self.profile.family,
            result,
        })
    }

    fn begin_streaming(&mut self, expected: u32, start: DateTime<Utc>) -> Vec<SessionAction> {
        self.expected_byte_count = expected;
        self.range_start = Some(start);
        self.reassembler =
            ChunkReassembler::with_capacity((expected as usize).min(MAX_PREALLOCATION));
        self.transition(FetchState::Streaming);
        info!(
            device_id = %self.device_id,
            expected_bytes = expected,
            range_start = %start,
            "device accepted fetch"
        );

        let mut actions = vec![self.subscribe(Channel::Data, true)];
        if self.profile.begin_transfer {
            actions.push(SessionAction::SendCommand {
                channel: self.profile.control_channel,
                bytes: FetchCommand::begin_transfer().to_vec(),
            });
        }
        actions.push(SessionAction::Progress {
            percent: 0,
            message: format!(
                "About to transfer activity data since {}",
                start.format("%Y-%m-%d %H:%M UTC")
            ),
            ongoing: true,
        });
        actions
    }

    fn finish(&mut self) -> Vec<SessionAction> {
        let Some(range_start) = self.range_start else {
            return self.fail(FailureKind::ProtocolViolation, "finish without range start");
        };

        self.transition(FetchState::Finishing);
        let received = self.reassembler.bytes_received();
        if received != u64::from(self.expected_byte_count) {
            info!(
                device_id = %self.device_id,
                received,
                expected = self.expected_byte_count,
                "device finished with a different byte count than announced"
            );
        }

        let data = self.reassembler.finalize().unwrap_or_default();
        let checkpoint = self
            .profile
            .checkpoint_policy
            .checkpoint(range_start, received);
        self.checkpoint = Some(checkpoint);

        vec![SessionAction::Commit(CommitRequest {
            data,
            range_start,
            checkpoint,
        })]
    }

    fn streaming_progress(&mut self) -> Vec<SessionAction> {
        let expected = u64::from(self.expected_byte_count);
        if expected == 0 {
            return Vec::new();
        }

        let percent = (self.reassembler.bytes_received() * 100 / expected).min(100) as u8;
        if percent >= 100 || percent < self.last_progress.saturating_add(self.config.progress_step)
        {
            return Vec::new();
        }

        self.last_progress = percent;
        vec![SessionAction::Progress {
            percent,
            message: "Fetching activity data".to_string(),
            ongoing: true,
        }]
    }

    fn release(&self) -> Vec<SessionAction> {
        vec![
            self.subscribe(Channel::Data, false),
            self.subscribe(Channel::Control, false),
            SessionAction::ClearBusy,
        ]
    }

    fn subscribe(&self, channel: Channel, enabled: bool) -> SessionAction {
        let id = match channel {
            Channel::Control => self.profile.control_channel,
            Channel::Data => self.profile.data_channel,
        };
        SessionAction::Subscribe {
            channel,
            id,
            enabled,
        }
    }

    fn transition(&mut self, next: FetchState) {
        debug_assert!(
            next == FetchState::Failed || next > self.state,
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(device_id = %self.device_id, from = %self.state, to = %next, "fetch state");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bandsync_protocol::{CheckpointPolicy, TimestampCodec, CHARACTERISTIC_FETCH};
    use chrono::{Offset, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap()
    }

    fn profile() -> DeviceProfile {
        DeviceProfile::for_family(DeviceFamily::MiBand2)
            .with_timestamp_codec(TimestampCodec::HuamiUtc)
    }

    fn start_ack(count: u32) -> Vec<u8> {
        let mut msg = vec![0x10, 0x01, 0x01];
        msg.extend_from_slice(&count.to_le_bytes());
        msg.extend_from_slice(&TimestampCodec::HuamiUtc.encode(t0(), Utc.fix()).unwrap());
        msg
    }

    fn streaming(count: u32) -> FetchSession {
        let mut session = FetchSession::new("dev", profile(), FetchConfig::default());
        session.start(t0()).unwrap();
        session.on_control_message(&start_ack(count));
        assert_eq!(session.state(), FetchState::Streaming);
        session
    }

    fn has_release(actions: &[SessionAction]) -> bool {
        actions.contains(&SessionAction::ClearBusy)
            && actions.iter().any(|a| {
                matches!(
                    a,
                    SessionAction::Subscribe {
                        channel: Channel::Control,
                        enabled: false,
                        ..
                    }
                )
            })
    }

    #[test]
    fn test_start_actions() {
        let mut session = FetchSession::new("dev", profile(), FetchConfig::default());
        let actions = session.start(t0()).unwrap();

        assert_eq!(session.state(), FetchState::AwaitingMetadata);
        assert_eq!(actions.len(), 4);
        assert!(matches!(
            actions[1],
            SessionAction::Subscribe {
                channel: Channel::Control,
                enabled: true,
                ..
            }
        ));
        assert!(matches!(actions[2], SessionAction::MarkBusy { .. }));
        match &actions[3] {
            SessionAction::SendCommand { channel, bytes } => {
                assert_eq!(*channel, CHARACTERISTIC_FETCH);
                assert_eq!(bytes.len(), 10);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_start_twice_rejected() {
        let mut session = FetchSession::new("dev", profile(), FetchConfig::default());
        session.start(t0()).unwrap();
        assert!(matches!(
            session.start(t0()),
            Err(SyncError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_start_ack_begins_streaming() {
        let mut session = FetchSession::new("dev", profile(), FetchConfig::default());
        session.start(t0()).unwrap();
        let actions = session.on_control_message(&start_ack(40));

        assert_eq!(session.expected_byte_count(), 40);
        assert_eq!(session.range_start(), Some(t0()));
        assert!(actions.contains(&SessionAction::SendCommand {
            channel: CHARACTERISTIC_FETCH,
            bytes: vec![0x02],
        }));
        assert!(matches!(
            actions.last(),
            Some(SessionAction::Progress { percent: 0, ongoing: true, .. })
        ));
    }

    #[test]
    fn test_begin_transfer_disabled() {
        let mut session = FetchSession::new(
            "dev",
            profile().with_begin_transfer(false),
            FetchConfig::default(),
        );
        session.start(t0()).unwrap();
        let actions = session.on_control_message(&start_ack(40));
        assert!(!actions
            .iter()
            .any(|a| matches!(a, SessionAction::SendCommand { .. })));
    }

    #[test]
    fn test_refused_start_fails() {
        let mut session = FetchSession::new("dev", profile(), FetchConfig::default());
        session.start(t0()).unwrap();
        let mut refused = start_ack(40);
        refused[2] = 0x04;

        let actions = session.on_control_message(&refused);
        assert_eq!(session.state(), FetchState::Failed);
        assert!(has_release(&actions));
        assert_eq!(
            session.failure().map(|f| f.kind),
            Some(FailureKind::ProtocolViolation)
        );
    }

    #[test]
    fn test_chunk_before_metadata_fails() {
        let mut session = FetchSession::new("dev", profile(), FetchConfig::default());
        session.start(t0()).unwrap();
        session.on_data_chunk(&[0x00, 1, 2, 3, 4]);
        assert_eq!(session.state(), FetchState::Failed);
    }

    #[test]
    fn test_finish_commits_with_checkpoint() {
        let mut session = streaming(8);
        session.on_data_chunk(&[0x00, 1, 2, 3, 4]);
        session.on_data_chunk(&[0x01, 5, 6, 7, 8]);
        let actions = session.on_control_message(&[0x10, 0x02, 0x01]);

        assert_eq!(session.state(), FetchState::Finishing);
        match actions.as_slice() {
            [SessionAction::Commit(request)] => {
                assert_eq!(&request.data[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
                assert_eq!(request.range_start, t0());
                assert_eq!(request.checkpoint, t0() + Duration::minutes(2));
            }
            other => panic!("unexpected actions {other:?}"),
        }

        let actions = session.commit_succeeded();
        assert_eq!(session.state(), FetchState::Succeeded);
        assert!(has_release(&actions));
        assert!(matches!(
            actions.last(),
            Some(SessionAction::Progress { percent: 100, ongoing: false, .. })
        ));

        let outcome = session.outcome().unwrap();
        let summary = outcome.summary().unwrap();
        assert_eq!(summary.bytes_received, 8);
        assert_eq!(summary.chunk_count, 2);
    }

    #[test]
    fn test_failed_finish_status() {
        let mut session = streaming(8);
        session.on_control_message(&[0x10, 0x02, 0x05]);
        assert_eq!(session.state(), FetchState::Failed);
        assert_eq!(session.bytes_received(), 0);
    }

    #[test]
    fn test_unrecognized_control_message() {
        let mut session = streaming(8);
        session.on_control_message(&[0x10, 0x07]);
        assert_eq!(session.state(), FetchState::Failed);
    }

    #[test]
    fn test_repeated_start_ack_fails() {
        let mut session = streaming(8);
        session.on_control_message(&start_ack(8));
        assert_eq!(session.state(), FetchState::Failed);
    }

    #[test]
    fn test_strict_sequence_gap_fails() {
        let mut session = FetchSession::new(
            "dev",
            profile(),
            FetchConfig::default().with_sequence_policy(SequencePolicy::Strict),
        );
        session.start(t0()).unwrap();
        session.on_control_message(&start_ack(8));
        session.on_data_chunk(&[0x00, 1, 2, 3, 4]);
        session.on_data_chunk(&[0x02, 5, 6, 7, 8]);
        assert_eq!(session.state(), FetchState::Failed);
    }

    #[test]
    fn test_best_effort_sequence_gap_continues() {
        let mut session = streaming(8);
        session.on_data_chunk(&[0x00, 1, 2, 3, 4]);
        session.on_data_chunk(&[0x02, 5, 6, 7, 8]);
        assert_eq!(session.state(), FetchState::Streaming);
        assert_eq!(session.sequence_gaps(), 1);
        assert_eq!(session.last_sequence_counter(), Some(0x02));
    }

    #[test]
    fn test_overrun_fails() {
        let mut session = streaming(4);
        session.on_data_chunk(&[0x00, 1, 2, 3, 4]);
        session.on_data_chunk(&[0x01, 5]);
        assert_eq!(session.state(), FetchState::Failed);
    }

    #[test]
    fn test_oversized_chunk_fails() {
        let mut session = streaming(100);
        session.on_data_chunk(&[0u8; 21]);
        assert_eq!(session.state(), FetchState::Failed);
    }

    #[test]
    fn test_progress_is_throttled() {
        let mut session = streaming(100);
        let mut reported = Vec::new();
        for seq in 0..25u8 {
            let mut chunk = vec![seq];
            chunk.extend_from_slice(&[0u8; 4]);
            for action in session.on_data_chunk(&chunk) {
                if let SessionAction::Progress { percent, .. } = action {
                    reported.push(percent);
                }
            }
        }
        // 4% per chunk with a 5% step: every second chunk reports.
        assert_eq!(reported.len(), 12);
        assert!(reported.windows(2).all(|w| w[1] >= w[0] + 5));
        assert!(reported.iter().all(|p| *p < 100));
    }

    #[test]
    fn test_messages_ignored_while_finishing() {
        let mut session = streaming(4);
        session.on_data_chunk(&[0x00, 1, 2, 3, 4]);
        session.on_control_message(&[0x10, 0x02, 0x01]);

        assert!(session.on_data_chunk(&[0x01, 9]).is_empty());
        assert!(session.on_control_message(&[0x10, 0x02, 0x01]).is_empty());
        assert_eq!(session.state(), FetchState::Finishing);
    }

    #[test]
    fn test_failure_while_finishing() {
        let mut session = streaming(4);
        session.on_data_chunk(&[0x00, 1, 2, 3, 4]);
        session.on_control_message(&[0x10, 0x02, 0x01]);

        let actions = session.on_control_message(&[0x10, 0x02, 0x03]);
        assert!(has_release(&actions));
        assert_eq!(session.state(), FetchState::Failed);
        assert!(session.commit_succeeded().is_empty());
        assert_eq!(session.state(), FetchState::Failed);
    }

    #[test]
    fn test_commit_failure() {
        let mut session = streaming(4);
        session.on_data_chunk(&[0x00, 1, 2, 3, 4]);
        session.on_control_message(&[0x10, 0x02, 0x01]);
        let actions = session.commit_failed("disk full");

        assert!(has_release(&actions));
        let outcome = session.outcome().unwrap();
        assert_eq!(
            outcome.failure().map(|f| f.kind),
            Some(FailureKind::StorageCommitFailure)
        );
    }

    #[test]
    fn test_fail_is_idempotent() {
        let mut session = streaming(8);
        assert!(!session.abort("first").is_empty());
        assert!(session.abort("second").is_empty());
        assert_eq!(session.failure().map(|f| f.message.as_str()), Some("first"));
    }

    #[test]
    fn test_idle_session_ignores_input() {
        let mut session = FetchSession::new("dev", profile(), FetchConfig::default());
        assert!(session.on_control_message(&start_ack(8)).is_empty());
        assert!(session.on_data_chunk(&[0x00, 1]).is_empty());
        assert!(session.outcome().is_none());
    }

    #[test]
    fn test_range_start_policy() {
        let mut session = FetchSession::new(
            "dev",
            profile().with_checkpoint_policy(CheckpointPolicy::RangeStart),
            FetchConfig::default(),
        );
        session.start(t0()).unwrap();
        session.on_control_message(&start_ack(4));
        session.on_data_chunk(&[0x00, 1, 2, 3, 4]);
        match session.on_control_message(&[0x10, 0x02, 0x01]).as_slice() {
            [SessionAction::Commit(request)] => assert_eq!(request.checkpoint, t0()),
            other => panic!("unexpected actions {other:?}"),
        }
    }

    #[test]
    fn test_needs_follow_up() {
        let summary = FetchSummary {
            range_start: t0(),
            checkpoint: t0() + Duration::minutes(30),
            expected_byte_count: 120,
            bytes_received: 120,
            chunk_count: 6,
            sequence_gaps: 0,
            sample_interval: Some(Duration::minutes(1)),
        };
        assert!(summary.needs_follow_up(t0() + Duration::days(1)));
        assert!(!summary.needs_follow_up(t0() + Duration::hours(2)));

        let no_samples = FetchSummary {
            sample_interval: None,
            ..summary
        };
        assert!(!no_samples.needs_follow_up(t0() + Duration::days(1)));
    }

    #[test]
    fn test_state_order() {
        assert!(FetchState::Idle < FetchState::AwaitingMetadata);
        assert!(FetchState::Finishing < FetchState::Succeeded);
        assert!(FetchState::Streaming.is_active());
        assert!(!FetchState::Failed.is_active());
        assert!(FetchState::Failed.is_terminal());
    }
}
