//! Error types for the fetch engine.

use bandsync_protocol::ProtocolError;
use bandsync_storage::StorageError;
use std::fmt;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while fetching.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The device sent something that is not valid in the current state.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A channel could not be subscribed or written.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A fetch is already running for the device.
    #[error("fetch already in progress for device {device_id}")]
    ConcurrentFetchRejected {
        /// The busy device.
        device_id: String,
    },

    /// The storage collaborator rejected the reassembled data.
    #[error("storage commit failed: {0}")]
    StorageCommitFailure(String),

    /// The checkpoint store failed.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] StorageError),

    /// Wire encoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// The session was aborted on request.
    #[error("fetch aborted: {0}")]
    Aborted(String),

    /// No fetch is running for the device.
    #[error("no active fetch for device {device_id}")]
    NoActiveSession {
        /// The device that was addressed.
        device_id: String,
    },

    /// A session method was called in a state that does not allow it.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target.
        to: String,
    },
}

impl SyncError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportUnavailable(message.into())
    }

    /// The failure class a session records when this error ends it.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SyncError::TransportUnavailable(_) => FailureKind::TransportUnavailable,
            SyncError::StorageCommitFailure(_) | SyncError::Checkpoint(_) => {
                FailureKind::StorageCommitFailure
            }
            SyncError::Aborted(_) => FailureKind::Aborted,
            _ => FailureKind::ProtocolViolation,
        }
    }
}

/// Why a session ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Unexpected message shape, length or status.
    ProtocolViolation,
    /// Channel send or subscribe failed.
    TransportUnavailable,
    /// The reassembled data or the checkpoint could not be committed.
    StorageCommitFailure,
    /// Explicit abort request.
    Aborted,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::ProtocolViolation => "protocol violation",
            FailureKind::TransportUnavailable => "transport unavailable",
            FailureKind::StorageCommitFailure => "storage commit failure",
            FailureKind::Aborted => "aborted",
        })
    }
}

/// A terminal session failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Failure class.
    pub kind: FailureKind,
    /// Human-readable detail.
    pub message: String,
}

impl Failure {
    /// Creates a failure.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
