//! # bandsync engine
//!
//! Activity fetch state machine and engine for bandsync.
//!
//! This crate provides:
//! - The per-device fetch session state machine
//! - Chunk reassembly with packet-counter tracking
//! - The fetch engine, which runs sessions against a channel transport
//! - Collaborator traits for storage, progress and busy state
//! - An async event pump for transports that deliver on their own tasks
//!
//! ## Architecture
//!
//! A fetch is a short conversation over two channels:
//! 1. Request data since the device's checkpoint on the control channel
//! 2. Receive the metadata acknowledgement (byte count, range start)
//! 3. Receive numbered data chunks on the data channel
//! 4. Receive the finish message, then commit data and checkpoint
//!
//! Sessions never touch I/O. They return [`SessionAction`]s which the
//! [`FetchEngine`] executes.
//!
//! ## Key Invariants
//!
//! - At most one active session per device
//! - The checkpoint only advances after the data is committed
//! - A failed or aborted session commits nothing
//! - Every terminal session releases its channels and busy marker

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collaborators;
mod config;
mod engine;
mod error;
mod pump;
mod reassembler;
mod session;
mod transport;

pub use collaborators::{
    ActivitySink, BusyMarker, BusyRegistry, CommittedTransfer, MemoryActivitySink, ProgressEvent,
    ProgressReporter, RecordingProgressReporter, TracingProgressReporter,
};
pub use config::{FetchConfig, SequencePolicy};
pub use engine::{FetchEngine, FetchStats};
pub use error::{Failure, FailureKind, SyncError, SyncResult};
pub use pump::{run_event_pump, spawn_event_pump, ChannelEvent};
pub use reassembler::{ChunkReassembler, SequenceCheck};
pub use session::{
    CommitRequest, FetchOutcome, FetchSession, FetchState, FetchSummary, SessionAction,
    MAX_FOLLOW_UP_ROUNDS,
};
pub use transport::{Channel, ChannelTransport, MockTransport, TransportCall};

/// Engine crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
