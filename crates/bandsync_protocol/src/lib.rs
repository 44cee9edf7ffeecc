//! # bandsync protocol
//!
//! Wire types and codecs for the activity fetch protocol spoken by
//! Huami-family wearables.
//!
//! This crate provides:
//! - Control-channel message decoding (`StartAck`, `Finish`, unrecognized shapes)
//! - Data-channel chunk parsing
//! - Fetch command encoding
//! - The 8-byte device timestamp codec
//! - Device family profiles and an ordered profile registry
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod chunk;
mod command;
mod error;
mod message;
mod profile;
mod timestamp;

pub use chunk::{next_sequence, DataChunk};
pub use command::{
    FetchCommand, ACTIVITY_DATA_TYPE_ACTIVITY, COMMAND_ACTIVITY_DATA_START_DATE,
    COMMAND_FETCH_DATA,
};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{
    ControlMessage, Status, FINISH_LEN, FINISH_SUCCESS, RESPONSE, START_ACK_LEN, STATUS_SUCCESS,
};
pub use profile::{
    default_registry, CheckpointPolicy, DeviceCandidate, DeviceFamily, DeviceProfile, MatchRule,
    ProfileRegistry, CHARACTERISTIC_ACTIVITY_DATA, CHARACTERISTIC_FETCH,
};
pub use timestamp::{TimestampCodec, TIMESTAMP_LEN};
