//! Control-channel messages.
//!
//! The control channel carries two fixed shapes, told apart by length and
//! leading marker bytes:
//!
//! | Message  | Length | Layout |
//! |----------|--------|--------|
//! | StartAck | 15     | `10 01 <status> <u32 LE byte count> <8-byte timestamp>` |
//! | Finish   | 3      | `10 02 <status>` |
//!
//! Anything else is [`ControlMessage::Unrecognized`].

use crate::command::{COMMAND_ACTIVITY_DATA_START_DATE, COMMAND_FETCH_DATA};
use crate::timestamp::{TimestampCodec, TIMESTAMP_LEN};
use chrono::{DateTime, Utc};

/// Leading byte of every device response.
pub const RESPONSE: u8 = 0x10;

/// Status byte reporting success.
pub const STATUS_SUCCESS: u8 = 0x01;

/// Length of a `StartAck` message.
pub const START_ACK_LEN: usize = 15;

/// Length of a `Finish` message.
pub const FINISH_LEN: usize = 3;

/// The only `Finish` message that reports success.
pub const FINISH_SUCCESS: [u8; FINISH_LEN] = [RESPONSE, COMMAND_FETCH_DATA, STATUS_SUCCESS];

const START_ACK_MARKER: [u8; 2] = [RESPONSE, COMMAND_ACTIVITY_DATA_START_DATE];
const FINISH_MARKER: [u8; 2] = [RESPONSE, COMMAND_FETCH_DATA];

/// Status reported by the device in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The request was accepted.
    Success,
    /// The request was refused with the given raw status byte.
    Failure(u8),
}

impl Status {
    /// Interprets a raw status byte.
    pub fn from_byte(byte: u8) -> Self {
        if byte == STATUS_SUCCESS {
            Status::Success
        } else {
            Status::Failure(byte)
        }
    }

    /// Returns true for [`Status::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}

/// A decoded control-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// The device answered the fetch-start command.
    StartAck {
        /// Whether the device accepted the request.
        status: Status,
        /// Number of payload bytes the device intends to stream, excluding
        /// sequence bytes.
        expected_byte_count: u32,
        /// Start of the streamed range. Always present on success.
        start_timestamp: Option<DateTime<Utc>>,
    },
    /// The device finished (or gave up) streaming.
    Finish {
        /// Completion status.
        status: Status,
    },
    /// Any other shape.
    Unrecognized(Vec<u8>),
}

impl ControlMessage {
    /// Decodes a control-channel message.
    ///
    /// Never fails: malformed input becomes [`ControlMessage::Unrecognized`],
    /// including a successful `StartAck` whose timestamp cannot be decoded.
    pub fn decode(bytes: &[u8], codec: TimestampCodec) -> Self {
        match bytes.len() {
            START_ACK_LEN if bytes[..2] == START_ACK_MARKER => {
                let status = Status::from_byte(bytes[2]);
                let expected_byte_count =
                    u32::from_le_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]);
                let timestamp = &bytes[7..7 + TIMESTAMP_LEN];

                match status {
                    Status::Success => match codec.decode(timestamp) {
                        Ok(start) => ControlMessage::StartAck {
                            status,
                            expected_byte_count,
                            start_timestamp: Some(start),
                        },
                        Err(_) => ControlMessage::Unrecognized(bytes.to_vec()),
                    },
                    Status::Failure(_) => ControlMessage::StartAck {
                        status,
                        expected_byte_count,
                        start_timestamp: codec.decode(timestamp).ok(),
                    },
                }
            }
            FINISH_LEN if bytes[..2] == FINISH_MARKER => ControlMessage::Finish {
                status: Status::from_byte(bytes[2]),
            },
            _ => ControlMessage::Unrecognized(bytes.to_vec()),
        }
    }

    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::StartAck { .. } => "start-ack",
            ControlMessage::Finish { .. } => "finish",
            ControlMessage::Unrecognized(_) => "unrecognized",
        }
    }
}
