//! Error types for protocol decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while decoding wire data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The input was shorter or longer than the fixed shape requires.
    #[error("invalid {what} length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// What was being decoded.
        what: &'static str,
        /// Required length.
        expected: usize,
        /// Observed length.
        actual: usize,
    },

    /// A timestamp field held a value outside its calendar range.
    #[error("invalid timestamp field {field}: {value}")]
    InvalidTimestamp {
        /// Name of the offending field.
        field: &'static str,
        /// Raw value.
        value: i64,
    },

    /// A data-channel message carried no bytes at all.
    #[error("empty data chunk")]
    EmptyChunk,

    /// An unknown device family name was given.
    #[error("unknown device family: {0}")]
    UnknownFamily(String),
}
