//! Data-channel chunks.

use crate::error::{ProtocolError, ProtocolResult};

/// One data-channel message: a sequence byte followed by payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataChunk<'a> {
    /// Rolling sequence counter (modulo 256).
    pub sequence: u8,
    /// Payload bytes following the sequence byte.
    pub payload: &'a [u8],
}

impl<'a> DataChunk<'a> {
    /// Splits a raw data-channel message.
    pub fn parse(bytes: &'a [u8]) -> ProtocolResult<Self> {
        match bytes.split_first() {
            Some((&sequence, payload)) => Ok(Self { sequence, payload }),
            None => Err(ProtocolError::EmptyChunk),
        }
    }
}

/// Sequence number expected after `last`.
///
/// `None` means no chunk has been accepted yet; devices start counting at 0.
pub fn next_sequence(last: Option<u8>) -> u8 {
    last.map_or(0, |last| last.wrapping_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_sequence_byte() {
        let raw = [7u8, 1, 2, 3];
        let chunk = DataChunk::parse(&raw).unwrap();
        assert_eq!(chunk.sequence, 7);
        assert_eq!(chunk.payload, &[1, 2, 3]);
    }

    #[test]
    fn header_only_chunk_has_empty_payload() {
        let chunk = DataChunk::parse(&[0]).unwrap();
        assert!(chunk.payload.is_empty());
    }

    #[test]
    fn empty_chunk_is_error() {
        assert_eq!(DataChunk::parse(&[]), Err(ProtocolError::EmptyChunk));
    }

    #[test]
    fn sequence_wraps() {
        assert_eq!(next_sequence(None), 0);
        assert_eq!(next_sequence(Some(0)), 1);
        assert_eq!(next_sequence(Some(255)), 0);
    }
}
