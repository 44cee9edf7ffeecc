//! Chunk reassembly.

use bandsync_protocol::{next_sequence, DataChunk};
use bytes::{Bytes, BytesMut};

/// Result of checking a chunk's sequence byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// The byte is the expected successor.
    InOrder,
    /// A chunk was skipped, repeated or reordered.
    Gap {
        /// The sequence byte that was expected.
        expected: u8,
        /// The sequence byte that arrived.
        actual: u8,
    },
}

/// Append-only buffer for one session's data-channel payloads.
///
/// Sequence bytes are tracked but never used to reorder; whether a gap is
/// fatal is the session's decision.
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    buffer: BytesMut,
    bytes_received: u64,
    last_sequence: Option<u8>,
    chunk_count: u64,
    gap_count: u64,
    finalized: bool,
}

impl ChunkReassembler {
    /// Creates an empty reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a reassembler sized for `expected` payload bytes.
    pub fn with_capacity(expected: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(expected),
            ..Self::default()
        }
    }

    /// Checks `sequence` against the last accepted chunk without recording it.
    pub fn check_sequence(&self, sequence: u8) -> SequenceCheck {
        let expected = next_sequence(self.last_sequence);
        if sequence == expected {
            SequenceCheck::InOrder
        } else {
            SequenceCheck::Gap {
                expected,
                actual: sequence,
            }
        }
    }

    /// Appends a chunk's payload and records its sequence byte.
    pub fn append(&mut self, chunk: &DataChunk<'_>) -> SequenceCheck {
        debug_assert!(!self.finalized, "append after finalize");

        let check = self.check_sequence(chunk.sequence);
        if matches!(check, SequenceCheck::Gap { .. }) {
            self.gap_count += 1;
        }

        self.buffer.extend_from_slice(chunk.payload);
        self.bytes_received += chunk.payload.len() as u64;
        self.last_sequence = Some(chunk.sequence);
        self.chunk_count += 1;
        check
    }

    /// Total payload bytes appended.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Sequence byte of the most recently accepted chunk.
    pub fn last_sequence(&self) -> Option<u8> {
        self.last_sequence
    }

    /// Number of chunks appended.
    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    /// Number of sequence gaps observed.
    pub fn gap_count(&self) -> u64 {
        self.gap_count
    }

    /// Hands out the accumulated buffer. Returns `None` on every call after the first.
    pub fn finalize(&mut self) -> Option<Bytes> {
        if self.finalized {
            return None;
        }
        self.finalized = true;
        Some(self.buffer.split().freeze())
    }

    /// Drops buffered data.
    pub fn discard(&mut self) {
        self.buffer = BytesMut::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(sequence: u8, payload: &[u8]) -> DataChunk<'_> {
        DataChunk { sequence, payload }
    }

    #[test]
    fn appends_in_order() {
        let mut r = ChunkReassembler::new();
        assert_eq!(r.append(&chunk(0, &[1, 2])), SequenceCheck::InOrder);
        assert_eq!(r.append(&chunk(1, &[3])), SequenceCheck::InOrder);

        assert_eq!(r.bytes_received(), 3);
        assert_eq!(r.last_sequence(), Some(1));
        assert_eq!(r.chunk_count(), 2);
        assert_eq!(r.finalize().unwrap().as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn gap_is_reported_and_payload_kept() {
        let mut r = ChunkReassembler::new();
        r.append(&chunk(0, &[1]));
        assert_eq!(
            r.append(&chunk(2, &[2])),
            SequenceCheck::Gap {
                expected: 1,
                actual: 2
            }
        );
        assert_eq!(r.gap_count(), 1);
        assert_eq!(r.bytes_received(), 2);
        // Tracking resumes from the byte that actually arrived.
        assert_eq!(r.check_sequence(3), SequenceCheck::InOrder);
    }

    #[test]
    fn sequence_wraps_after_255() {
        let mut r = ChunkReassembler::new();
        for i in 0..=256u32 {
            assert_eq!(r.append(&chunk(i as u8, &[0])), SequenceCheck::InOrder);
        }
        assert_eq!(r.gap_count(), 0);
    }

    #[test]
    fn first_chunk_must_be_zero() {
        let r = ChunkReassembler::new();
        assert_eq!(
            r.check_sequence(5),
            SequenceCheck::Gap {
                expected: 0,
                actual: 5
            }
        );
    }

    #[test]
    fn finalize_only_once() {
        let mut r = ChunkReassembler::with_capacity(8);
        r.append(&chunk(0, &[9]));
        assert!(r.finalize().is_some());
        assert!(r.finalize().is_none());
        assert_eq!(r.bytes_received(), 1);
    }
}
