//! Property tests for the wire codecs.

use bandsync_protocol::{
    next_sequence, ControlMessage, DataChunk, DeviceFamily, DeviceProfile, Status,
    TimestampCodec, FINISH_LEN, START_ACK_LEN,
};
use chrono::{FixedOffset, TimeZone, Utc};
use proptest::prelude::*;

proptest! {
    #[test]
    fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..32)) {
        let msg = ControlMessage::decode(&bytes, TimestampCodec::HuamiLocal);
        if bytes.len() != START_ACK_LEN && bytes.len() != FINISH_LEN {
            prop_assert_eq!(msg, ControlMessage::Unrecognized(bytes));
        }
    }

    #[test]
    fn start_ack_carries_count_and_timestamp(
        count in any::<u32>(),
        minutes in 0i64..(60 * 24 * 365 * 20),
        quarters in -48i32..=56,
    ) {
        let offset = FixedOffset::east_opt(quarters * 900).unwrap();
        let start = Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap()
            + chrono::Duration::minutes(minutes);
        let profile = DeviceProfile::for_family(DeviceFamily::MiBand2);

        let mut bytes = vec![0x10, 0x01, 0x01];
        bytes.extend_from_slice(&count.to_le_bytes());
        bytes.extend_from_slice(&profile.timestamp_codec.encode(start, offset).unwrap());

        prop_assert_eq!(
            profile.decode_control(&bytes),
            ControlMessage::StartAck {
                status: Status::Success,
                expected_byte_count: count,
                start_timestamp: Some(start),
            }
        );
    }

    #[test]
    fn chunk_payload_excludes_header(bytes in prop::collection::vec(any::<u8>(), 1..64)) {
        let chunk = DataChunk::parse(&bytes).unwrap();
        prop_assert_eq!(chunk.sequence, bytes[0]);
        prop_assert_eq!(chunk.payload.len(), bytes.len() - 1);
        prop_assert_eq!(next_sequence(Some(chunk.sequence)), bytes[0].wrapping_add(1));
    }
}

#[test]
fn fetch_command_uses_profile_data_type() {
    let profile = DeviceProfile::for_family(DeviceFamily::AmazfitBip);
    let since = Utc.with_ymd_and_hms(2018, 2, 3, 4, 5, 6).unwrap();
    let command = profile
        .fetch_command(since, FixedOffset::east_opt(3600).unwrap())
        .unwrap();

    assert_eq!(command.len(), 10);
    assert_eq!(&command[..2], &[0x01, profile.data_type]);
    // 04:05 UTC is 05:05 local, seconds dropped, +4 quarter hours
    assert_eq!(&command[2..], &[0xE2, 0x07, 2, 3, 5, 5, 0, 4]);
}
