//! Property tests for checkpoint stores.

use bandsync_storage::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
use chrono::{DateTime, Utc};
use proptest::prelude::*;
use tempfile::tempdir;

fn timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    // 2000-01-01 .. 2100-01-01, nanosecond precision
    (946_684_800i64..4_102_444_800i64, 0u32..1_000_000_000)
        .prop_map(|(secs, nanos)| DateTime::from_timestamp(secs, nanos).unwrap())
}

proptest! {
    #[test]
    fn get_is_right_inverse_of_set(device in "[A-F0-9:]{1,17}", ts in timestamp()) {
        let store = InMemoryCheckpointStore::new();
        store.set(&device, ts).unwrap();
        prop_assert_eq!(store.get(&device), ts);
    }

    #[test]
    fn file_store_round_trips_through_disk(
        writes in prop::collection::vec(("[a-c]", timestamp()), 1..8)
    ) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoints.cbor");

        {
            let store = FileCheckpointStore::open(&path).unwrap();
            for (device, ts) in &writes {
                store.set(device, *ts).unwrap();
            }
        }

        let reopened = FileCheckpointStore::open(&path).unwrap();
        for (device, _) in &writes {
            let last = writes.iter().rev().find(|(d, _)| d == device).map(|(_, ts)| *ts);
            prop_assert_eq!(reopened.load(device), last);
        }
    }
}
