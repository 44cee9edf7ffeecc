//! # bandsync storage
//!
//! Durable state owned by the sync engine.
//!
//! - [`CheckpointStore`] maps a device to the end of its last successfully
//!   synced range. [`InMemoryCheckpointStore`] is for tests;
//!   [`FileCheckpointStore`] persists to a single file replaced atomically.
//! - [`StorageBackend`] is an opaque append-only byte store, with
//!   [`InMemoryBackend`] and [`FileBackend`] implementations.
//! - [`ActivityLog`] frames raw transfers onto a backend so they can be
//!   inspected or decoded later.
//!
//! ## Example
//!
//! ```rust
//! use bandsync_storage::{CheckpointStore, InMemoryCheckpointStore};
//! use chrono::{TimeZone, Utc};
//!
//! let store = InMemoryCheckpointStore::new();
//! let t = Utc.with_ymd_and_hms(2018, 3, 1, 12, 0, 0).unwrap();
//! store.set("C8:0F:10:00:00:01", t).unwrap();
//! assert_eq!(store.get("C8:0F:10:00:00:01"), t);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod activity_log;
mod backend;
mod checkpoint;
mod error;
mod file;
mod memory;

pub use activity_log::{ActivityLog, ActivityRecord, RECORD_HEADER_LEN};
pub use backend::StorageBackend;
pub use checkpoint::{
    default_lookback, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore,
    DEFAULT_LOOKBACK_DAYS,
};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
