//! CLI command implementations.

pub mod checkpoint;
pub mod log;
pub mod profiles;
pub mod replay;

use std::path::{Path, PathBuf};

/// Checkpoint file inside the data directory.
pub fn checkpoint_path(dir: &Path) -> PathBuf {
    dir.join("checkpoints.cbor")
}

/// Activity log inside the data directory.
pub fn activity_log_path(dir: &Path) -> PathBuf {
    dir.join("activity.log")
}
