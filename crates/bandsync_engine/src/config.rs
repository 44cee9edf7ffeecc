//! Configuration for the fetch engine.

use bandsync_storage::default_lookback;
use chrono::{Duration, FixedOffset, Offset, Utc};

/// What to do when a data chunk's sequence byte is not the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequencePolicy {
    /// Log the gap, count it, and keep the chunk.
    #[default]
    BestEffort,
    /// Fail the session on the first gap.
    Strict,
}

/// Configuration for fetch sessions.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Handling of sequence gaps.
    pub sequence_policy: SequencePolicy,
    /// Minimum percent change between streaming progress events.
    pub progress_step: u8,
    /// How far back to fetch for a device without a checkpoint.
    pub lookback: Duration,
    /// UTC offset of the device clock, used to encode the start timestamp.
    pub device_utc_offset: FixedOffset,
    /// Text handed to the busy marker while a fetch runs.
    pub busy_reason: String,
}

impl FetchConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            sequence_policy: SequencePolicy::default(),
            progress_step: 5,
            lookback: default_lookback(),
            device_utc_offset: Utc.fix(),
            busy_reason: "Fetching activity data".to_string(),
        }
    }

    /// Sets the sequence policy.
    pub fn with_sequence_policy(mut self, policy: SequencePolicy) -> Self {
        self.sequence_policy = policy;
        self
    }

    /// Sets the progress step. Zero is treated as one.
    pub fn with_progress_step(mut self, step: u8) -> Self {
        self.progress_step = step.max(1);
        self
    }

    /// Sets the lookback for devices without a checkpoint.
    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    /// Sets the device clock offset.
    pub fn with_device_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.device_utc_offset = offset;
        self
    }

    /// Sets the busy reason.
    pub fn with_busy_reason(mut self, reason: impl Into<String>) -> Self {
        self.busy_reason = reason.into();
        self
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::new()
    }
}
