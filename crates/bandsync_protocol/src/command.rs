//! Commands written to the device.

use crate::error::ProtocolResult;
use crate::timestamp::{TimestampCodec, TIMESTAMP_LEN};
use chrono::{DateTime, FixedOffset, Timelike, Utc};

/// Command byte: set the start date of the data to fetch.
pub const COMMAND_ACTIVITY_DATA_START_DATE: u8 = 0x01;

/// Command byte: begin streaming on the data channel.
pub const COMMAND_FETCH_DATA: u8 = 0x02;

/// Data type selector for minute-by-minute activity samples.
pub const ACTIVITY_DATA_TYPE_ACTIVITY: u8 = 0x01;

/// The fetch-start command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchCommand {
    /// Which data set to fetch.
    pub data_type: u8,
    /// Fetch data recorded at or after this instant.
    pub since: DateTime<Utc>,
}

impl FetchCommand {
    /// Creates a fetch-start command.
    pub fn new(data_type: u8, since: DateTime<Utc>) -> Self {
        Self { data_type, since }
    }

    /// Encodes as `01 <data type> <timestamp>`.
    ///
    /// The device works at minute granularity, so seconds are sent as zero.
    pub fn encode(&self, codec: TimestampCodec, offset: FixedOffset) -> ProtocolResult<Vec<u8>> {
        let since = self
            .since
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(self.since);

        let mut bytes = Vec::with_capacity(2 + TIMESTAMP_LEN);
        bytes.push(COMMAND_ACTIVITY_DATA_START_DATE);
        bytes.push(self.data_type);
        bytes.extend_from_slice(&codec.encode(since, offset)?);
        Ok(bytes)
    }

    /// The single-byte command that starts streaming once the data channel
    /// is enabled.
    pub fn begin_transfer() -> [u8; 1] {
        [COMMAND_FETCH_DATA]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn encodes_fetch_start() {
        let since = Utc.with_ymd_and_hms(2018, 1, 2, 3, 4, 59).unwrap();
        let offset = FixedOffset::east_opt(0).unwrap();
        let bytes = FetchCommand::new(ACTIVITY_DATA_TYPE_ACTIVITY, since)
            .encode(TimestampCodec::HuamiLocal, offset)
            .unwrap();

        assert_eq!(bytes, vec![0x01, 0x01, 0xE2, 0x07, 1, 2, 3, 4, 0, 0]);
    }

    #[test]
    fn begin_transfer_is_fetch_data() {
        assert_eq!(FetchCommand::begin_transfer(), [0x02]);
    }
}
