//! Device timestamp codec.
//!
//! Huami-family devices encode wall-clock time as eight bytes:
//!
//! ```text
//! [0..2] year (u16, little-endian)
//! [2]    month (1-12)
//! [3]    day of month
//! [4]    hour
//! [5]    minute
//! [6]    second
//! [7]    timezone offset in quarter hours (signed)
//! ```

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Length of an encoded device timestamp.
pub const TIMESTAMP_LEN: usize = 8;

const SECONDS_PER_QUARTER_HOUR: i32 = 15 * 60;

/// How a device family encodes timestamps on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimestampCodec {
    /// Local wall clock plus the timezone byte.
    HuamiLocal,
    /// UTC wall clock; the timezone byte is written as zero and ignored on decode.
    HuamiUtc,
}

impl TimestampCodec {
    /// Encodes `timestamp` as seen from `offset`.
    ///
    /// Offsets that are not a whole number of quarter hours are truncated
    /// toward zero in the timezone byte.
    pub fn encode(
        &self,
        timestamp: DateTime<Utc>,
        offset: FixedOffset,
    ) -> ProtocolResult<[u8; TIMESTAMP_LEN]> {
        let offset = match self {
            TimestampCodec::HuamiLocal => offset,
            TimestampCodec::HuamiUtc => utc_offset(),
        };
        let local = timestamp.with_timezone(&offset);

        let year = u16::try_from(local.year()).map_err(|_| ProtocolError::InvalidTimestamp {
            field: "year",
            value: i64::from(local.year()),
        })?;
        let quarters = (offset.local_minus_utc() / SECONDS_PER_QUARTER_HOUR) as i8;

        let year = year.to_le_bytes();
        Ok([
            year[0],
            year[1],
            local.month() as u8,
            local.day() as u8,
            local.hour() as u8,
            local.minute() as u8,
            local.second() as u8,
            quarters as u8,
        ])
    }

    /// Decodes an eight-byte device timestamp into UTC.
    pub fn decode(&self, bytes: &[u8]) -> ProtocolResult<DateTime<Utc>> {
        let bytes: &[u8; TIMESTAMP_LEN] =
            bytes.try_into().map_err(|_| ProtocolError::InvalidLength {
                what: "timestamp",
                expected: TIMESTAMP_LEN,
                actual: bytes.len(),
            })?;

        let year = i32::from(u16::from_le_bytes([bytes[0], bytes[1]]));
        let [month, day, hour, minute, second] = [
            bytes[2], bytes[3], bytes[4], bytes[5], bytes[6],
        ]
        .map(u32::from);

        let offset = match self {
            TimestampCodec::HuamiLocal => {
                let quarters = bytes[7] as i8;
                FixedOffset::east_opt(i32::from(quarters) * SECONDS_PER_QUARTER_HOUR).ok_or(
                    ProtocolError::InvalidTimestamp {
                        field: "timezone",
                        value: i64::from(quarters),
                    },
                )?
            }
            TimestampCodec::HuamiUtc => utc_offset(),
        };

        let date = NaiveDate::from_ymd_opt(year, month, day).ok_or(
            ProtocolError::InvalidTimestamp {
                field: "date",
                value: i64::from(year) * 10_000 + i64::from(month) * 100 + i64::from(day),
            },
        )?;
        let naive = date
            .and_hms_opt(hour, minute, second)
            .ok_or(ProtocolError::InvalidTimestamp {
                field: "time",
                value: i64::from(hour) * 10_000 + i64::from(minute) * 100 + i64::from(second),
            })?;

        offset
            .from_local_datetime(&naive)
            .single()
            .map(|local| local.with_timezone(&Utc))
            .ok_or(ProtocolError::InvalidTimestamp {
                field: "local time",
                value: naive.and_utc().timestamp(),
            })
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn encodes_local_wall_clock_with_quarter_hours() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let bytes = TimestampCodec::HuamiLocal
            .encode(at(2018, 3, 4, 22, 15, 30), offset)
            .unwrap();

        // 2018 = 0x07E2; 22:15 UTC is 00:15 on the 5th at +02:00
        assert_eq!(bytes, [0xE2, 0x07, 3, 5, 0, 15, 30, 8]);
    }

    #[test]
    fn decodes_negative_offsets() {
        // 2017-12-31 20:00:00 at -05:00
        let bytes = [0xE1, 0x07, 12, 31, 20, 0, 0, (-20i8) as u8];
        let decoded = TimestampCodec::HuamiLocal.decode(&bytes).unwrap();
        assert_eq!(decoded, at(2018, 1, 1, 1, 0, 0));
    }

    #[test]
    fn utc_codec_ignores_timezone_byte() {
        let bytes = [0xE2, 0x07, 6, 1, 12, 0, 0, 8];
        let decoded = TimestampCodec::HuamiUtc.decode(&bytes).unwrap();
        assert_eq!(decoded, at(2018, 6, 1, 12, 0, 0));

        let offset = FixedOffset::east_opt(3600).unwrap();
        let encoded = TimestampCodec::HuamiUtc.encode(decoded, offset).unwrap();
        assert_eq!(encoded[7], 0);
        assert_eq!(encoded[4], 12);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = TimestampCodec::HuamiLocal.decode(&[0u8; 7]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidLength {
                what: "timestamp",
                expected: 8,
                actual: 7
            }
        );
    }

    #[test]
    fn rejects_impossible_dates() {
        let bytes = [0xE2, 0x07, 2, 30, 0, 0, 0, 0];
        assert!(matches!(
            TimestampCodec::HuamiLocal.decode(&bytes),
            Err(ProtocolError::InvalidTimestamp { field: "date", .. })
        ));

        let bytes = [0xE2, 0x07, 2, 3, 24, 0, 0, 0];
        assert!(matches!(
            TimestampCodec::HuamiLocal.decode(&bytes),
            Err(ProtocolError::InvalidTimestamp { field: "time", .. })
        ));
    }
}
