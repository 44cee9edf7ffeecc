//! Device family profiles and the ordered profile registry.
//!
//! Every supported family speaks the same fetch protocol but is described by
//! its own [`DeviceProfile`]: which channels to use, how to encode commands and
//! timestamps, and how a finished transfer advances the checkpoint. The fetch
//! engine is generic over the profile record; it never branches on the family.

use crate::command::{FetchCommand, ACTIVITY_DATA_TYPE_ACTIVITY};
use crate::error::{ProtocolError, ProtocolResult};
use crate::message::ControlMessage;
use crate::timestamp::TimestampCodec;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Characteristic carrying fetch commands and control responses.
pub const CHARACTERISTIC_FETCH: Uuid = Uuid::from_u128(0x0000_0004_0000_3512_2118_0009_af10_0700);

/// Characteristic carrying streamed activity data.
pub const CHARACTERISTIC_ACTIVITY_DATA: Uuid =
    Uuid::from_u128(0x0000_0005_0000_3512_2118_0009_af10_0700);

/// Data-channel message size on these devices (one sequence byte + 19 payload bytes).
const HUAMI_CHUNK_SIZE: usize = 20;

/// Activity samples are four bytes, one per minute.
const HUAMI_SAMPLE_SIZE: u32 = 4;
const HUAMI_SAMPLE_INTERVAL_SECS: u32 = 60;

/// Supported hardware families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceFamily {
    /// Mi Band 2.
    MiBand2,
    /// Mi Band HRX edition.
    MiBand2Hrx,
    /// Mi Band 3.
    MiBand3,
    /// Amazfit Bip.
    AmazfitBip,
    /// Amazfit Cor.
    AmazfitCor,
}

impl DeviceFamily {
    /// All families, in registry priority order.
    pub const ALL: [DeviceFamily; 5] = [
        DeviceFamily::AmazfitBip,
        DeviceFamily::AmazfitCor,
        DeviceFamily::MiBand3,
        DeviceFamily::MiBand2Hrx,
        DeviceFamily::MiBand2,
    ];

    /// Stable kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceFamily::MiBand2 => "mi-band-2",
            DeviceFamily::MiBand2Hrx => "mi-band-2-hrx",
            DeviceFamily::MiBand3 => "mi-band-3",
            DeviceFamily::AmazfitBip => "amazfit-bip",
            DeviceFamily::AmazfitCor => "amazfit-cor",
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceFamily {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceFamily::ALL
            .into_iter()
            .find(|family| family.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtocolError::UnknownFamily(s.to_string()))
    }
}

/// How a successful transfer advances the sync checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointPolicy {
    /// The checkpoint becomes the device-reported range start.
    RangeStart,
    /// The stream is a run of fixed-size samples at a fixed interval
    /// starting at the range start; the checkpoint moves past the last one.
    PerSample {
        /// Bytes per sample.
        sample_size: u32,
        /// Seconds covered by one sample.
        interval_secs: u32,
    },
}

impl CheckpointPolicy {
    /// Computes the checkpoint after receiving `byte_count` bytes from `range_start`.
    pub fn checkpoint(&self, range_start: DateTime<Utc>, byte_count: u64) -> DateTime<Utc> {
        match *self {
            CheckpointPolicy::RangeStart => range_start,
            CheckpointPolicy::PerSample {
                sample_size,
                interval_secs,
            } => {
                if sample_size == 0 {
                    return range_start;
                }
                let samples = byte_count / u64::from(sample_size);
                let secs = samples.saturating_mul(u64::from(interval_secs));
                i64::try_from(secs)
                    .ok()
                    .and_then(Duration::try_seconds)
                    .and_then(|span| range_start.checked_add_signed(span))
                    .unwrap_or(range_start)
            }
        }
    }

    /// Time covered by one sample, if the stream is sample based.
    pub fn sample_interval(&self) -> Option<Duration> {
        match *self {
            CheckpointPolicy::RangeStart => None,
            CheckpointPolicy::PerSample { interval_secs, .. } => {
                Some(Duration::seconds(i64::from(interval_secs)))
            }
        }
    }
}

/// Everything the fetch engine needs to know about a device family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// The family this profile describes.
    pub family: DeviceFamily,
    /// Channel for commands and control responses.
    pub control_channel: Uuid,
    /// Channel for streamed data chunks.
    pub data_channel: Uuid,
    /// Data set requested by the fetch-start command.
    pub data_type: u8,
    /// Wire timestamp encoding.
    pub timestamp_codec: TimestampCodec,
    /// Size of a full data-channel message, sequence byte included.
    pub chunk_size: usize,
    /// Whether a begin-transfer command must follow a successful `StartAck`.
    pub begin_transfer: bool,
    /// Checkpoint derivation.
    pub checkpoint_policy: CheckpointPolicy,
}

impl DeviceProfile {
    /// Built-in profile for a family.
    pub fn for_family(family: DeviceFamily) -> Self {
        Self {
            family,
            control_channel: CHARACTERISTIC_FETCH,
            data_channel: CHARACTERISTIC_ACTIVITY_DATA,
            data_type: ACTIVITY_DATA_TYPE_ACTIVITY,
            timestamp_codec: TimestampCodec::HuamiLocal,
            chunk_size: HUAMI_CHUNK_SIZE,
            begin_transfer: true,
            checkpoint_policy: CheckpointPolicy::PerSample {
                sample_size: HUAMI_SAMPLE_SIZE,
                interval_secs: HUAMI_SAMPLE_INTERVAL_SECS,
            },
        }
    }

    /// Overrides the checkpoint policy.
    pub fn with_checkpoint_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.checkpoint_policy = policy;
        self
    }

    /// Overrides the timestamp codec.
    pub fn with_timestamp_codec(mut self, codec: TimestampCodec) -> Self {
        self.timestamp_codec = codec;
        self
    }

    /// Sets whether a begin-transfer command follows a successful `StartAck`.
    pub fn with_begin_transfer(mut self, begin_transfer: bool) -> Self {
        self.begin_transfer = begin_transfer;
        self
    }

    /// Encodes the fetch-start command for data since `since`.
    pub fn fetch_command(
        &self,
        since: DateTime<Utc>,
        offset: FixedOffset,
    ) -> ProtocolResult<Vec<u8>> {
        FetchCommand::new(self.data_type, since).encode(self.timestamp_codec, offset)
    }

    /// Decodes a control-channel message with this family's timestamp codec.
    pub fn decode_control(&self, bytes: &[u8]) -> ControlMessage {
        ControlMessage::decode(bytes, self.timestamp_codec)
    }

    /// Payload bytes carried by one full data-channel message.
    pub fn payload_per_chunk(&self) -> usize {
        self.chunk_size.saturating_sub(1)
    }
}

/// What a scan or the host OS knows about a device before a profile is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceCandidate {
    /// Advertised name.
    pub name: String,
    /// Hardware address.
    pub address: String,
}

impl DeviceCandidate {
    /// Creates a candidate.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// A predicate selecting devices for a profile. Comparisons ignore ASCII case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchRule {
    /// Advertised name equals the value.
    NameEquals(String),
    /// Advertised name starts with the value.
    NamePrefix(String),
    /// Hardware address starts with the value.
    AddressPrefix(String),
}

impl MatchRule {
    /// Returns true if the candidate satisfies this rule.
    pub fn matches(&self, candidate: &DeviceCandidate) -> bool {
        match self {
            MatchRule::NameEquals(name) => candidate.name.eq_ignore_ascii_case(name),
            MatchRule::NamePrefix(prefix) => starts_with_ignore_case(&candidate.name, prefix),
            MatchRule::AddressPrefix(prefix) => {
                starts_with_ignore_case(&candidate.address, prefix)
            }
        }
    }
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// An ordered list of `(rule, profile)` entries.
///
/// Entries are consulted in insertion order and the first match wins, so more
/// specific rules must be registered before general ones.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    entries: Vec<(MatchRule, DeviceProfile)>,
}

impl ProfileRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry with the lowest priority so far.
    pub fn register(mut self, rule: MatchRule, profile: DeviceProfile) -> Self {
        self.entries.push((rule, profile));
        self
    }

    /// Returns the profile of the first matching entry.
    pub fn resolve(&self, candidate: &DeviceCandidate) -> Option<&DeviceProfile> {
        self.entries
            .iter()
            .find(|(rule, _)| rule.matches(candidate))
            .map(|(_, profile)| profile)
    }

    /// Iterates entries in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &(MatchRule, DeviceProfile)> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The built-in registry.
///
/// The generic Mi Band prefix also matches the more specific band variants,
/// so it must stay last.
pub fn default_registry() -> ProfileRegistry {
    ProfileRegistry::new()
        .register(
            MatchRule::NameEquals("Amazfit Bip Watch".into()),
            DeviceProfile::for_family(DeviceFamily::AmazfitBip),
        )
        .register(
            MatchRule::NameEquals("Amazfit Band 2".into()),
            DeviceProfile::for_family(DeviceFamily::AmazfitCor),
        )
        .register(
            MatchRule::NameEquals("Mi Band 3".into()),
            DeviceProfile::for_family(DeviceFamily::MiBand3),
        )
        .register(
            MatchRule::NameEquals("Mi Band HRX".into()),
            DeviceProfile::for_family(DeviceFamily::MiBand2Hrx),
        )
        .register(
            MatchRule::NamePrefix("MI Band".into()),
            DeviceProfile::for_family(DeviceFamily::MiBand2),
        )
}
