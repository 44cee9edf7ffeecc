//! Channel transport abstraction.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// The two channels a fetch uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Commands, metadata, acknowledgements and finish messages.
    Control,
    /// Fixed-size data chunks.
    Data,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Channel::Control => "control",
            Channel::Data => "data",
        })
    }
}

/// Primitives the fetch engine needs from the wireless link.
///
/// Connection setup and command queuing belong to the implementation.
/// Incoming messages are delivered by calling
/// [`FetchEngine::handle_control_message`](crate::FetchEngine::handle_control_message)
/// and [`FetchEngine::handle_data_chunk`](crate::FetchEngine::handle_data_chunk).
pub trait ChannelTransport: Send + Sync {
    /// Enables or disables notification delivery for a channel. Idempotent.
    fn set_notifications(&self, device_id: &str, channel: Uuid, enabled: bool) -> SyncResult<()>;

    /// Writes a command. Fire-and-forget: success means it was queued.
    fn send_command(&self, device_id: &str, channel: Uuid, command: &[u8]) -> SyncResult<()>;
}

/// A call observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// `set_notifications`.
    Notify {
        /// Target device.
        device_id: String,
        /// Channel identifier.
        channel: Uuid,
        /// Requested state.
        enabled: bool,
    },
    /// `send_command`.
    Command {
        /// Target device.
        device_id: String,
        /// Channel identifier.
        channel: Uuid,
        /// Command bytes.
        bytes: Vec<u8>,
    },
}

/// A recording transport for tests and replays.
#[derive(Debug, Default)]
pub struct MockTransport {
    calls: Mutex<Vec<TransportCall>>,
    notifications: Mutex<HashMap<(String, Uuid), bool>>,
    fail_commands: AtomicBool,
    fail_notifications: AtomicBool,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `send_command` calls fail.
    pub fn set_fail_commands(&self, fail: bool) {
        self.fail_commands.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `set_notifications` calls fail.
    pub fn set_fail_notifications(&self, fail: bool) {
        self.fail_notifications.store(fail, Ordering::SeqCst);
    }

    /// All calls in order.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Commands sent to a device, in order.
    pub fn commands(&self, device_id: &str) -> Vec<Vec<u8>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Command {
                    device_id: d,
                    bytes,
                    ..
                } if d == device_id => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether notifications are currently enabled for a channel.
    pub fn is_enabled(&self, device_id: &str, channel: Uuid) -> bool {
        self.notifications
            .lock()
            .get(&(device_id.to_string(), channel))
            .copied()
            .unwrap_or(false)
    }

    /// Forgets recorded calls. Notification state is kept.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }
}

impl ChannelTransport for MockTransport {
    fn set_notifications(&self, device_id: &str, channel: Uuid, enabled: bool) -> SyncResult<()> {
        if self.fail_notifications.load(Ordering::SeqCst) {
            return Err(SyncError::transport(format!(
                "cannot change notifications on {channel}"
            )));
        }
        self.notifications
            .lock()
            .insert((device_id.to_string(), channel), enabled);
        self.calls.lock().push(TransportCall::Notify {
            device_id: device_id.to_string(),
            channel,
            enabled,
        });
        Ok(())
    }

    fn send_command(&self, device_id: &str, channel: Uuid, command: &[u8]) -> SyncResult<()> {
        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(SyncError::transport(format!("write to {channel} failed")));
        }
        self.calls.lock().push(TransportCall::Command {
            device_id: device_id.to_string(),
            channel,
            bytes: command.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANNEL: Uuid = Uuid::from_u128(4);

    #[test]
    fn mock_transport_records_calls() {
        let transport = MockTransport::new();
        transport.set_notifications("dev", CHANNEL, true).unwrap();
        transport.send_command("dev", CHANNEL, &[1, 2]).unwrap();
        transport.send_command("other", CHANNEL, &[3]).unwrap();

        assert!(transport.is_enabled("dev", CHANNEL));
        assert!(!transport.is_enabled("other", CHANNEL));
        assert_eq!(transport.commands("dev"), vec![vec![1, 2]]);
        assert_eq!(transport.calls().len(), 3);

        transport.clear_calls();
        assert!(transport.calls().is_empty());
        assert!(transport.is_enabled("dev", CHANNEL));
    }

    #[test]
    fn mock_transport_failure_injection() {
        let transport = MockTransport::new();
        transport.set_fail_commands(true);
        assert!(matches!(
            transport.send_command("dev", CHANNEL, &[1]),
            Err(SyncError::TransportUnavailable(_))
        ));

        transport.set_fail_notifications(true);
        assert!(transport.set_notifications("dev", CHANNEL, true).is_err());
        assert!(!transport.is_enabled("dev", CHANNEL));
        assert!(transport.calls().is_empty());
    }
}
