//! Async event pump.
//!
//! Transports that deliver notifications on their own tasks push
//! [`ChannelEvent`]s into a channel; the pump feeds them to the engine in
//! arrival order, which keeps every session's inputs serialized.

use crate::collaborators::ActivitySink;
use crate::engine::FetchEngine;
use crate::session::FetchOutcome;
use crate::transport::ChannelTransport;
use bandsync_storage::CheckpointStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// An inbound transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Notification on the control channel.
    Control {
        /// Source device.
        device_id: String,
        /// Raw message.
        payload: Vec<u8>,
    },
    /// Notification on the data channel.
    Data {
        /// Source device.
        device_id: String,
        /// Raw chunk.
        payload: Vec<u8>,
    },
    /// Abort request, e.g. on disconnect.
    Abort {
        /// Target device.
        device_id: String,
        /// Why.
        reason: String,
    },
}

impl ChannelEvent {
    /// The device the event concerns.
    pub fn device_id(&self) -> &str {
        match self {
            ChannelEvent::Control { device_id, .. }
            | ChannelEvent::Data { device_id, .. }
            | ChannelEvent::Abort { device_id, .. } => device_id,
        }
    }
}

/// Feeds events to the engine until the sender side closes.
///
/// Outcomes of sessions ended by an event are forwarded to `outcomes`.
/// Returns the number of events processed.
pub async fn run_event_pump<T, K, S>(
    engine: Arc<FetchEngine<T, K, S>>,
    mut events: mpsc::Receiver<ChannelEvent>,
    outcomes: mpsc::UnboundedSender<FetchOutcome>,
) -> u64
where
    T: ChannelTransport,
    K: CheckpointStore,
    S: ActivitySink,
{
    let mut processed = 0u64;
    while let Some(event) = events.recv().await {
        processed += 1;
        let outcome = match event {
            ChannelEvent::Control { device_id, payload } => {
                engine.handle_control_message(&device_id, &payload)
            }
            ChannelEvent::Data { device_id, payload } => {
                engine.handle_data_chunk(&device_id, &payload)
            }
            ChannelEvent::Abort { device_id, reason } => match engine.abort(&device_id, &reason) {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    debug!(%device_id, error = %e, "abort ignored");
                    None
                }
            },
        };

        if let Some(outcome) = outcome {
            if outcomes.send(outcome).is_err() {
                debug!("outcome receiver dropped");
            }
        }
    }
    debug!(processed, "event pump stopped");
    processed
}

/// Spawns [`run_event_pump`] on the current runtime.
///
/// Returns the event sender, the outcome receiver and the pump's handle.
pub fn spawn_event_pump<T, K, S>(
    engine: Arc<FetchEngine<T, K, S>>,
    capacity: usize,
) -> (
    mpsc::Sender<ChannelEvent>,
    mpsc::UnboundedReceiver<FetchOutcome>,
    JoinHandle<u64>,
)
where
    T: ChannelTransport + 'static,
    K: CheckpointStore + 'static,
    S: ActivitySink + 'static,
{
    let (event_tx, event_rx) = mpsc::channel(capacity.max(1));
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run_event_pump(engine, event_rx, outcome_tx));
    (event_tx, outcome_rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MemoryActivitySink;
    use crate::config::FetchConfig;
    use crate::session::FetchState;
    use crate::transport::MockTransport;
    use bandsync_protocol::{CheckpointPolicy, DeviceFamily, DeviceProfile, TimestampCodec};
    use bandsync_storage::InMemoryCheckpointStore;
    use chrono::{Offset, TimeZone, Utc};

    type TestEngine = FetchEngine<MockTransport, InMemoryCheckpointStore, MemoryActivitySink>;

    fn engine() -> Arc<TestEngine> {
        Arc::new(FetchEngine::new(
            FetchConfig::default(),
            Arc::new(MockTransport::new()),
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(MemoryActivitySink::new()),
        ))
    }

    fn start_ack(count: u32) -> Vec<u8> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let ts = TimestampCodec::HuamiUtc
            .encode(start, Utc.fix())
            .unwrap();
        let mut msg = vec![0x10, 0x01, 0x01];
        msg.extend_from_slice(&count.to_le_bytes());
        msg.extend_from_slice(&ts);
        msg
    }

    #[tokio::test]
    async fn test_pump_drives_session_to_completion() {
        let engine = engine();
        let profile = DeviceProfile::for_family(DeviceFamily::MiBand2)
            .with_timestamp_codec(TimestampCodec::HuamiUtc)
            .with_checkpoint_policy(CheckpointPolicy::RangeStart);
        engine.start_fetch("dev", &profile).unwrap();

        let (tx, mut outcomes, handle) = spawn_event_pump(Arc::clone(&engine), 8);
        let events = vec![
            ChannelEvent::Control {
                device_id: "dev".into(),
                payload: start_ack(4),
            },
            ChannelEvent::Data {
                device_id: "dev".into(),
                payload: vec![0x00, 1, 2, 3, 4],
            },
            ChannelEvent::Control {
                device_id: "dev".into(),
                payload: vec![0x10, 0x02, 0x01],
            },
        ];
        for event in events {
            tx.send(event).await.unwrap();
        }
        drop(tx);

        let outcome = outcomes.recv().await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.summary().unwrap().bytes_received, 4);
        assert_eq!(handle.await.unwrap(), 3);
        assert_eq!(engine.sink().commits()[0].data, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_pump_abort_event() {
        let engine = engine();
        let profile = DeviceProfile::for_family(DeviceFamily::MiBand3);
        engine.start_fetch("dev", &profile).unwrap();

        let (tx, mut outcomes, handle) = spawn_event_pump(Arc::clone(&engine), 1);
        tx.send(ChannelEvent::Abort {
            device_id: "dev".into(),
            reason: "disconnected".into(),
        })
        .await
        .unwrap();
        tx.send(ChannelEvent::Abort {
            device_id: "dev".into(),
            reason: "again".into(),
        })
        .await
        .unwrap();
        drop(tx);

        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.state(), FetchState::Failed);
        assert_eq!(handle.await.unwrap(), 2);
        assert!(outcomes.recv().await.is_none());
    }

    #[test]
    fn test_event_device_id() {
        let event = ChannelEvent::Data {
            device_id: "a".into(),
            payload: vec![],
        };
        assert_eq!(event.device_id(), "a");
    }
}
