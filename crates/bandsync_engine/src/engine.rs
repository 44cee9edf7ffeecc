//! Fetch engine: owns sessions and executes their actions.

use crate::collaborators::{
    ActivitySink, BusyMarker, BusyRegistry, ProgressReporter, TracingProgressReporter,
};
use crate::config::FetchConfig;
use crate::error::{SyncError, SyncResult};
use crate::session::{CommitRequest, FetchOutcome, FetchSession, FetchState, SessionAction};
use crate::transport::ChannelTransport;
use bandsync_protocol::DeviceProfile;
use bandsync_storage::CheckpointStore;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters across all sessions run by an engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Sessions started.
    pub sessions_started: u64,
    /// Sessions that committed.
    pub sessions_succeeded: u64,
    /// Sessions that failed or were aborted.
    pub sessions_failed: u64,
    /// Starts rejected because a fetch was running.
    pub rejected_starts: u64,
    /// Payload bytes received.
    pub bytes_received: u64,
    /// Packet counter gaps tolerated.
    pub sequence_gaps: u64,
    /// Last failure message.
    pub last_error: Option<String>,
}

/// Runs activity fetches, at most one per device.
///
/// Sessions are pure state machines. The engine feeds them transport events
/// and carries out the [`SessionAction`]s they return, outside the session
/// lock, so collaborators may take their time without blocking other
/// devices' sessions from being looked up.
///
/// Calls for one device take turns: a start, a delivered message or an abort
/// holds the device's turn until all of its actions, the commit included,
/// have run. An abort that arrives while data is being committed waits for
/// the commit and then finds the session finished. Collaborators must not
/// call back into the engine for the device they are serving.
pub struct FetchEngine<T: ChannelTransport, K: CheckpointStore, S: ActivitySink> {
    config: FetchConfig,
    transport: Arc<T>,
    checkpoints: Arc<K>,
    sink: Arc<S>,
    progress: Arc<dyn ProgressReporter>,
    busy: Arc<dyn BusyMarker>,
    sessions: Mutex<HashMap<String, FetchSession>>,
    outcomes: Mutex<HashMap<String, FetchOutcome>>,
    turns: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    stats: RwLock<FetchStats>,
}

impl<T: ChannelTransport, K: CheckpointStore, S: ActivitySink> FetchEngine<T, K, S> {
    /// Creates an engine. Progress goes to the log and busy markers to an
    /// internal [`BusyRegistry`] until replaced.
    pub fn new(config: FetchConfig, transport: Arc<T>, checkpoints: Arc<K>, sink: Arc<S>) -> Self {
        Self {
            config,
            transport,
            checkpoints,
            sink,
            progress: Arc::new(TracingProgressReporter),
            busy: Arc::new(BusyRegistry::new()),
            sessions: Mutex::new(HashMap::new()),
            outcomes: Mutex::new(HashMap::new()),
            turns: Mutex::new(HashMap::new()),
            stats: RwLock::new(FetchStats::default()),
        }
    }

    /// Replaces the progress reporter.
    pub fn with_progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress = reporter;
        self
    }

    /// Replaces the busy marker.
    pub fn with_busy_marker(mut self, busy: Arc<dyn BusyMarker>) -> Self {
        self.busy = busy;
        self
    }

    /// Engine configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// The transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// The checkpoint store.
    pub fn checkpoints(&self) -> &Arc<K> {
        &self.checkpoints
    }

    /// The activity sink.
    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    /// Starts a fetch from the device's checkpoint, or from the lookback
    /// window if it has none.
    ///
    /// Returns the session state after the start actions ran: normally
    /// `AwaitingMetadata`, `Failed` if the transport refused the command.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ConcurrentFetchRejected`] if a fetch is already
    /// running for the device. The running session is not touched.
    pub fn start_fetch(&self, device_id: &str, profile: &DeviceProfile) -> SyncResult<FetchState> {
        self.start_fetch_at(device_id, profile, Utc::now())
    }

    /// [`start_fetch`](Self::start_fetch) with an explicit clock reading.
    pub fn start_fetch_at(
        &self,
        device_id: &str,
        profile: &DeviceProfile,
        now: DateTime<Utc>,
    ) -> SyncResult<FetchState> {
        let turn = self.turn(device_id);
        let _turn = turn.lock();

        let actions = {
            let mut sessions = self.sessions.lock();
            if sessions.contains_key(device_id) {
                self.stats.write().rejected_starts += 1;
                warn!(device_id, "fetch already in progress, rejecting start");
                return Err(SyncError::ConcurrentFetchRejected {
                    device_id: device_id.to_string(),
                });
            }

            let since = self
                .checkpoints
                .get_or_lookback(device_id, now, self.config.lookback);
            let mut session = FetchSession::new(device_id, profile.clone(), self.config.clone());
            let actions = session.start(since)?;
            sessions.insert(device_id.to_string(), session);
            actions
        };

        self.stats.write().sessions_started += 1;
        if let Some(outcome) = self.run(device_id, actions) {
            return Ok(outcome.state());
        }
        self.state(device_id)
            .or_else(|| self.last_outcome(device_id).map(|outcome| outcome.state()))
            .ok_or_else(|| SyncError::NoActiveSession {
                device_id: device_id.to_string(),
            })
    }

    /// Delivers a control-channel message. Returns the outcome if it ended
    /// the session.
    pub fn handle_control_message(&self, device_id: &str, bytes: &[u8]) -> Option<FetchOutcome> {
        self.dispatch(device_id, |session| session.on_control_message(bytes))
    }

    /// Delivers a data-channel message. Returns the outcome if it ended the
    /// session.
    pub fn handle_data_chunk(&self, device_id: &str, bytes: &[u8]) -> Option<FetchOutcome> {
        self.dispatch(device_id, |session| session.on_data_chunk(bytes))
    }

    /// Aborts the device's fetch, releasing its channels and busy marker.
    ///
    /// Waits for a commit already in progress; if that commit ends the
    /// session, there is nothing left to abort.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoActiveSession`] if no fetch is running.
    pub fn abort(&self, device_id: &str, reason: &str) -> SyncResult<FetchOutcome> {
        self.dispatch(device_id, |session| session.abort(reason))
            .ok_or_else(|| SyncError::NoActiveSession {
                device_id: device_id.to_string(),
            })
    }

    /// State of the device's running session.
    pub fn state(&self, device_id: &str) -> Option<FetchState> {
        self.sessions.lock().get(device_id).map(FetchSession::state)
    }

    /// Returns true while a fetch is running for the device.
    pub fn is_active(&self, device_id: &str) -> bool {
        self.sessions.lock().contains_key(device_id)
    }

    /// Devices with a running fetch.
    pub fn active_devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.sessions.lock().keys().cloned().collect();
        devices.sort();
        devices
    }

    /// Outcome of the device's most recent finished session.
    pub fn last_outcome(&self, device_id: &str) -> Option<FetchOutcome> {
        self.outcomes.lock().get(device_id).cloned()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> FetchStats {
        self.stats.read().clone()
    }

    fn dispatch<F>(&self, device_id: &str, f: F) -> Option<FetchOutcome>
    where
        F: FnOnce(&mut FetchSession) -> Vec<SessionAction>,
    {
        let turn = self.turn(device_id);
        let _turn = turn.lock();

        let actions = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(device_id) {
                Some(session) => f(session),
                None => {
                    debug!(device_id, "no fetch running, message ignored");
                    return None;
                }
            }
        };
        self.run(device_id, actions)
    }

    fn turn(&self, device_id: &str) -> Arc<Mutex<()>> {
        self.turns
            .lock()
            .entry(device_id.to_string())
            .or_default()
            .clone()
    }

    fn with_session<F>(&self, device_id: &str, f: F) -> Vec<SessionAction>
    where
        F: FnOnce(&mut FetchSession) -> Vec<SessionAction>,
    {
        self.sessions
            .lock()
            .get_mut(device_id)
            .map(f)
            .unwrap_or_default()
    }

    fn run(&self, device_id: &str, actions: Vec<SessionAction>) -> Option<FetchOutcome> {
        let mut queue = VecDeque::from(actions);
        while let Some(action) = queue.pop_front() {
            match self.execute(device_id, action) {
                Ok(follow_up) => queue.extend(follow_up),
                Err(error) => {
                    let cleanup = self
                        .with_session(device_id, |session| {
                            session.fail(error.failure_kind(), error.to_string())
                        });
                    if cleanup.is_empty() {
                        // Session already terminal; keep releasing what is left.
                        warn!(device_id, %error, "cleanup step failed");
                    } else {
                        queue.clear();
                        queue.extend(cleanup);
                    }
                }
            }
        }
        self.reap(device_id)
    }

    fn execute(&self, device_id: &str, action: SessionAction) -> SyncResult<Vec<SessionAction>> {
        match action {
            SessionAction::Subscribe {
                channel,
                id,
                enabled,
            } => {
                debug!(device_id, %channel, enabled, "set notifications");
                self.transport.set_notifications(device_id, id, enabled)?;
            }
            SessionAction::SendCommand { channel, bytes } => {
                debug!(device_id, command = %hex::encode(&bytes), "send command");
                self.transport.send_command(device_id, channel, &bytes)?;
            }
            SessionAction::MarkBusy { reason } => self.busy.mark_busy(device_id, &reason),
            SessionAction::ClearBusy => self.busy.clear_busy(device_id),
            SessionAction::Progress {
                percent,
                message,
                ongoing,
            } => self.progress.report(device_id, percent, &message, ongoing),
            SessionAction::Commit(request) => return self.commit(device_id, request),
        }
        Ok(Vec::new())
    }

    /// Data first, checkpoint second: a failed data commit must leave the
    /// checkpoint where it was.
    fn commit(&self, device_id: &str, request: CommitRequest) -> SyncResult<Vec<SessionAction>> {
        self.sink
            .commit(device_id, &request.data, request.range_start)
            .map_err(|e| match e {
                SyncError::StorageCommitFailure(_) => e,
                other => SyncError::StorageCommitFailure(other.to_string()),
            })?;
        self.checkpoints.set(device_id, request.checkpoint)?;
        info!(
            device_id,
            bytes = request.data.len(),
            checkpoint = %request.checkpoint,
            "committed activity data"
        );
        Ok(self.with_session(device_id, FetchSession::commit_succeeded))
    }

    fn reap(&self, device_id: &str) -> Option<FetchOutcome> {
        let session = {
            let mut sessions = self.sessions.lock();
            if !sessions
                .get(device_id)
                .is_some_and(|session| session.state().is_terminal())
            {
                return None;
            }
            sessions.remove(device_id)?
        };
        let outcome = session.outcome()?;

        {
            let mut stats = self.stats.write();
            stats.bytes_received += session.bytes_received();
            stats.sequence_gaps += session.sequence_gaps();
            match &outcome.result {
                Ok(_) => {
                    stats.sessions_succeeded += 1;
                    stats.last_error = None;
                }
                Err(failure) => {
                    stats.sessions_failed += 1;
                    stats.last_error = Some(failure.to_string());
                }
            }
        }

        match &outcome.result {
            Ok(summary) => info!(
                device_id,
                bytes = summary.bytes_received,
                chunks = summary.chunk_count,
                gaps = summary.sequence_gaps,
                checkpoint = %summary.checkpoint,
                "fetch finished"
            ),
            Err(failure) => info!(device_id, %failure, "fetch ended without commit"),
        }

        self.outcomes
            .lock()
            .insert(device_id.to_string(), outcome.clone());
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MemoryActivitySink;
    use crate::transport::MockTransport;
    use bandsync_protocol::{DeviceFamily, CHARACTERISTIC_FETCH};
    use bandsync_storage::InMemoryCheckpointStore;

    fn engine() -> FetchEngine<MockTransport, InMemoryCheckpointStore, MemoryActivitySink> {
        FetchEngine::new(
            FetchConfig::default(),
            Arc::new(MockTransport::new()),
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(MemoryActivitySink::new()),
        )
    }

    #[test]
    fn test_engine_creation() {
        let engine = engine();
        assert!(engine.active_devices().is_empty());
        assert_eq!(engine.stats(), FetchStats::default());
    }

    #[test]
    fn test_start_sends_fetch_command() {
        let engine = engine();
        let profile = DeviceProfile::for_family(DeviceFamily::MiBand2);
        let state = engine.start_fetch("dev", &profile).unwrap();
        assert_eq!(state, FetchState::AwaitingMetadata);

        let commands = engine.transport().commands("dev");
        assert_eq!(commands.len(), 1);
        assert_eq!(&commands[0][..2], &[0x01, 0x01]);
        assert!(engine.transport().is_enabled("dev", CHARACTERISTIC_FETCH));
        assert_eq!(engine.stats().sessions_started, 1);
    }

    #[test]
    fn test_messages_without_session_are_ignored() {
        let engine = engine();
        assert!(engine.handle_data_chunk("dev", &[0x00, 1, 2]).is_none());
        assert!(engine.handle_control_message("dev", &[0x10, 0x02, 0x01]).is_none());
        assert!(engine.transport().calls().is_empty());
    }

    #[test]
    fn test_abort_without_session() {
        let engine = engine();
        let err = engine.abort("dev", "user").unwrap_err();
        assert!(matches!(err, SyncError::NoActiveSession { .. }));
    }

    #[test]
    fn test_failed_start_reports_recorded_outcome() {
        let engine = engine();
        engine.transport().set_fail_commands(true);
        let profile = DeviceProfile::for_family(DeviceFamily::MiBand2);

        let state = engine.start_fetch("dev", &profile).unwrap();
        assert_eq!(state, FetchState::Failed);
        assert_eq!(engine.state("dev"), None);
        assert_eq!(engine.last_outcome("dev").unwrap().state(), state);
    }

    #[test]
    fn test_abort_records_outcome() {
        let engine = engine();
        let profile = DeviceProfile::for_family(DeviceFamily::MiBand3);
        engine.start_fetch("dev", &profile).unwrap();

        let outcome = engine.abort("dev", "user cancelled").unwrap();
        assert_eq!(outcome.state(), FetchState::Failed);
        assert!(!engine.is_active("dev"));
        assert_eq!(engine.last_outcome("dev"), Some(outcome));
        assert_eq!(engine.stats().sessions_failed, 1);
    }
}
