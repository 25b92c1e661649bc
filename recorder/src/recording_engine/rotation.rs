use crates::domain::{entities::streams::StreamEntity, repositories::streams::StreamLookup};
use serde::Serialize;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::{sync::Mutex as AsyncMutex, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    error::EngineError,
    finalization::{FinalizationOutcome, FinalizationPipeline, FinalizationRequest, FinalizationSource},
    launcher::CaptureOptions,
    process_handle::{Liveness, ProcessInfo},
    segments::{RecordingPaths, RotationThresholds, RotationTrigger, SegmentInfo, adopt_single_file, file_size},
    supervisor::{CaptureSupervisor, process_id_for},
};

#[derive(Debug, Clone)]
pub enum CaptureMode {
    SingleFile { output_path: PathBuf, started: Instant },
    Segmented(SegmentInfo),
}

/// Everything needed to (re)start capture for one recording.
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub recording_id: Uuid,
    pub stream: StreamEntity,
    pub quality: String,
    pub options: CaptureOptions,
    pub mode: CaptureMode,
    closed: bool,
}

impl RecordingSession {
    pub fn single_file(
        recording_id: Uuid,
        stream: StreamEntity,
        quality: String,
        options: CaptureOptions,
        output_path: PathBuf,
    ) -> Self {
        Self {
            recording_id,
            stream,
            quality,
            options,
            mode: CaptureMode::SingleFile {
                output_path,
                started: Instant::now(),
            },
            closed: false,
        }
    }

    pub fn segmented(
        recording_id: Uuid,
        stream: StreamEntity,
        quality: String,
        options: CaptureOptions,
        segments: SegmentInfo,
    ) -> Self {
        Self {
            recording_id,
            stream,
            quality,
            options,
            mode: CaptureMode::Segmented(segments),
            closed: false,
        }
    }

    pub fn process_id(&self) -> String {
        process_id_for(self.stream.id)
    }

    pub fn current_output(&self) -> &Path {
        match &self.mode {
            CaptureMode::SingleFile { output_path, .. } => output_path,
            CaptureMode::Segmented(info) => &info.current_segment_path,
        }
    }

    pub fn segment_count(&self) -> u32 {
        match &self.mode {
            CaptureMode::SingleFile { .. } => 0,
            CaptureMode::Segmented(info) => info.segment_count,
        }
    }

    fn elapsed(&self) -> Duration {
        match &self.mode {
            CaptureMode::SingleFile { started, .. } => started.elapsed(),
            CaptureMode::Segmented(info) => info.elapsed(),
        }
    }

    fn finalization_request(&self, paths: &RecordingPaths) -> FinalizationRequest {
        let source = match &self.mode {
            CaptureMode::SingleFile { output_path, .. } => FinalizationSource::SingleFile {
                output_path: output_path.clone(),
            },
            CaptureMode::Segmented(info) => FinalizationSource::Segmented {
                segment_dir: info.segment_dir.clone(),
                segments: info.segments().to_vec(),
            },
        };

        FinalizationRequest {
            recording_id: self.recording_id,
            stream_id: self.stream.id,
            deliverable_path: paths.single_file_path(self.stream.id, self.recording_id),
            source,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionSnapshot {
    pub recording_id: Uuid,
    pub stream_id: Uuid,
    pub process_id: String,
    pub segment_count: u32,
    pub current_output: PathBuf,
    pub alive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    StreamEnded,
    UserStopped,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStep {
    Continue,
    Finished,
}

#[derive(Debug, Clone, Copy)]
pub struct RotationSettings {
    pub thresholds: RotationThresholds,
    pub monitor_interval: Duration,
    pub grace_period: Duration,
}

struct ActiveSession {
    session: Arc<AsyncMutex<RecordingSession>>,
    cancel: CancellationToken,
}

/// Owns active recordings: starts their capture, watches them, rolls them onto new
/// segments and hands them to finalization when they end.
pub struct RotationController {
    supervisor: Arc<CaptureSupervisor>,
    streams: Arc<dyn StreamLookup + Send + Sync>,
    finalization: Arc<FinalizationPipeline>,
    paths: RecordingPaths,
    settings: RotationSettings,
    sessions: Mutex<HashMap<String, ActiveSession>>,
}

impl RotationController {
    pub fn new(
        supervisor: Arc<CaptureSupervisor>,
        streams: Arc<dyn StreamLookup + Send + Sync>,
        finalization: Arc<FinalizationPipeline>,
        paths: RecordingPaths,
        settings: RotationSettings,
    ) -> Self {
        Self {
            supervisor,
            streams,
            finalization,
            paths,
            settings,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn paths(&self) -> &RecordingPaths {
        &self.paths
    }

    /// Starts capture for `session` and spawns its monitor loop.
    pub async fn begin(
        self: &Arc<Self>,
        session: RecordingSession,
    ) -> Result<ProcessInfo, EngineError> {
        let process_id = session.process_id();
        if self.is_active(&process_id) {
            return Err(EngineError::ProcessAlreadyRunning { process_id });
        }

        let info = self
            .supervisor
            .start(
                &session.stream,
                &session.quality,
                session.current_output(),
                session.options.clone(),
            )
            .await?;

        let cancel = CancellationToken::new();
        let recording_id = session.recording_id;
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                process_id.clone(),
                ActiveSession {
                    session: Arc::new(AsyncMutex::new(session)),
                    cancel: cancel.clone(),
                },
            );

        tokio::spawn(Arc::clone(self).monitor(process_id.clone(), cancel));

        info!(
            process_id = %process_id,
            recording_id = %recording_id,
            output_path = %info.output_path.display(),
            "rotation: recording session started"
        );
        Ok(info)
    }

    pub fn is_active(&self, process_id: &str) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(process_id)
    }

    pub async fn active_sessions(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<_> = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|active| Arc::clone(&active.session))
            .collect();

        let mut snapshots = Vec::with_capacity(sessions.len());
        for session in sessions {
            let session = session.lock().await;
            let process_id = session.process_id();
            snapshots.push(SessionSnapshot {
                recording_id: session.recording_id,
                stream_id: session.stream.id,
                alive: self.supervisor.is_alive(&process_id),
                process_id,
                segment_count: session.segment_count(),
                current_output: session.current_output().to_path_buf(),
            });
        }
        snapshots
    }

    /// Rotates immediately, regardless of thresholds. Returns the new segment number.
    pub async fn rotate(&self, process_id: &str) -> Result<u32, EngineError> {
        let session = self
            .session(process_id)
            .ok_or_else(|| EngineError::NotFound(format!("recording session {}", process_id)))?;
        let mut session = session.lock().await;
        if session.closed {
            return Err(EngineError::NotFound(format!("recording session {}", process_id)));
        }
        self.rotate_locked(&mut session, RotationTrigger::Manual).await
    }

    /// One monitor tick: end the recording once the stream is offline, rotate on
    /// thresholds, or recover from an unexpected exit.
    pub async fn check(&self, process_id: &str) -> Result<MonitorStep, EngineError> {
        let Some(session) = self.session(process_id) else {
            return Ok(MonitorStep::Finished);
        };
        let mut session = session.lock().await;
        if session.closed {
            return Ok(MonitorStep::Finished);
        }

        let liveness = self.supervisor.liveness(process_id);
        if liveness == Some(Liveness::Alive) {
            // Capture tools can hang on a dead stream instead of exiting.
            if !self.stream_is_live(&session, process_id).await {
                info!(
                    process_id = %process_id,
                    recording_id = %session.recording_id,
                    "rotation: stream went offline while capture was still running"
                );
                drop(session);
                self.end(process_id, EndReason::StreamEnded).await?;
                return Ok(MonitorStep::Finished);
            }

            let size = file_size(session.current_output()).await;
            if let Some(trigger) = self.settings.thresholds.evaluate(session.elapsed(), size) {
                self.rotate_locked(&mut session, trigger).await?;
            }
            return Ok(MonitorStep::Continue);
        }

        let diagnostics = self.supervisor.diagnostics(process_id);
        warn!(
            process_id = %process_id,
            recording_id = %session.recording_id,
            liveness = ?liveness,
            diagnostics = diagnostics.as_deref().unwrap_or_default(),
            "rotation: capture process is not running"
        );

        if self.stream_is_live(&session, process_id).await {
            self.rotate_locked(&mut session, RotationTrigger::ProcessExited)
                .await?;
            return Ok(MonitorStep::Continue);
        }

        drop(session);
        self.end(process_id, EndReason::StreamEnded).await?;
        Ok(MonitorStep::Finished)
    }

    /// Stops capture and finalizes. Returns `None` if the recording is not active, so
    /// repeated calls are harmless.
    pub async fn end(
        &self,
        process_id: &str,
        reason: EndReason,
    ) -> Result<Option<FinalizationOutcome>, EngineError> {
        let active = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(process_id);
        let Some(active) = active else {
            debug!(process_id = %process_id, "rotation: end requested for inactive recording");
            return Ok(None);
        };
        active.cancel.cancel();

        // Waits for an in-flight rotation to finish before the final stop.
        let mut session = active.session.lock().await;
        session.closed = true;

        let stop = self.supervisor.stop(process_id, None).await;
        info!(
            process_id = %process_id,
            recording_id = %session.recording_id,
            reason = ?reason,
            stop_outcome = ?stop,
            segment_count = session.segment_count(),
            "rotation: recording ended"
        );

        if reason == EndReason::UserStopped {
            if let Err(e) = self.finalization.mark_stopped(session.recording_id).await {
                warn!(
                    recording_id = %session.recording_id,
                    error = %e,
                    "rotation: could not mark recording stopped"
                );
            }
        }

        let request = session.finalization_request(&self.paths);
        drop(session);
        self.finalization.finalize(request).await.map(Some)
    }

    pub async fn end_all(&self, reason: EndReason) {
        let process_ids: Vec<String> = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();

        for process_id in process_ids {
            if let Err(e) = self.end(&process_id, reason).await {
                error!(process_id = %process_id, error = %e, "rotation: failed to end recording");
            }
        }
    }

    /// A failed lookup counts as live.
    async fn stream_is_live(&self, session: &RecordingSession, process_id: &str) -> bool {
        match self.streams.is_live(session.stream.id).await {
            Ok(live) => live,
            Err(e) => {
                warn!(
                    process_id = %process_id,
                    error = %e,
                    "rotation: live check failed, keeping the recording going"
                );
                true
            }
        }
    }

    fn session(&self, process_id: &str) -> Option<Arc<AsyncMutex<RecordingSession>>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(process_id)
            .map(|active| Arc::clone(&active.session))
    }

    async fn rotate_locked(
        &self,
        session: &mut RecordingSession,
        trigger: RotationTrigger,
    ) -> Result<u32, EngineError> {
        let process_id = session.process_id();

        // Whatever stopping reports, the segment number still advances.
        let stop = self
            .supervisor
            .stop(&process_id, Some(self.settings.grace_period))
            .await;
        info!(
            process_id = %process_id,
            recording_id = %session.recording_id,
            trigger = ?trigger,
            stop_outcome = ?stop,
            "rotation: previous capture process stopped"
        );

        let mut segments = match &session.mode {
            CaptureMode::SingleFile { output_path, .. } => {
                let segment_dir = self
                    .paths
                    .segment_dir(session.stream.id, session.recording_id);
                let adopted = adopt_single_file(&self.paths, output_path, &segment_dir).await;
                info!(
                    process_id = %process_id,
                    segment_dir = %segment_dir.display(),
                    "rotation: promoted recording to segmented mode"
                );
                adopted
            }
            CaptureMode::Segmented(info) => info.clone(),
        };
        let next_path = segments.advance(&self.paths);
        let segment_count = segments.segment_count;
        session.mode = CaptureMode::Segmented(segments);

        match self
            .supervisor
            .start(
                &session.stream,
                &session.quality,
                &next_path,
                session.options.clone(),
            )
            .await
        {
            Ok(_) => {
                info!(
                    process_id = %process_id,
                    segment_count,
                    output_path = %next_path.display(),
                    "rotation: capture moved to next segment"
                );
                Ok(segment_count)
            }
            Err(e) => {
                error!(
                    process_id = %process_id,
                    segment_count,
                    error = %e,
                    "rotation: failed to start next segment"
                );
                Err(e)
            }
        }
    }

    async fn monitor(self: Arc<Self>, process_id: String, cancel: CancellationToken) {
        debug!(process_id = %process_id, "rotation: monitor started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.monitor_interval) => {}
            }

            match self.check(&process_id).await {
                Ok(MonitorStep::Continue) => {}
                Ok(MonitorStep::Finished) => break,
                Err(e) => error!(process_id = %process_id, error = %e, "rotation: monitor tick failed"),
            }
        }
        debug!(process_id = %process_id, "rotation: monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        recording_engine::{process_registry::ProcessRegistry, testing::FakeLauncher},
        task_queue::queue::{BackgroundTaskQueue, TaskQueueSettings},
    };
    use chrono::Utc;
    use crates::domain::repositories::{
        event_bridge::{EventBridge, MockEventBridge},
        recordings::MockRecordingRepository,
        streams::MockStreamLookup,
    };
    use std::sync::atomic::{AtomicBool, Ordering};

    const KB: usize = 1024;

    struct Harness {
        controller: Arc<RotationController>,
        launcher: Arc<FakeLauncher>,
        supervisor: Arc<CaptureSupervisor>,
        stream: StreamEntity,
        recording_id: Uuid,
        paths: RecordingPaths,
        _root: tempfile::TempDir,
    }

    impl Harness {
        fn session(&self) -> RecordingSession {
            RecordingSession::single_file(
                self.recording_id,
                self.stream.clone(),
                "best".to_string(),
                CaptureOptions::default(),
                self.paths.single_file_path(self.stream.id, self.recording_id),
            )
        }

        fn process_id(&self) -> String {
            process_id_for(self.stream.id)
        }
    }

    fn stream() -> StreamEntity {
        let now = Utc::now();
        StreamEntity {
            id: Uuid::new_v4(),
            name: "someone".to_string(),
            url: "https://twitch.tv/someone".to_string(),
            quality: "best".to_string(),
            proxy: None,
            is_live: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn quiet_events() -> Arc<dyn EventBridge + Send + Sync> {
        let mut events = MockEventBridge::new();
        events.expect_emit().returning(|_| ());
        Arc::new(events)
    }

    fn accepting_repository() -> MockRecordingRepository {
        let mut recordings = MockRecordingRepository::new();
        recordings
            .expect_mark_finished()
            .returning(|id, _| Box::pin(async move { Ok(Some(id)) }));
        recordings
            .expect_mark_failed()
            .returning(|id, _| Box::pin(async move { Ok(Some(id)) }));
        recordings
    }

    fn harness(
        streams: MockStreamLookup,
        recordings: MockRecordingRepository,
        settings: RotationSettings,
    ) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let paths = RecordingPaths::new(root.path(), "ts");
        let launcher = Arc::new(FakeLauncher::writing(KB));
        let supervisor = Arc::new(CaptureSupervisor::new(
            Arc::new(ProcessRegistry::new()),
            launcher.clone(),
            Duration::from_millis(200),
        ));
        let task_queue =
            BackgroundTaskQueue::new(TaskQueueSettings::default(), HashMap::new(), quiet_events());
        let finalization = Arc::new(FinalizationPipeline::new(
            Arc::new(recordings),
            task_queue,
            quiet_events(),
            false,
        ));
        let controller = Arc::new(RotationController::new(
            Arc::clone(&supervisor),
            Arc::new(streams),
            finalization,
            paths.clone(),
            settings,
        ));

        Harness {
            controller,
            launcher,
            supervisor,
            stream: stream(),
            recording_id: Uuid::new_v4(),
            paths,
            _root: root,
        }
    }

    fn manual_settings() -> RotationSettings {
        RotationSettings {
            thresholds: RotationThresholds {
                max_duration: Duration::from_secs(3600),
                max_bytes: u64::MAX,
            },
            monitor_interval: Duration::from_secs(3600),
            grace_period: Duration::from_millis(200),
        }
    }

    fn fast_settings(max_bytes: u64) -> RotationSettings {
        RotationSettings {
            thresholds: RotationThresholds {
                max_duration: Duration::from_secs(3600),
                max_bytes,
            },
            monitor_interval: Duration::from_millis(20),
            grace_period: Duration::from_millis(200),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn rotation_with_externally_killed_process_still_advances() {
        let h = harness(MockStreamLookup::new(), accepting_repository(), manual_settings());
        h.controller.begin(h.session()).await.unwrap();
        h.launcher.control(0).die();

        let segment = h.controller.rotate(&h.process_id()).await.unwrap();

        assert_eq!(segment, 2);
        assert_eq!(h.launcher.launches(), 2);
        assert!(h.supervisor.is_alive(&h.process_id()));
        let segment_dir = h.paths.segment_dir(h.stream.id, h.recording_id);
        assert_eq!(file_size(&segment_dir.join("segment_001.ts")).await, KB as u64);
        assert_eq!(
            h.launcher.requests()[1].output_path,
            segment_dir.join("segment_002.ts")
        );
        assert_eq!(h.launcher.control(0).terminate_calls(), 0);
    }

    #[tokio::test]
    async fn each_rotation_advances_by_exactly_one() {
        let h = harness(MockStreamLookup::new(), accepting_repository(), manual_settings());
        h.controller.begin(h.session()).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(h.controller.rotate(&h.process_id()).await.unwrap());
        }

        assert_eq!(seen, vec![2, 3, 4]);
        let snapshot = h.controller.active_sessions().await;
        assert_eq!(snapshot[0].segment_count, 4);
        assert!(snapshot[0].alive);
    }

    #[tokio::test]
    async fn failed_replacement_start_is_returned_but_the_count_still_advances() {
        let h = harness(MockStreamLookup::new(), accepting_repository(), manual_settings());
        h.controller.begin(h.session()).await.unwrap();
        h.launcher.fail_launches(true);

        let err = h.controller.rotate(&h.process_id()).await.unwrap_err();
        assert!(matches!(err, EngineError::StartFailed { .. }));

        h.launcher.fail_launches(false);
        assert_eq!(h.controller.rotate(&h.process_id()).await.unwrap(), 3);
    }

    fn live_streams() -> MockStreamLookup {
        let mut streams = MockStreamLookup::new();
        streams
            .expect_is_live()
            .returning(|_| Box::pin(async { Ok(true) }));
        streams
    }

    #[tokio::test]
    async fn monitor_rotates_when_the_size_threshold_is_reached() {
        let h = harness(live_streams(), accepting_repository(), fast_settings(512));
        h.controller.begin(h.session()).await.unwrap();

        let launcher = Arc::clone(&h.launcher);
        wait_until(move || launcher.launches() >= 3).await;

        h.controller.end(&h.process_id(), EndReason::Shutdown).await.unwrap();
    }

    #[tokio::test]
    async fn dead_capture_on_a_live_stream_is_restarted_on_a_new_segment() {
        let h = harness(live_streams(), accepting_repository(), fast_settings(u64::MAX));
        h.controller.begin(h.session()).await.unwrap();

        h.launcher.control(0).die();
        let launcher = Arc::clone(&h.launcher);
        wait_until(move || launcher.launches() >= 2).await;

        assert!(h.controller.is_active(&h.process_id()));
        let snapshot = h.controller.active_sessions().await;
        assert_eq!(snapshot[0].segment_count, 2);
    }

    #[tokio::test]
    async fn dead_capture_on_an_offline_stream_finalizes_the_recording() {
        let completed = Arc::new(AtomicBool::new(false));
        let mut streams = MockStreamLookup::new();
        streams
            .expect_is_live()
            .returning(|_| Box::pin(async { Ok(false) }));
        let mut recordings = MockRecordingRepository::new();
        let flag = Arc::clone(&completed);
        recordings
            .expect_mark_finished()
            .withf(|_, changeset| changeset.status == "completed")
            .times(1)
            .returning(move |id, _| {
                flag.store(true, Ordering::SeqCst);
                Box::pin(async move { Ok(Some(id)) })
            });
        let h = harness(streams, recordings, fast_settings(u64::MAX));
        h.controller.begin(h.session()).await.unwrap();

        h.launcher.control(0).die();
        let flag = Arc::clone(&completed);
        wait_until(move || flag.load(Ordering::SeqCst)).await;

        assert!(!h.controller.is_active(&h.process_id()));
        assert_eq!(h.launcher.launches(), 1);
    }

    #[tokio::test]
    async fn running_capture_is_stopped_and_finalized_once_the_stream_goes_offline() {
        let completed = Arc::new(AtomicBool::new(false));
        let mut streams = MockStreamLookup::new();
        streams
            .expect_is_live()
            .returning(|_| Box::pin(async { Ok(false) }));
        let mut recordings = MockRecordingRepository::new();
        let flag = Arc::clone(&completed);
        recordings
            .expect_mark_finished()
            .withf(|_, changeset| changeset.status == "completed")
            .times(1)
            .returning(move |id, _| {
                flag.store(true, Ordering::SeqCst);
                Box::pin(async move { Ok(Some(id)) })
            });
        let h = harness(streams, recordings, fast_settings(u64::MAX));
        h.controller.begin(h.session()).await.unwrap();

        let flag = Arc::clone(&completed);
        wait_until(move || flag.load(Ordering::SeqCst)).await;

        assert!(!h.controller.is_active(&h.process_id()));
        assert_eq!(h.launcher.launches(), 1);
        assert!(h.launcher.control(0).terminate_calls() >= 1);
        assert!(h.supervisor.active_process_ids().is_empty());
    }

    #[tokio::test]
    async fn failed_live_check_keeps_a_running_capture_going() {
        let mut streams = MockStreamLookup::new();
        streams
            .expect_is_live()
            .returning(|_| Box::pin(async { Err(anyhow::anyhow!("timeout")) }));
        let mut recordings = MockRecordingRepository::new();
        recordings.expect_mark_finished().never();
        let h = harness(streams, recordings, manual_settings());
        h.controller.begin(h.session()).await.unwrap();

        let step = h.controller.check(&h.process_id()).await.unwrap();

        assert!(matches!(step, MonitorStep::Continue));
        assert!(h.controller.is_active(&h.process_id()));
        assert_eq!(h.launcher.launches(), 1);
    }

    #[tokio::test]
    async fn ending_twice_is_a_no_op_the_second_time() {
        let h = harness(MockStreamLookup::new(), accepting_repository(), manual_settings());
        h.controller.begin(h.session()).await.unwrap();

        let first = h
            .controller
            .end(&h.process_id(), EndReason::UserStopped)
            .await
            .unwrap();
        let second = h
            .controller
            .end(&h.process_id(), EndReason::UserStopped)
            .await
            .unwrap();

        assert_eq!(first.unwrap().size_bytes, KB as u64);
        assert!(second.is_none());
        assert!(h.supervisor.active_process_ids().is_empty());
        assert!(h.launcher.control(0).is_dead());
    }

    #[tokio::test]
    async fn begin_refuses_a_second_session_for_the_same_stream() {
        let h = harness(MockStreamLookup::new(), accepting_repository(), manual_settings());
        h.controller.begin(h.session()).await.unwrap();

        let err = h.controller.begin(h.session()).await.unwrap_err();

        assert!(matches!(err, EngineError::ProcessAlreadyRunning { .. }));
        assert_eq!(h.launcher.launches(), 1);
    }
}
