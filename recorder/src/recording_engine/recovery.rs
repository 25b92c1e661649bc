use anyhow::Context;
use crates::domain::{
    entities::{recordings::RecordingEntity, streams::StreamEntity},
    repositories::{recordings::RecordingRepository, streams::StreamLookup},
    value_objects::enums::{failure_reasons::FailureReason, recording_statuses::RecordingStatus},
};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    error::EngineError,
    finalization::{FinalizationPipeline, FinalizationRequest, FinalizationSource},
    launcher::CaptureOptions,
    rotation::{RecordingSession, RotationController},
    segments::{RecordingPaths, SegmentInfo, adopt_single_file, file_size, list_segments},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Resumed,
    Finalized,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryReport {
    pub resumed: Vec<Uuid>,
    pub finalized: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

impl RecoveryReport {
    fn record(&mut self, recording_id: Uuid, action: RecoveryAction) {
        match action {
            RecoveryAction::Resumed => self.resumed.push(recording_id),
            RecoveryAction::Finalized => self.finalized.push(recording_id),
            RecoveryAction::Failed => self.failed.push(recording_id),
        }
    }
}

/// Output a crashed host left behind for one recording.
#[derive(Debug, Default)]
struct Artifacts {
    single_file: Option<PathBuf>,
    segment_dir: PathBuf,
    segments: Vec<(u32, PathBuf)>,
    has_data: bool,
}

impl Artifacts {
    fn finalization_request(&self, recording: &RecordingEntity, paths: &RecordingPaths) -> FinalizationRequest {
        let deliverable_path = paths.single_file_path(recording.stream_id, recording.id);
        let source = match (&self.single_file, self.segments.is_empty()) {
            (Some(output_path), true) => FinalizationSource::SingleFile {
                output_path: output_path.clone(),
            },
            _ => FinalizationSource::Segmented {
                segment_dir: self.segment_dir.clone(),
                segments: self
                    .single_file
                    .iter()
                    .cloned()
                    .chain(self.segments.iter().map(|(_, path)| path.clone()))
                    .collect(),
            },
        };

        FinalizationRequest {
            recording_id: recording.id,
            stream_id: recording.stream_id,
            deliverable_path,
            source,
        }
    }
}

/// Reconciles recordings a previous run left in progress. Runs once before the engine
/// accepts new recordings.
pub struct StartupRecoveryService {
    recordings: Arc<dyn RecordingRepository + Send + Sync>,
    streams: Option<Arc<dyn StreamLookup + Send + Sync>>,
    rotation: Arc<RotationController>,
    finalization: Arc<FinalizationPipeline>,
}

#[derive(Default)]
pub struct StartupRecoveryServiceBuilder {
    recordings: Option<Arc<dyn RecordingRepository + Send + Sync>>,
    streams: Option<Arc<dyn StreamLookup + Send + Sync>>,
    rotation: Option<Arc<RotationController>>,
    finalization: Option<Arc<FinalizationPipeline>>,
}

impl StartupRecoveryServiceBuilder {
    pub fn recordings(mut self, recordings: Arc<dyn RecordingRepository + Send + Sync>) -> Self {
        self.recordings = Some(recordings);
        self
    }

    pub fn streams(mut self, streams: Arc<dyn StreamLookup + Send + Sync>) -> Self {
        self.streams = Some(streams);
        self
    }

    pub fn rotation(mut self, rotation: Arc<RotationController>) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn finalization(mut self, finalization: Arc<FinalizationPipeline>) -> Self {
        self.finalization = Some(finalization);
        self
    }

    /// A missing stream lookup is tolerated here; each recording then fails on its own.
    pub fn build(self) -> Result<StartupRecoveryService, EngineError> {
        if self.streams.is_none() {
            warn!("recovery: built without a stream lookup; recordings cannot be resumed");
        }

        Ok(StartupRecoveryService {
            recordings: self
                .recordings
                .ok_or(EngineError::MissingDependency("recording repository"))?,
            streams: self.streams,
            rotation: self
                .rotation
                .ok_or(EngineError::MissingDependency("rotation controller"))?,
            finalization: self
                .finalization
                .ok_or(EngineError::MissingDependency("finalization pipeline"))?,
        })
    }
}

impl StartupRecoveryService {
    pub fn builder() -> StartupRecoveryServiceBuilder {
        StartupRecoveryServiceBuilder::default()
    }

    pub async fn run(&self) -> Result<RecoveryReport, EngineError> {
        let in_progress = self
            .recordings
            .list_by_status(RecordingStatus::Recording)
            .await
            .context("failed to load recordings left in progress")?;
        let stopped = self
            .recordings
            .list_by_status(RecordingStatus::Stopped)
            .await
            .context("failed to load stopped recordings")?;

        info!(
            in_progress = in_progress.len(),
            stopped = stopped.len(),
            "recovery: reconciling recordings from the previous run"
        );

        let mut report = RecoveryReport::default();
        for recording in in_progress {
            let action = self.recover_in_progress(&recording).await;
            info!(recording_id = %recording.id, action = ?action, "recovery: recording reconciled");
            report.record(recording.id, action);
        }
        // Stopped rows were mid-finalization; they are never resumed.
        for recording in stopped {
            let artifacts = self.discover(&recording).await;
            let action = self.finalize_or_fail(&recording, &artifacts, false).await;
            info!(recording_id = %recording.id, action = ?action, "recovery: stopped recording reconciled");
            report.record(recording.id, action);
        }

        info!(
            resumed = report.resumed.len(),
            finalized = report.finalized.len(),
            failed = report.failed.len(),
            "recovery: finished"
        );
        Ok(report)
    }

    async fn recover_in_progress(&self, recording: &RecordingEntity) -> RecoveryAction {
        let Some(streams) = &self.streams else {
            return self
                .fail(
                    recording,
                    FailureReason::RecoveryDependencyMissing,
                    "stream lookup is not available",
                )
                .await;
        };

        let artifacts = self.discover(recording).await;

        let stream = match streams.find_stream(recording.stream_id).await {
            Ok(stream) => stream,
            Err(e) => {
                return self
                    .fail(
                        recording,
                        FailureReason::RecoveryLookupFailed,
                        &format!("stream lookup failed: {:#}", e),
                    )
                    .await;
            }
        };
        let Some(stream) = stream else {
            return self.finalize_or_fail(recording, &artifacts, true).await;
        };

        let live = match streams.is_live(stream.id).await {
            Ok(live) => live,
            Err(e) => {
                warn!(
                    recording_id = %recording.id,
                    error = %e,
                    "recovery: live check failed, treating stream as offline"
                );
                false
            }
        };

        if live {
            match self.resume(recording, stream, &artifacts).await {
                Ok(()) => return RecoveryAction::Resumed,
                Err(e) => {
                    warn!(
                        recording_id = %recording.id,
                        error = %e,
                        "recovery: could not resume capture"
                    );
                    if !artifacts.has_data {
                        return self
                            .fail(recording, FailureReason::CaptureRestartFailed, &e.to_string())
                            .await;
                    }
                }
            }
        }

        self.finalize_or_fail(recording, &artifacts, false).await
    }

    async fn resume(
        &self,
        recording: &RecordingEntity,
        stream: StreamEntity,
        artifacts: &Artifacts,
    ) -> Result<(), EngineError> {
        let paths = self.rotation.paths();
        let quality = stream.quality.clone();
        let options = CaptureOptions {
            proxy: stream.proxy.clone(),
        };

        let session = if !artifacts.has_data {
            let output_path = recording
                .recording_path
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(|| paths.single_file_path(stream.id, recording.id));
            RecordingSession::single_file(recording.id, stream, quality, options, output_path)
        } else {
            let mut segments = match (&artifacts.single_file, artifacts.segments.last()) {
                (Some(single_file), None) => {
                    adopt_single_file(paths, single_file, &artifacts.segment_dir).await
                }
                (single_file, last) => SegmentInfo::from_existing(
                    artifacts.segment_dir.clone(),
                    last.map(|(number, _)| *number).unwrap_or(0),
                    single_file
                        .iter()
                        .cloned()
                        .chain(artifacts.segments.iter().map(|(_, path)| path.clone()))
                        .collect(),
                ),
            };
            segments.advance(paths);
            RecordingSession::segmented(recording.id, stream, quality, options, segments)
        };

        self.rotation.begin(session).await?;
        Ok(())
    }

    async fn finalize_or_fail(
        &self,
        recording: &RecordingEntity,
        artifacts: &Artifacts,
        stream_missing: bool,
    ) -> RecoveryAction {
        if !artifacts.has_data {
            let reason = if stream_missing {
                FailureReason::RecoveryStreamMissing
            } else {
                FailureReason::RecoveryNoArtifacts
            };
            return self
                .fail(recording, reason, "no recorded output found on disk")
                .await;
        }

        let request = artifacts.finalization_request(recording, self.rotation.paths());
        match self.finalization.finalize(request).await {
            Ok(_) => RecoveryAction::Finalized,
            Err(EngineError::FinalizationFailed { .. }) => RecoveryAction::Failed,
            Err(e) => {
                self.fail(recording, FailureReason::RecoveryFinalizeFailed, &e.to_string())
                    .await
            }
        }
    }

    async fn discover(&self, recording: &RecordingEntity) -> Artifacts {
        let paths = self.rotation.paths();
        let segment_dir = paths.segment_dir(recording.stream_id, recording.id);

        let mut candidates: Vec<PathBuf> = recording.recording_path.iter().map(PathBuf::from).collect();
        let default_single = paths.single_file_path(recording.stream_id, recording.id);
        if !candidates.contains(&default_single) {
            candidates.push(default_single);
        }

        let mut single_file = None;
        for candidate in candidates {
            if candidate.starts_with(&segment_dir) {
                continue;
            }
            if file_size(&candidate).await > 0 {
                single_file = Some(candidate);
                break;
            }
        }

        let segments = match list_segments(&segment_dir).await {
            Ok(segments) => segments,
            Err(e) => {
                error!(
                    recording_id = %recording.id,
                    error = %e,
                    "recovery: could not list segments"
                );
                Vec::new()
            }
        };

        // A file outside the segment directory only stands in for segment 1 while
        // segment_001 is absent. Otherwise it is a deliverable whose completion was
        // never recorded, and the segments are still the source of truth.
        if segments.iter().any(|(number, _)| *number == 1) {
            if let Some(stale) = single_file.take() {
                warn!(
                    recording_id = %recording.id,
                    path = %stale.display(),
                    "recovery: ignoring unrecorded deliverable, rebuilding it from segments"
                );
            }
        }

        let mut has_data = single_file.is_some();
        for (_, segment) in &segments {
            if has_data {
                break;
            }
            has_data = file_size(segment).await > 0;
        }

        Artifacts {
            single_file,
            segment_dir,
            segments,
            has_data,
        }
    }

    async fn fail(
        &self,
        recording: &RecordingEntity,
        reason: FailureReason,
        message: &str,
    ) -> RecoveryAction {
        self.finalization
            .fail_recording(recording.id, recording.stream_id, reason, message)
            .await;
        RecoveryAction::Failed
    }
}
