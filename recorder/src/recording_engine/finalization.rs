use anyhow::Context;
use chrono::Utc;
use crates::domain::{
    entities::recordings::{RecordingFailedEntity, RecordingFinishedEntity},
    repositories::{event_bridge::EventBridge, recordings::RecordingRepository},
    value_objects::{
        engine_events::EngineEvent,
        enums::{
            failure_reasons::FailureReason, recording_statuses::RecordingStatus,
            task_types::TaskType,
        },
        post_processing::PostProcessingPayload,
    },
};
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::error::EngineError;
use crate::task_queue::queue::BackgroundTaskQueue;

#[derive(Debug, Clone, PartialEq)]
pub enum FinalizationSource {
    SingleFile {
        output_path: PathBuf,
    },
    Segmented {
        segment_dir: PathBuf,
        segments: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalizationRequest {
    pub recording_id: Uuid,
    pub stream_id: Uuid,
    /// Where a segmented recording's concatenated output is written.
    pub deliverable_path: PathBuf,
    pub source: FinalizationSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalizationOutcome {
    pub recording_id: Uuid,
    pub recording_path: PathBuf,
    pub size_bytes: u64,
    /// Zero-byte or missing segments left out of the deliverable.
    pub skipped_segments: Vec<PathBuf>,
    pub task_ids: Vec<Uuid>,
}

struct Deliverable {
    path: PathBuf,
    size_bytes: u64,
    skipped_segments: Vec<PathBuf>,
}

struct Rejection {
    reason: FailureReason,
    message: String,
}

impl Rejection {
    fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

pub struct FinalizationPipeline {
    recordings: Arc<dyn RecordingRepository + Send + Sync>,
    task_queue: Arc<BackgroundTaskQueue>,
    events: Arc<dyn EventBridge + Send + Sync>,
    keep_segments: bool,
}

impl FinalizationPipeline {
    pub fn new(
        recordings: Arc<dyn RecordingRepository + Send + Sync>,
        task_queue: Arc<BackgroundTaskQueue>,
        events: Arc<dyn EventBridge + Send + Sync>,
        keep_segments: bool,
    ) -> Self {
        Self {
            recordings,
            task_queue,
            events,
            keep_segments,
        }
    }

    /// Moves a user-stopped recording out of `recording` while its output is finalized.
    pub async fn mark_stopped(&self, recording_id: Uuid) -> Result<(), EngineError> {
        let now = Utc::now();
        let changeset = RecordingFinishedEntity {
            status: RecordingStatus::Stopped.to_string(),
            end_time: Some(now),
            recording_path: None,
            updated_at: now,
        };
        self.recordings
            .mark_finished(recording_id, changeset)
            .await
            .context("failed to mark recording stopped")?;
        Ok(())
    }

    /// Produces the deliverable, marks the recording completed and queues post-processing.
    /// The capture process must already have been told to stop.
    pub async fn finalize(
        &self,
        request: FinalizationRequest,
    ) -> Result<FinalizationOutcome, EngineError> {
        info!(
            recording_id = %request.recording_id,
            stream_id = %request.stream_id,
            "finalization: started"
        );

        let deliverable = match self.produce_deliverable(&request).await {
            Ok(deliverable) => deliverable,
            Err(rejection) => {
                self.fail_recording(
                    request.recording_id,
                    request.stream_id,
                    rejection.reason,
                    &rejection.message,
                )
                .await;
                return Err(EngineError::FinalizationFailed {
                    recording_id: request.recording_id,
                    reason: rejection.reason,
                    message: rejection.message,
                });
            }
        };

        let recording_path = deliverable.path.to_string_lossy().into_owned();
        let now = Utc::now();
        let changeset = RecordingFinishedEntity {
            status: RecordingStatus::Completed.to_string(),
            end_time: Some(now),
            recording_path: Some(recording_path.clone()),
            updated_at: now,
        };
        let updated = self
            .recordings
            .mark_finished(request.recording_id, changeset)
            .await
            .context("failed to mark recording completed")?;

        let mut outcome = FinalizationOutcome {
            recording_id: request.recording_id,
            recording_path: deliverable.path.clone(),
            size_bytes: deliverable.size_bytes,
            skipped_segments: deliverable.skipped_segments,
            task_ids: Vec::new(),
        };

        if updated.is_none() {
            warn!(
                recording_id = %request.recording_id,
                "finalization: recording is already terminal; skipping post-processing"
            );
            return Ok(outcome);
        }

        if let FinalizationSource::Segmented {
            segment_dir,
            segments,
        } = &request.source
        {
            if !self.keep_segments {
                remove_segments(segment_dir, segments, &deliverable.path).await;
            }
        }

        let payload = PostProcessingPayload {
            recording_id: request.recording_id,
            stream_id: request.stream_id,
            recording_path: recording_path.clone(),
        };
        outcome.task_ids = self.enqueue_post_processing(&payload);

        self.events.emit(EngineEvent::recording_completed(
            request.recording_id,
            request.stream_id,
            &recording_path,
        ));

        info!(
            recording_id = %request.recording_id,
            recording_path = %recording_path,
            size_bytes = outcome.size_bytes,
            skipped_segments = outcome.skipped_segments.len(),
            tasks = outcome.task_ids.len(),
            "finalization: recording completed"
        );
        Ok(outcome)
    }

    /// Marks a recording failed and notifies the bridge. Repository errors are logged only.
    pub async fn fail_recording(
        &self,
        recording_id: Uuid,
        stream_id: Uuid,
        reason: FailureReason,
        message: &str,
    ) {
        error!(
            recording_id = %recording_id,
            failure_reason = %reason,
            error = %message,
            "finalization: recording failed"
        );

        let now = Utc::now();
        let changeset = RecordingFailedEntity {
            status: RecordingStatus::Failed.to_string(),
            end_time: Some(now),
            error_message: Some(message.to_string()),
            failure_reason: Some(reason.to_string()),
            failure_timestamp: Some(now),
            updated_at: now,
        };

        match self.recordings.mark_failed(recording_id, changeset).await {
            Ok(Some(_)) => {}
            Ok(None) => warn!(
                recording_id = %recording_id,
                "finalization: recording was already terminal when marking failed"
            ),
            Err(e) => error!(
                recording_id = %recording_id,
                error = %e,
                "finalization: failed to persist failure"
            ),
        }

        self.events.emit(EngineEvent::recording_failed(
            recording_id,
            stream_id,
            &reason.to_string(),
            message,
        ));
    }

    fn enqueue_post_processing(&self, payload: &PostProcessingPayload) -> Vec<Uuid> {
        let value = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                error!(
                    recording_id = %payload.recording_id,
                    error = %e,
                    "finalization: could not encode post-processing payload"
                );
                return Vec::new();
            }
        };

        TaskType::POST_PROCESSING
            .iter()
            .map(|task_type| self.task_queue.enqueue(*task_type, value.clone()))
            .collect()
    }

    async fn produce_deliverable(
        &self,
        request: &FinalizationRequest,
    ) -> Result<Deliverable, Rejection> {
        match &request.source {
            FinalizationSource::SingleFile { output_path } => verify_single_file(output_path).await,
            FinalizationSource::Segmented { segments, .. } => {
                concatenate_segments(request.recording_id, segments, &request.deliverable_path)
                    .await
            }
        }
    }
}

async fn verify_single_file(output_path: &Path) -> Result<Deliverable, Rejection> {
    let metadata = tokio::fs::metadata(output_path).await.map_err(|e| {
        Rejection::new(
            FailureReason::DeliverableMissing,
            format!("output {} is not readable: {}", output_path.display(), e),
        )
    })?;

    if metadata.len() == 0 {
        return Err(Rejection::new(
            FailureReason::EmptyDeliverable,
            format!("output {} is empty", output_path.display()),
        ));
    }

    Ok(Deliverable {
        path: output_path.to_path_buf(),
        size_bytes: metadata.len(),
        skipped_segments: Vec::new(),
    })
}

async fn concatenate_segments(
    recording_id: Uuid,
    segments: &[PathBuf],
    deliverable_path: &Path,
) -> Result<Deliverable, Rejection> {
    let mut valid = Vec::with_capacity(segments.len());
    let mut skipped_segments = Vec::new();
    for segment in segments {
        let size = tokio::fs::metadata(segment).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            warn!(
                recording_id = %recording_id,
                segment = %segment.display(),
                "finalization: skipping empty or missing segment"
            );
            skipped_segments.push(segment.clone());
        } else {
            valid.push((segment.clone(), size));
        }
    }

    if valid.is_empty() {
        return Err(Rejection::new(
            FailureReason::EmptyDeliverable,
            format!("none of {} segments contain data", segments.len()),
        ));
    }

    let expected: u64 = valid.iter().map(|(_, size)| size).sum();
    let target = deliverable_target(deliverable_path, segments);
    let partial = partial_path(&target);

    let written = match write_concatenation(&valid, &partial).await {
        Ok(written) => written,
        Err(e) => {
            discard(&partial).await;
            return Err(Rejection::new(
                FailureReason::ConcatenationFailed,
                format!("concatenation into {} failed: {}", partial.display(), e),
            ));
        }
    };

    let on_disk = tokio::fs::metadata(&partial).await.map(|m| m.len()).unwrap_or(0);
    if written != expected || on_disk != expected {
        discard(&partial).await;
        return Err(Rejection::new(
            FailureReason::ConcatenationFailed,
            format!(
                "deliverable size {} does not match segment total {}",
                on_disk, expected
            ),
        ));
    }

    if let Err(e) = tokio::fs::rename(&partial, &target).await {
        discard(&partial).await;
        return Err(Rejection::new(
            FailureReason::ConcatenationFailed,
            format!("could not move deliverable into place: {}", e),
        ));
    }

    info!(
        recording_id = %recording_id,
        segments = valid.len(),
        skipped = skipped_segments.len(),
        size_bytes = expected,
        "finalization: segments concatenated"
    );

    Ok(Deliverable {
        path: target,
        size_bytes: expected,
        skipped_segments,
    })
}

/// The deliverable path, unless a segment was adopted in place there.
fn deliverable_target(deliverable_path: &Path, segments: &[PathBuf]) -> PathBuf {
    if !segments.iter().any(|segment| segment == deliverable_path) {
        return deliverable_path.to_path_buf();
    }
    let stem = deliverable_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut file_name = format!("{}_joined", stem);
    if let Some(ext) = deliverable_path.extension() {
        file_name.push('.');
        file_name.push_str(&ext.to_string_lossy());
    }
    deliverable_path.with_file_name(file_name)
}

fn partial_path(target: &Path) -> PathBuf {
    let mut path = OsString::from(target.as_os_str());
    path.push(".part");
    PathBuf::from(path)
}

async fn write_concatenation(segments: &[(PathBuf, u64)], target: &Path) -> std::io::Result<u64> {
    let mut writer = BufWriter::new(File::create(target).await?);
    let mut written = 0;
    for (segment, _) in segments {
        let mut reader = File::open(segment).await?;
        written += tokio::io::copy(&mut reader, &mut writer).await?;
    }
    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    Ok(written)
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "finalization: failed to remove partial file");
        }
    }
}

async fn remove_segments(segment_dir: &Path, segments: &[PathBuf], deliverable: &Path) {
    for segment in segments.iter().filter(|segment| segment.as_path() != deliverable) {
        if let Err(e) = tokio::fs::remove_file(segment).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    segment = %segment.display(),
                    error = %e,
                    "finalization: failed to remove segment"
                );
            }
        }
    }

    match tokio::fs::remove_dir(segment_dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            segment_dir = %segment_dir.display(),
            error = %e,
            "finalization: segment directory left in place"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_queue::queue::TaskQueueSettings;
    use crates::domain::repositories::{
        event_bridge::MockEventBridge, recordings::MockRecordingRepository,
    };
    use crates::domain::value_objects::engine_events::EngineEventType;
    use std::collections::HashMap;

    const KB: usize = 1024;

    fn quiet_events() -> Arc<dyn EventBridge + Send + Sync> {
        let mut events = MockEventBridge::new();
        events.expect_emit().returning(|_| ());
        Arc::new(events)
    }

    fn queue() -> Arc<BackgroundTaskQueue> {
        BackgroundTaskQueue::new(TaskQueueSettings::default(), HashMap::new(), quiet_events())
    }

    fn completing_repository() -> MockRecordingRepository {
        let mut recordings = MockRecordingRepository::new();
        recordings
            .expect_mark_finished()
            .withf(|_, changeset| changeset.status == "completed")
            .times(1)
            .returning(|id, _| Box::pin(async move { Ok(Some(id)) }));
        recordings.expect_mark_failed().never();
        recordings
    }

    fn failing_repository(expected_reason: &'static str) -> MockRecordingRepository {
        let mut recordings = MockRecordingRepository::new();
        recordings.expect_mark_finished().never();
        recordings
            .expect_mark_failed()
            .withf(move |_, changeset| {
                changeset.status == "failed"
                    && changeset.failure_reason.as_deref() == Some(expected_reason)
                    && changeset.failure_timestamp.is_some()
            })
            .times(1)
            .returning(|id, _| Box::pin(async move { Ok(Some(id)) }));
        recordings
    }

    async fn write_segments(dir: &Path, sizes: &[usize]) -> Vec<PathBuf> {
        tokio::fs::create_dir_all(dir).await.unwrap();
        let mut paths = Vec::new();
        for (index, size) in sizes.iter().enumerate() {
            let path = dir.join(format!("segment_{:03}.ts", index + 1));
            tokio::fs::write(&path, vec![index as u8 + 1; *size]).await.unwrap();
            paths.push(path);
        }
        paths
    }

    fn segmented_request(root: &Path, segment_dir: PathBuf, segments: Vec<PathBuf>) -> FinalizationRequest {
        FinalizationRequest {
            recording_id: Uuid::new_v4(),
            stream_id: Uuid::new_v4(),
            deliverable_path: root.join("stream_final.ts"),
            source: FinalizationSource::Segmented {
                segment_dir,
                segments,
            },
        }
    }

    #[tokio::test]
    async fn empty_segment_is_skipped_and_deliverable_matches_valid_total() {
        let root = tempfile::tempdir().unwrap();
        let segment_dir = root.path().join("segments");
        let segments = write_segments(&segment_dir, &[10 * KB, 8 * KB, 0]).await;
        let task_queue = queue();
        let pipeline = FinalizationPipeline::new(
            Arc::new(completing_repository()),
            Arc::clone(&task_queue),
            quiet_events(),
            false,
        );

        let outcome = pipeline
            .finalize(segmented_request(root.path(), segment_dir.clone(), segments.clone()))
            .await
            .unwrap();

        assert_eq!(outcome.size_bytes, (18 * KB) as u64);
        assert_eq!(outcome.skipped_segments, vec![segments[2].clone()]);
        let bytes = tokio::fs::read(&outcome.recording_path).await.unwrap();
        assert_eq!(bytes.len(), 18 * KB);
        assert!(bytes[..10 * KB].iter().all(|b| *b == 1));
        assert!(bytes[10 * KB..].iter().all(|b| *b == 2));
        assert!(!segment_dir.exists());
        assert_eq!(outcome.task_ids.len(), 3);
        assert_eq!(task_queue.get_status().counts.pending, 3);
    }

    #[tokio::test]
    async fn segments_are_kept_when_configured() {
        let root = tempfile::tempdir().unwrap();
        let segment_dir = root.path().join("segments");
        let segments = write_segments(&segment_dir, &[KB, KB]).await;
        let pipeline = FinalizationPipeline::new(
            Arc::new(completing_repository()),
            queue(),
            quiet_events(),
            true,
        );

        pipeline
            .finalize(segmented_request(root.path(), segment_dir.clone(), segments.clone()))
            .await
            .unwrap();

        assert!(segments.iter().all(|segment| segment.exists()));
    }

    #[tokio::test]
    async fn all_empty_segments_fail_and_stay_on_disk() {
        let root = tempfile::tempdir().unwrap();
        let segment_dir = root.path().join("segments");
        let segments = write_segments(&segment_dir, &[0, 0]).await;
        let mut events = MockEventBridge::new();
        events
            .expect_emit()
            .withf(|event| event.event_type == EngineEventType::RecordingFailed)
            .times(1)
            .returning(|_| ());
        let task_queue = queue();
        let pipeline = FinalizationPipeline::new(
            Arc::new(failing_repository("empty_deliverable")),
            Arc::clone(&task_queue),
            Arc::new(events),
            false,
        );

        let err = pipeline
            .finalize(segmented_request(root.path(), segment_dir, segments.clone()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::FinalizationFailed {
                reason: FailureReason::EmptyDeliverable,
                ..
            }
        ));
        assert!(segments.iter().all(|segment| segment.exists()));
        assert!(!root.path().join("stream_final.ts").exists());
        assert_eq!(task_queue.get_status().counts.pending, 0);
    }

    #[tokio::test]
    async fn single_file_must_exist_and_be_non_empty() {
        let root = tempfile::tempdir().unwrap();
        let output_path = root.path().join("stream_single.ts");
        let pipeline = FinalizationPipeline::new(
            Arc::new(failing_repository("deliverable_missing")),
            queue(),
            quiet_events(),
            false,
        );

        let err = pipeline
            .finalize(FinalizationRequest {
                recording_id: Uuid::new_v4(),
                stream_id: Uuid::new_v4(),
                deliverable_path: output_path.clone(),
                source: FinalizationSource::SingleFile { output_path },
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::FinalizationFailed {
                reason: FailureReason::DeliverableMissing,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn single_file_is_the_deliverable() {
        let root = tempfile::tempdir().unwrap();
        let output_path = root.path().join("stream_single.ts");
        tokio::fs::write(&output_path, vec![9u8; KB]).await.unwrap();
        let pipeline = FinalizationPipeline::new(
            Arc::new(completing_repository()),
            queue(),
            quiet_events(),
            false,
        );

        let outcome = pipeline
            .finalize(FinalizationRequest {
                recording_id: Uuid::new_v4(),
                stream_id: Uuid::new_v4(),
                deliverable_path: output_path.clone(),
                source: FinalizationSource::SingleFile {
                    output_path: output_path.clone(),
                },
            })
            .await
            .unwrap();

        assert_eq!(outcome.recording_path, output_path);
        assert_eq!(outcome.size_bytes, KB as u64);
    }

    #[tokio::test]
    async fn already_terminal_recording_gets_no_post_processing() {
        let root = tempfile::tempdir().unwrap();
        let output_path = root.path().join("stream_single.ts");
        tokio::fs::write(&output_path, b"data").await.unwrap();
        let mut recordings = MockRecordingRepository::new();
        recordings
            .expect_mark_finished()
            .returning(|_, _| Box::pin(async { Ok(None) }));
        let task_queue = queue();
        let pipeline = FinalizationPipeline::new(
            Arc::new(recordings),
            Arc::clone(&task_queue),
            quiet_events(),
            false,
        );

        let outcome = pipeline
            .finalize(FinalizationRequest {
                recording_id: Uuid::new_v4(),
                stream_id: Uuid::new_v4(),
                deliverable_path: output_path.clone(),
                source: FinalizationSource::SingleFile { output_path },
            })
            .await
            .unwrap();

        assert!(outcome.task_ids.is_empty());
        assert_eq!(task_queue.get_status().counts.pending, 0);
    }

    #[test]
    fn adopted_segment_at_the_deliverable_path_gets_a_joined_name() {
        let deliverable = PathBuf::from("/rec/stream_a_b.ts");
        let segments = vec![deliverable.clone(), PathBuf::from("/rec/seg/segment_002.ts")];
        assert_eq!(
            deliverable_target(&deliverable, &segments),
            PathBuf::from("/rec/stream_a_b_joined.ts")
        );
        assert_eq!(deliverable_target(&deliverable, &segments[1..]), deliverable);
    }
}
