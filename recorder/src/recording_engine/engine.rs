use crates::domain::{
    repositories::{
        event_bridge::EventBridge, recordings::RecordingRepository, streams::StreamLookup,
    },
    value_objects::{
        engine_events::EngineEvent, enums::failure_reasons::FailureReason,
        recordings::InsertRecordingModel,
    },
};
use serde::Serialize;
use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::{
    error::EngineError,
    finalization::{FinalizationOutcome, FinalizationPipeline},
    launcher::CaptureOptions,
    rotation::{EndReason, RecordingSession, RotationController, SessionSnapshot},
    supervisor::process_id_for,
};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StartedRecording {
    pub recording_id: Uuid,
    pub stream_id: Uuid,
    pub process_id: String,
    pub output_path: PathBuf,
}

/// Entry point for starting and stopping recordings.
pub struct RecordingEngine {
    recordings: Arc<dyn RecordingRepository + Send + Sync>,
    streams: Arc<dyn StreamLookup + Send + Sync>,
    rotation: Arc<RotationController>,
    finalization: Arc<FinalizationPipeline>,
    events: Arc<dyn EventBridge + Send + Sync>,
    accepting: AtomicBool,
    start_lock: Mutex<()>,
}

impl RecordingEngine {
    pub fn new(
        recordings: Arc<dyn RecordingRepository + Send + Sync>,
        streams: Arc<dyn StreamLookup + Send + Sync>,
        rotation: Arc<RotationController>,
        finalization: Arc<FinalizationPipeline>,
        events: Arc<dyn EventBridge + Send + Sync>,
    ) -> Self {
        Self {
            recordings,
            streams,
            rotation,
            finalization,
            events,
            accepting: AtomicBool::new(false),
            start_lock: Mutex::new(()),
        }
    }

    /// Opens the engine for new recordings once startup recovery has finished.
    pub fn mark_ready(&self) {
        self.accepting.store(true, Ordering::SeqCst);
        info!("recording engine: accepting recordings");
    }

    pub fn is_ready(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub async fn start_recording(
        &self,
        stream_id: Uuid,
        quality: Option<String>,
    ) -> Result<StartedRecording, EngineError> {
        if !self.is_ready() {
            return Err(EngineError::NotReady);
        }
        // Serializes the "no active recording" check with the insert.
        let _guard = self.start_lock.lock().await;

        let stream = self
            .streams
            .find_stream(stream_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("stream {}", stream_id)))?;

        if let Some(active) = self.recordings.find_active_by_stream(stream_id).await? {
            return Err(EngineError::AlreadyRecording {
                stream_id,
                recording_id: active.id,
            });
        }
        let process_id = process_id_for(stream_id);
        if self.rotation.is_active(&process_id) {
            return Err(EngineError::ProcessAlreadyRunning { process_id });
        }

        let recording_id = Uuid::new_v4();
        let output_path = self.rotation.paths().single_file_path(stream_id, recording_id);
        let insert = InsertRecordingModel {
            id: recording_id,
            stream_id,
            recording_path: output_path.to_string_lossy().into_owned(),
        };
        self.recordings.insert(insert.to_entity()).await?;

        let quality = quality.unwrap_or_else(|| stream.quality.clone());
        let options = CaptureOptions {
            proxy: stream.proxy.clone(),
        };
        let session =
            RecordingSession::single_file(recording_id, stream, quality, options, output_path.clone());

        if let Err(e) = self.rotation.begin(session).await {
            self.finalization
                .fail_recording(
                    recording_id,
                    stream_id,
                    FailureReason::CaptureStartFailed,
                    &e.to_string(),
                )
                .await;
            return Err(e);
        }

        self.events.emit(EngineEvent::recording_started(
            recording_id,
            stream_id,
            &output_path.to_string_lossy(),
        ));
        info!(
            recording_id = %recording_id,
            stream_id = %stream_id,
            "recording engine: recording started"
        );

        Ok(StartedRecording {
            recording_id,
            stream_id,
            process_id,
            output_path,
        })
    }

    /// Stops the stream's active recording and finalizes it. `None` if nothing was recording.
    pub async fn stop_recording(
        &self,
        stream_id: Uuid,
    ) -> Result<Option<FinalizationOutcome>, EngineError> {
        self.rotation
            .end(&process_id_for(stream_id), EndReason::UserStopped)
            .await
    }

    /// Finalizes the stream's recording because the stream went offline.
    pub async fn stream_ended(
        &self,
        stream_id: Uuid,
    ) -> Result<Option<FinalizationOutcome>, EngineError> {
        self.rotation
            .end(&process_id_for(stream_id), EndReason::StreamEnded)
            .await
    }

    pub async fn active_recordings(&self) -> Vec<SessionSnapshot> {
        self.rotation.active_sessions().await
    }

    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        info!("recording engine: shutting down, finalizing active recordings");
        self.rotation.end_all(EndReason::Shutdown).await;
    }
}
