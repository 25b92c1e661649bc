use crates::domain::value_objects::enums::failure_reasons::FailureReason;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("stream {stream_id} already has an active recording {recording_id}")]
    AlreadyRecording { stream_id: Uuid, recording_id: Uuid },

    #[error("capture process {process_id} is already running")]
    ProcessAlreadyRunning { process_id: String },

    #[error("failed to start capture process {process_id}: {message}")]
    StartFailed { process_id: String, message: String },

    #[error("recording {recording_id} failed to finalize ({reason}): {message}")]
    FinalizationFailed {
        recording_id: Uuid,
        reason: FailureReason,
        message: String,
    },

    #[error("missing dependency: {0}")]
    MissingDependency(&'static str),

    #[error("{0} not found")]
    NotFound(String),

    #[error("recording engine is not accepting recordings yet")]
    NotReady,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
