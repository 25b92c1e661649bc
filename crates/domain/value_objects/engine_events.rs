use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::domain::value_objects::enums::task_types::TaskType;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineEventType {
    RecordingStarted,
    RecordingFailed,
    RecordingCompleted,
    TaskStarted,
    TaskProgress,
    TaskCompleted,
    TaskFailed,
}

impl EngineEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineEventType::RecordingStarted => "recording_started",
            EngineEventType::RecordingFailed => "recording_failed",
            EngineEventType::RecordingCompleted => "recording_completed",
            EngineEventType::TaskStarted => "task_started",
            EngineEventType::TaskProgress => "task_progress",
            EngineEventType::TaskCompleted => "task_completed",
            EngineEventType::TaskFailed => "task_failed",
        }
    }
}

/// One message handed to the external notification bridge.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EngineEvent {
    pub event_type: EngineEventType,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

impl EngineEvent {
    pub fn new(event_type: EngineEventType, payload: Value) -> Self {
        Self {
            event_type,
            payload,
            emitted_at: Utc::now(),
        }
    }

    pub fn recording_started(recording_id: Uuid, stream_id: Uuid, output_path: &str) -> Self {
        Self::new(
            EngineEventType::RecordingStarted,
            json!({
                "recording_id": recording_id,
                "stream_id": stream_id,
                "output_path": output_path,
            }),
        )
    }

    pub fn recording_completed(recording_id: Uuid, stream_id: Uuid, recording_path: &str) -> Self {
        Self::new(
            EngineEventType::RecordingCompleted,
            json!({
                "recording_id": recording_id,
                "stream_id": stream_id,
                "recording_path": recording_path,
            }),
        )
    }

    pub fn recording_failed(
        recording_id: Uuid,
        stream_id: Uuid,
        failure_reason: &str,
        error_message: &str,
    ) -> Self {
        Self::new(
            EngineEventType::RecordingFailed,
            json!({
                "recording_id": recording_id,
                "stream_id": stream_id,
                "failure_reason": failure_reason,
                "error_message": error_message,
            }),
        )
    }

    pub fn task(
        event_type: EngineEventType,
        task_id: Uuid,
        task_type: TaskType,
        progress: u8,
        error: Option<&str>,
    ) -> Self {
        Self::new(
            event_type,
            json!({
                "task_id": task_id,
                "task_type": task_type,
                "progress": progress,
                "error": error,
            }),
        )
    }
}
