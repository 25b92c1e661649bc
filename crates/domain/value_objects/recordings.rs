use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    entities::recordings::{InsertRecordingEntity, RecordingEntity},
    value_objects::enums::recording_statuses::RecordingStatus,
};

/// Viewer counts are only known once a metadata collaborator reports them.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum ViewerCount {
    #[default]
    Unset,
    Known(i64),
}

impl ViewerCount {
    pub fn to_column(self) -> Option<i64> {
        match self {
            ViewerCount::Unset => None,
            ViewerCount::Known(value) => Some(value),
        }
    }
}

impl From<Option<i64>> for ViewerCount {
    fn from(value: Option<i64>) -> Self {
        value.map(ViewerCount::Known).unwrap_or(ViewerCount::Unset)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordingModel {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub status: RecordingStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub recording_path: Option<String>,
    pub error_message: Option<String>,
    pub failure_reason: Option<String>,
    pub failure_timestamp: Option<DateTime<Utc>>,
    pub last_stream_viewer_count: ViewerCount,
    pub peak_viewer_count: ViewerCount,
}

impl TryFrom<RecordingEntity> for RecordingModel {
    type Error = anyhow::Error;

    fn try_from(entity: RecordingEntity) -> Result<Self> {
        let status = entity
            .status
            .parse::<RecordingStatus>()
            .map_err(|err| anyhow!("recording {}: {}", entity.id, err))?;

        Ok(Self {
            id: entity.id,
            stream_id: entity.stream_id,
            status,
            start_time: entity.start_time,
            end_time: entity.end_time,
            recording_path: entity.recording_path,
            error_message: entity.error_message,
            failure_reason: entity.failure_reason,
            failure_timestamp: entity.failure_timestamp,
            last_stream_viewer_count: entity.last_stream_viewer_count.into(),
            peak_viewer_count: entity.peak_viewer_count.into(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsertRecordingModel {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub recording_path: String,
}

impl InsertRecordingModel {
    pub fn to_entity(&self) -> InsertRecordingEntity {
        let now = Utc::now();
        InsertRecordingEntity {
            id: self.id,
            stream_id: self.stream_id,
            status: RecordingStatus::Recording.to_string(),
            start_time: now,
            recording_path: Some(self.recording_path.clone()),
            last_stream_viewer_count: ViewerCount::Unset.to_column(),
            peak_viewer_count: ViewerCount::Unset.to_column(),
            created_at: now,
            updated_at: now,
        }
    }
}
