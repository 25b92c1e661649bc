use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::recordings;

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = recordings)]
pub struct RecordingEntity {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub recording_path: Option<String>,
    pub error_message: Option<String>,
    pub failure_reason: Option<String>,
    pub failure_timestamp: Option<DateTime<Utc>>,
    pub last_stream_viewer_count: Option<i64>,
    pub peak_viewer_count: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = recordings)]
pub struct InsertRecordingEntity {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub recording_path: Option<String>,
    pub last_stream_viewer_count: Option<i64>,
    pub peak_viewer_count: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = recordings)]
pub struct RecordingFinishedEntity {
    pub status: String,
    pub end_time: Option<DateTime<Utc>>,
    pub recording_path: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = recordings)]
pub struct RecordingFailedEntity {
    pub status: String,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub failure_reason: Option<String>,
    pub failure_timestamp: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
