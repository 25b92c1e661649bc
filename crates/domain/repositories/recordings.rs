use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::{
    entities::recordings::{
        InsertRecordingEntity, RecordingEntity, RecordingFailedEntity, RecordingFinishedEntity,
    },
    value_objects::enums::recording_statuses::RecordingStatus,
};

#[async_trait]
#[automock]
pub trait RecordingRepository {
    async fn insert(&self, insert_recording_entity: InsertRecordingEntity) -> Result<Uuid>;

    async fn find_active_by_stream(&self, stream_id: Uuid) -> Result<Option<RecordingEntity>>;

    async fn list_by_status(&self, status: RecordingStatus) -> Result<Vec<RecordingEntity>>;

    /// Returns `None` when the row is already terminal and was left untouched.
    async fn mark_finished(
        &self,
        recording_id: Uuid,
        changeset: RecordingFinishedEntity,
    ) -> Result<Option<Uuid>>;

    /// Returns `None` when the row is already terminal and was left untouched.
    async fn mark_failed(
        &self,
        recording_id: Uuid,
        changeset: RecordingFailedEntity,
    ) -> Result<Option<Uuid>>;

    async fn update_recording_path(&self, recording_id: Uuid, recording_path: String)
    -> Result<()>;
}
