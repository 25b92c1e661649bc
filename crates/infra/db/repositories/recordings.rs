use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use diesel::{OptionalExtension, RunQueryDsl, insert_into, prelude::*, update};
use std::sync::Arc;
use tokio::task;
use uuid::Uuid;

use crate::{
    domain::{
        entities::recordings::{
            InsertRecordingEntity, RecordingEntity, RecordingFailedEntity,
            RecordingFinishedEntity,
        },
        repositories::recordings::RecordingRepository,
        value_objects::enums::recording_statuses::RecordingStatus,
    },
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::recordings},
};

pub struct RecordingPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl RecordingPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

fn mutable_statuses() -> Vec<String> {
    vec![
        RecordingStatus::Recording.to_string(),
        RecordingStatus::Stopped.to_string(),
    ]
}

#[async_trait]
impl RecordingRepository for RecordingPostgres {
    async fn insert(&self, insert_recording_entity: InsertRecordingEntity) -> Result<Uuid> {
        // Diesel is synchronous; keep DB work on the blocking threadpool.
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Uuid> {
            let mut conn = db_pool.get()?;
            let result = insert_into(recordings::table)
                .values(&insert_recording_entity)
                .returning(recordings::id)
                .get_result::<Uuid>(&mut conn)?;
            Ok(result)
        })
        .await?
    }

    async fn find_active_by_stream(&self, stream_id: Uuid) -> Result<Option<RecordingEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Option<RecordingEntity>> {
            let mut conn = db_pool.get()?;
            let result = recordings::table
                .select(RecordingEntity::as_select())
                .filter(recordings::stream_id.eq(stream_id))
                .filter(recordings::status.eq(RecordingStatus::Recording.to_string()))
                .order(recordings::start_time.desc())
                .first::<RecordingEntity>(&mut conn)
                .optional()?;
            Ok(result)
        })
        .await?
    }

    async fn list_by_status(&self, status: RecordingStatus) -> Result<Vec<RecordingEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Vec<RecordingEntity>> {
            let mut conn = db_pool.get()?;
            let result = recordings::table
                .select(RecordingEntity::as_select())
                .filter(recordings::status.eq(status.to_string()))
                .order(recordings::start_time.asc())
                .load::<RecordingEntity>(&mut conn)?;
            Ok(result)
        })
        .await?
    }

    async fn mark_finished(
        &self,
        recording_id: Uuid,
        changeset: RecordingFinishedEntity,
    ) -> Result<Option<Uuid>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Option<Uuid>> {
            let mut conn = db_pool.get()?;
            let result = update(
                recordings::table
                    .filter(recordings::id.eq(recording_id))
                    .filter(recordings::status.eq_any(mutable_statuses())),
            )
            .set(changeset)
            .returning(recordings::id)
            .get_result::<Uuid>(&mut conn)
            .optional()?;
            Ok(result)
        })
        .await?
    }

    async fn mark_failed(
        &self,
        recording_id: Uuid,
        changeset: RecordingFailedEntity,
    ) -> Result<Option<Uuid>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Option<Uuid>> {
            let mut conn = db_pool.get()?;
            let result = update(
                recordings::table
                    .filter(recordings::id.eq(recording_id))
                    .filter(recordings::status.eq_any(mutable_statuses())),
            )
            .set(changeset)
            .returning(recordings::id)
            .get_result::<Uuid>(&mut conn)
            .optional()?;
            Ok(result)
        })
        .await?
    }

    async fn update_recording_path(
        &self,
        recording_id: Uuid,
        recording_path: String,
    ) -> Result<()> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<()> {
            let mut conn = db_pool.get()?;
            update(recordings::table.filter(recordings::id.eq(recording_id)))
                .set((
                    recordings::recording_path.eq(Some(recording_path)),
                    recordings::updated_at.eq(Utc::now()),
                ))
                .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }
}
