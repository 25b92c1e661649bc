use anyhow::Result;
use async_trait::async_trait;
use diesel::{OptionalExtension, RunQueryDsl, prelude::*};
use std::sync::Arc;
use tokio::task;
use uuid::Uuid;

use crate::{
    domain::{entities::streams::StreamEntity, repositories::streams::StreamLookup},
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::streams},
};

/// Reads stream rows maintained by the external live checker.
pub struct StreamPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl StreamPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl StreamLookup for StreamPostgres {
    async fn find_stream(&self, stream_id: Uuid) -> Result<Option<StreamEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Option<StreamEntity>> {
            let mut conn = db_pool.get()?;
            let result = streams::table
                .find(stream_id)
                .select(StreamEntity::as_select())
                .first::<StreamEntity>(&mut conn)
                .optional()?;
            Ok(result)
        })
        .await?
    }

    async fn is_live(&self, stream_id: Uuid) -> Result<bool> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<bool> {
            let mut conn = db_pool.get()?;
            let result = streams::table
                .find(stream_id)
                .select(streams::is_live)
                .first::<bool>(&mut conn)
                .optional()?;
            Ok(result.unwrap_or(false))
        })
        .await?
    }
}
