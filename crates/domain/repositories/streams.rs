use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::streams::StreamEntity;

/// Stream lookup collaborator used by the engine and by startup recovery.
#[async_trait]
#[automock]
pub trait StreamLookup {
    async fn find_stream(&self, stream_id: Uuid) -> Result<Option<StreamEntity>>;

    async fn is_live(&self, stream_id: Uuid) -> Result<bool>;
}
