pub mod remux;

use anyhow::Result;
use async_trait::async_trait;
use crates::domain::value_objects::enums::task_types::TaskType;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use super::queue::BackgroundTaskQueue;

pub struct TaskContext {
    pub task_id: Uuid,
    pub task_type: TaskType,
    pub payload: Value,
    pub attempt: u32,
    queue: Arc<BackgroundTaskQueue>,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: Uuid,
        task_type: TaskType,
        payload: Value,
        attempt: u32,
        queue: Arc<BackgroundTaskQueue>,
    ) -> Self {
        Self {
            task_id,
            task_type,
            payload,
            attempt,
            queue,
        }
    }

    pub fn report_progress(&self, progress: u8) {
        self.queue.report_progress(self.task_id, progress);
    }
}

/// Runs one task type in-process. Returning `Ok` completes the task; an error fails the
/// attempt and lets the queue decide on a retry.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, ctx: TaskContext) -> Result<()>;
}
