use chrono::{DateTime, Utc};
use crates::domain::value_objects::enums::{task_statuses::TaskStatus, task_types::TaskType};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExternalTask {
    pub task_id: Uuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub progress: u8,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_progress_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    #[serde(skip)]
    progress_clock: Option<Instant>,
}

impl ExternalTask {
    pub fn new(task_type: TaskType, payload: Value, max_retries: u32) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            task_type,
            status: TaskStatus::Pending,
            progress: 0,
            payload,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_progress_at: None,
            retry_count: 0,
            max_retries,
            last_error: None,
            progress_clock: None,
        }
    }

    pub fn is_dispatchable(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Retrying)
    }

    pub fn mark_running(&mut self) {
        let now = Utc::now();
        self.status = TaskStatus::Running;
        self.progress = 0;
        self.started_at = Some(now);
        self.last_progress_at = Some(now);
        self.progress_clock = Some(Instant::now());
    }

    pub fn record_progress(&mut self, progress: u8) {
        self.progress = progress.min(100);
        self.last_progress_at = Some(Utc::now());
        self.progress_clock = Some(Instant::now());
    }

    /// Running without a progress report for at least `threshold`.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.status == TaskStatus::Running
            && self
                .progress_clock
                .is_some_and(|at| at.elapsed() >= threshold)
    }

    pub fn mark_completed(&mut self) {
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.last_error = Some(error);
    }

    pub fn mark_retrying(&mut self, error: String) {
        self.status = TaskStatus::Retrying;
        self.retry_count += 1;
        self.last_error = Some(error);
        self.progress_clock = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Completed,
    Retrying { retry_count: u32, backoff: Duration },
    Failed,
    /// The task exists but is not running; nothing changed.
    Ignored,
    NotFound,
}

impl CompletionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionOutcome::Completed => "completed",
            CompletionOutcome::Retrying { .. } => "retrying",
            CompletionOutcome::Failed => "failed",
            CompletionOutcome::Ignored => "ignored",
            CompletionOutcome::NotFound => "not_found",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub running: usize,
    pub retrying: usize,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub counts: QueueCounts,
    pub tasks: Vec<ExternalTask>,
    pub recent: Vec<ExternalTask>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub force_completed: Vec<Uuid>,
    pub abandoned: Vec<Uuid>,
}
