use crates::domain::{
    repositories::event_bridge::EventBridge,
    value_objects::{
        engine_events::{EngineEvent, EngineEventType},
        enums::{task_statuses::TaskStatus, task_types::TaskType},
    },
};
use serde_json::Value;
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    handlers::{TaskContext, TaskHandler},
    registry::{TaskRegistry, lock_task},
    tasks::{CompletionOutcome, ExternalTask, QueueCounts, QueueStatus, SweepReport},
};

const BACKOFF_FACTOR: u32 = 5;

#[derive(Debug, Clone)]
pub struct TaskQueueSettings {
    pub concurrency: usize,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub stale_threshold: Duration,
    pub sweep_interval: Duration,
    pub history_limit: usize,
}

impl Default for TaskQueueSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_retries: 3,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(600),
            stale_threshold: Duration::from_secs(1800),
            sweep_interval: Duration::from_secs(60),
            history_limit: 100,
        }
    }
}

enum Resolution {
    Succeeded,
    Failed { error: String, retryable: bool },
}

/// What happened under the task lock; side effects run after it is released.
struct Applied {
    outcome: CompletionOutcome,
    terminal: Option<ExternalTask>,
}

pub struct BackgroundTaskQueue {
    settings: TaskQueueSettings,
    registry: TaskRegistry,
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
    events: Arc<dyn EventBridge + Send + Sync>,
    dispatch_tx: mpsc::UnboundedSender<Uuid>,
    dispatch_rx: Mutex<Option<mpsc::UnboundedReceiver<Uuid>>>,
    semaphore: Arc<Semaphore>,
    history: Mutex<VecDeque<ExternalTask>>,
    completed_total: AtomicU64,
    failed_total: AtomicU64,
}

impl BackgroundTaskQueue {
    pub fn new(
        settings: TaskQueueSettings,
        handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
        events: Arc<dyn EventBridge + Send + Sync>,
    ) -> Arc<Self> {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(settings.concurrency.max(1))),
            settings,
            registry: TaskRegistry::new(),
            handlers,
            events,
            dispatch_tx,
            dispatch_rx: Mutex::new(Some(dispatch_rx)),
            history: Mutex::new(VecDeque::new()),
            completed_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
        })
    }

    pub fn settings(&self) -> &TaskQueueSettings {
        &self.settings
    }

    pub fn enqueue(&self, task_type: TaskType, payload: Value) -> Uuid {
        self.enqueue_with_retries(task_type, payload, self.settings.max_retries)
    }

    pub fn enqueue_with_retries(&self, task_type: TaskType, payload: Value, max_retries: u32) -> Uuid {
        let task = ExternalTask::new(task_type, payload, max_retries);
        let task_id = task.task_id;
        self.registry.insert(task);

        if self.dispatch_tx.send(task_id).is_err() {
            warn!(task_id = %task_id, "task queue: dispatcher is gone, task stays pending");
        }
        info!(task_id = %task_id, task_type = %task_type, "task queue: task enqueued");
        task_id
    }

    /// Records the terminal outcome of a running task. Calls for tasks that are not
    /// running are ignored, so duplicate completions are harmless.
    pub fn complete_external_task(
        &self,
        task_id: Uuid,
        success: bool,
        error: Option<String>,
    ) -> CompletionOutcome {
        let Some(entry) = self.registry.get(task_id) else {
            debug!(task_id = %task_id, "task queue: completion for unknown task");
            return CompletionOutcome::NotFound;
        };

        let resolution = if success {
            Resolution::Succeeded
        } else {
            Resolution::Failed {
                error: error.unwrap_or_else(|| "task failed".to_string()),
                retryable: true,
            }
        };

        let applied = {
            let mut task = lock_task(&entry);
            if task.status != TaskStatus::Running {
                debug!(
                    task_id = %task_id,
                    status = %task.status,
                    "task queue: ignoring completion for task that is not running"
                );
                return CompletionOutcome::Ignored;
            }
            self.apply_locked(&mut task, resolution)
        };

        self.after_unlock(task_id, applied)
    }

    /// Returns `false` if the task is unknown or not running.
    pub fn report_progress(&self, task_id: Uuid, progress: u8) -> bool {
        let Some(entry) = self.registry.get(task_id) else {
            return false;
        };

        let (task_type, progress) = {
            let mut task = lock_task(&entry);
            if task.status != TaskStatus::Running {
                return false;
            }
            task.record_progress(progress);
            (task.task_type, task.progress)
        };

        self.events.emit(EngineEvent::task(
            EngineEventType::TaskProgress,
            task_id,
            task_type,
            progress,
            None,
        ));
        true
    }

    pub fn get_task(&self, task_id: Uuid) -> Option<ExternalTask> {
        if let Some(entry) = self.registry.get(task_id) {
            return Some(lock_task(&entry).clone());
        }
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|task| task.task_id == task_id)
            .cloned()
    }

    pub fn get_status(&self) -> QueueStatus {
        let tasks = self.registry.snapshot();
        let mut counts = QueueCounts {
            completed: self.completed_total.load(Ordering::Relaxed),
            failed: self.failed_total.load(Ordering::Relaxed),
            ..QueueCounts::default()
        };
        for task in &tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Retrying => counts.retrying += 1,
                TaskStatus::Completed | TaskStatus::Failed => {}
            }
        }

        let recent = self
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .cloned()
            .collect();

        QueueStatus {
            counts,
            tasks,
            recent,
        }
    }

    /// Force-completes tasks parked at 100% and abandons running tasks that stopped
    /// reporting progress.
    pub fn sweep_stuck(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let stale_threshold = self.settings.stale_threshold;

        for entry in self.registry.entries() {
            let (task_id, applied) = {
                let mut task = lock_task(&entry);
                if !task.is_stale(stale_threshold) {
                    continue;
                }
                let resolution = if task.progress >= 100 {
                    Resolution::Succeeded
                } else {
                    Resolution::Failed {
                        error: format!(
                            "abandoned: no progress for {}s",
                            stale_threshold.as_secs()
                        ),
                        retryable: false,
                    }
                };
                (task.task_id, self.apply_locked(&mut task, resolution))
            };

            match self.after_unlock(task_id, applied) {
                CompletionOutcome::Completed => {
                    warn!(task_id = %task_id, "task queue: force-completed task stuck at 100%");
                    report.force_completed.push(task_id);
                }
                _ => {
                    warn!(task_id = %task_id, "task queue: abandoned stale running task");
                    report.abandoned.push(task_id);
                }
            }
        }

        report
    }

    pub async fn run_dispatcher(self: Arc<Self>, cancel: CancellationToken) {
        let receiver = self
            .dispatch_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut receiver) = receiver else {
            warn!("task queue: dispatcher already running");
            return;
        };

        info!(
            concurrency = self.settings.concurrency,
            "task queue: dispatcher started"
        );

        loop {
            let task_id = tokio::select! {
                _ = cancel.cancelled() => break,
                next = receiver.recv() => match next {
                    Some(task_id) => task_id,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let queue = Arc::clone(&self);
            tokio::spawn(async move {
                queue.execute(task_id).await;
                drop(permit);
            });
        }

        info!("task queue: dispatcher stopped");
    }

    pub async fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            interval_secs = self.settings.sweep_interval.as_secs(),
            stale_secs = self.settings.stale_threshold.as_secs(),
            "task queue: stuck-task sweeper started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.sweep_interval) => {}
            }

            let report = self.sweep_stuck();
            if !report.force_completed.is_empty() || !report.abandoned.is_empty() {
                info!(
                    force_completed = report.force_completed.len(),
                    abandoned = report.abandoned.len(),
                    "task queue: sweep finished"
                );
            }
        }

        info!("task queue: stuck-task sweeper stopped");
    }

    async fn execute(self: &Arc<Self>, task_id: Uuid) {
        let Some(entry) = self.registry.get(task_id) else {
            debug!(task_id = %task_id, "task queue: dispatched task no longer exists");
            return;
        };

        let (task_type, payload, attempt) = {
            let mut task = lock_task(&entry);
            if !task.is_dispatchable() {
                debug!(
                    task_id = %task_id,
                    status = %task.status,
                    "task queue: skipping dispatch"
                );
                return;
            }
            task.mark_running();
            (task.task_type, task.payload.clone(), task.retry_count + 1)
        };

        info!(
            task_id = %task_id,
            task_type = %task_type,
            attempt,
            "task queue: task started"
        );
        self.events.emit(EngineEvent::task(
            EngineEventType::TaskStarted,
            task_id,
            task_type,
            0,
            None,
        ));

        let Some(handler) = self.handlers.get(&task_type).cloned() else {
            debug!(task_id = %task_id, "task queue: awaiting external completion");
            return;
        };

        let ctx = TaskContext::new(task_id, task_type, payload, attempt, Arc::clone(self));
        let outcome = match handler.run(ctx).await {
            Ok(()) => self.complete_external_task(task_id, true, None),
            Err(e) => {
                error!(
                    task_id = %task_id,
                    task_type = %task_type,
                    attempt,
                    error = %format!("{:#}", e),
                    "task queue: handler failed"
                );
                self.complete_external_task(task_id, false, Some(format!("{:#}", e)))
            }
        };
        debug!(task_id = %task_id, outcome = outcome.as_str(), "task queue: handler finished");
    }

    fn backoff_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1);
        self.settings
            .backoff_base
            .saturating_mul(BACKOFF_FACTOR.saturating_pow(exponent))
            .min(self.settings.backoff_max)
    }

    fn apply_locked(&self, task: &mut ExternalTask, resolution: Resolution) -> Applied {
        match resolution {
            Resolution::Succeeded => {
                task.mark_completed();
                Applied {
                    outcome: CompletionOutcome::Completed,
                    terminal: Some(task.clone()),
                }
            }
            Resolution::Failed { error, retryable } => {
                if retryable && task.retry_count < task.max_retries {
                    task.mark_retrying(error);
                    let backoff = self.backoff_for(task.retry_count);
                    Applied {
                        outcome: CompletionOutcome::Retrying {
                            retry_count: task.retry_count,
                            backoff,
                        },
                        terminal: None,
                    }
                } else {
                    task.mark_failed(error);
                    Applied {
                        outcome: CompletionOutcome::Failed,
                        terminal: Some(task.clone()),
                    }
                }
            }
        }
    }

    fn after_unlock(&self, task_id: Uuid, applied: Applied) -> CompletionOutcome {
        if let CompletionOutcome::Retrying {
            retry_count,
            backoff,
        } = applied.outcome
        {
            warn!(
                task_id = %task_id,
                retry_count,
                backoff_secs = backoff.as_secs_f64(),
                "task queue: task failed, retry scheduled"
            );
            self.schedule_retry(task_id, backoff);
        }

        if let Some(task) = applied.terminal {
            self.registry.remove(task_id);
            let event_type = match task.status {
                TaskStatus::Completed => {
                    self.completed_total.fetch_add(1, Ordering::Relaxed);
                    info!(task_id = %task_id, task_type = %task.task_type, "task queue: task completed");
                    EngineEventType::TaskCompleted
                }
                _ => {
                    self.failed_total.fetch_add(1, Ordering::Relaxed);
                    error!(
                        task_id = %task_id,
                        task_type = %task.task_type,
                        retry_count = task.retry_count,
                        error = task.last_error.as_deref().unwrap_or_default(),
                        "task queue: task failed permanently"
                    );
                    EngineEventType::TaskFailed
                }
            };
            self.events.emit(EngineEvent::task(
                event_type,
                task_id,
                task.task_type,
                task.progress,
                task.last_error.as_deref(),
            ));
            self.push_history(task);
        }

        applied.outcome
    }

    fn schedule_retry(&self, task_id: Uuid, backoff: Duration) {
        let dispatch_tx = self.dispatch_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            if dispatch_tx.send(task_id).is_err() {
                warn!(task_id = %task_id, "task queue: dispatcher is gone, retry dropped");
            }
        });
    }

    fn push_history(&self, task: ExternalTask) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_back(task);
        while history.len() > self.settings.history_limit {
            history.pop_front();
        }
    }

    #[cfg(test)]
    pub(crate) fn entry(&self, task_id: Uuid) -> Option<super::registry::TaskEntry> {
        self.registry.get(task_id)
    }
}
