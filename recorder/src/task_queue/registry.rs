use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
};
use uuid::Uuid;

use super::tasks::ExternalTask;

pub type TaskEntry = Arc<Mutex<ExternalTask>>;

/// Live (non-terminal) tasks, each behind its own lock.
///
/// The map lock is never held while a task lock is taken: callers clone the entry out
/// first, so completion and listing cannot deadlock against each other.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<Uuid, TaskEntry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task: ExternalTask) -> TaskEntry {
        let task_id = task.task_id;
        let entry = Arc::new(Mutex::new(task));
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id, Arc::clone(&entry));
        entry
    }

    pub fn get(&self, task_id: Uuid) -> Option<TaskEntry> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&task_id)
            .cloned()
    }

    pub fn remove(&self, task_id: Uuid) -> bool {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&task_id)
            .is_some()
    }

    pub fn entries(&self) -> Vec<TaskEntry> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Copies of every live task, oldest first.
    pub fn snapshot(&self) -> Vec<ExternalTask> {
        let mut tasks: Vec<ExternalTask> = self
            .entries()
            .iter()
            .map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect();
        tasks.sort_by_key(|task| task.created_at);
        tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn lock_task(entry: &TaskEntry) -> std::sync::MutexGuard<'_, ExternalTask> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}
