use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::process_handle::{Liveness, ProcessHandle, ProcessInfo};

/// Live capture processes keyed by `process_id`.
///
/// The handle map is only locked for short synchronous operations. Anything that waits
/// on a process (grace periods, restarts) first takes the per-key async lock, then takes
/// the handle out of the map so removal happens exactly once.
#[derive(Default)]
pub struct ProcessRegistry {
    handles: Mutex<HashMap<String, ProcessHandle>>,
    key_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock_key(&self, process_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(process_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Registers `handle` unless its key is taken; the rejected handle is given back.
    pub fn try_insert(&self, handle: ProcessHandle) -> Result<(), ProcessHandle> {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if handles.contains_key(handle.process_id()) {
            return Err(handle);
        }
        handles.insert(handle.process_id().to_string(), handle);
        Ok(())
    }

    pub fn take(&self, process_id: &str) -> Option<ProcessHandle> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(process_id)
    }

    pub fn contains(&self, process_id: &str) -> bool {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(process_id)
    }

    /// Fresh liveness of a registered process, `None` if nothing is registered.
    pub fn liveness(&self, process_id: &str) -> Option<Liveness> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(process_id)
            .map(ProcessHandle::check_liveness)
    }

    pub fn info(&self, process_id: &str) -> Option<ProcessInfo> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(process_id)
            .map(ProcessHandle::info)
    }

    pub fn diagnostics(&self, process_id: &str) -> Option<String> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(process_id)
            .and_then(ProcessHandle::diagnostics)
    }

    pub fn process_ids(&self) -> Vec<String> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
