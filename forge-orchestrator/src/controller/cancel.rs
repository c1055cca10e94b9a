//! Cancellation registry
//!
//! One shared table maps (workflow name, task id) to the cancellation token
//! of the running controller for that task. The table is owned by whoever
//! drives controllers (not ambient global state) and entries are removed on
//! terminal transition, so stale keys can never cancel a future run that
//! happens to reuse the same ids.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum CancelError {
    #[error("no matching task found, id: {task_id}, workflow name: {workflow_name}")]
    NoMatchingTask {
        workflow_name: String,
        task_id: i64,
    },
}

/// Concurrent-safe registry of cancellation triggers for running tasks.
#[derive(Default)]
pub struct CancelRegistry {
    inner: Mutex<HashMap<(String, i64), CancellationToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh token for a run and returns it. Replaces any stale
    /// entry for the same key.
    pub fn register(&self, workflow_name: &str, task_id: i64) -> CancellationToken {
        let token = CancellationToken::new();
        self.inner
            .lock()
            .expect("cancel registry poisoned")
            .insert((workflow_name.to_string(), task_id), token.clone());
        token
    }

    /// Cancels the run registered under (workflow_name, task_id).
    ///
    /// Unknown keys are an error, never silently ignored.
    pub fn cancel(&self, workflow_name: &str, task_id: i64) -> Result<(), CancelError> {
        let guard = self.inner.lock().expect("cancel registry poisoned");
        match guard.get(&(workflow_name.to_string(), task_id)) {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(CancelError::NoMatchingTask {
                workflow_name: workflow_name.to_string(),
                task_id,
            }),
        }
    }

    /// Removes the entry for a run that reached a terminal state.
    pub fn remove(&self, workflow_name: &str, task_id: i64) {
        self.inner
            .lock()
            .expect("cancel registry poisoned")
            .remove(&(workflow_name.to_string(), task_id));
    }

    #[cfg(test)]
    pub fn contains(&self, workflow_name: &str, task_id: i64) -> bool {
        self.inner
            .lock()
            .unwrap()
            .contains_key(&(workflow_name.to_string(), task_id))
    }
}
