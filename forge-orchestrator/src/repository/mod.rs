//! Workflow task repository
//!
//! Persistence contract for workflow task snapshots. Physical storage lives
//! outside this crate; the controller and API layers consume the trait. An
//! in-memory implementation backs tests and documents the expected
//! semantics: per-workflow monotonic task ids, full-document updates, soft
//! deletion, and count-based history archiving.
//!
//! A real backend needs a compound index on (task_id, workflow_name,
//! is_deleted, status), a secondary index on create_time, and a compound
//! index on (workflow_name, is_deleted) for these queries to stay cheap.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use forge_core::domain::{Status, WorkflowTask};
use thiserror::Error;

/// Result type alias for repository operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Listing filter and page. A zero page size returns everything.
#[derive(Debug, Clone, Default)]
pub struct ListTaskOptions {
    pub workflow_name: Option<String>,
    /// 1-based page number; ignored when page_size is 0.
    pub page_num: u64,
    pub page_size: u64,
}

/// Persistence contract for workflow task records.
#[async_trait]
pub trait WorkflowTaskStore: Send + Sync {
    /// Stores a new task, assigning the next task id for its workflow.
    /// Returns the generated record id.
    async fn create(&self, task: &mut WorkflowTask) -> Result<String>;

    /// Lists tasks matching the filter, newest first, with the total count
    /// before paging.
    async fn list(&self, opt: &ListTaskOptions) -> Result<(Vec<WorkflowTask>, u64)>;

    /// Tasks still in `Created` or `Running`, not deleted, oldest first.
    async fn find_incomplete(&self) -> Result<Vec<WorkflowTask>>;

    async fn find(&self, workflow_name: &str, task_id: i64) -> Result<WorkflowTask>;

    async fn find_by_id(&self, id: &str) -> Result<WorkflowTask>;

    /// Full-document replace of the record keyed (workflow_name, task_id).
    async fn update(&self, task: &WorkflowTask) -> Result<()>;

    /// Soft-deletes every task of a workflow: marks deleted and archived,
    /// drops nothing.
    async fn delete_by_workflow_name(&self, workflow_name: &str) -> Result<()>;

    /// Marks all but the most recent `remain` non-deleted tasks of a
    /// workflow archived.
    async fn archive_history(&self, workflow_name: &str, remain: i64) -> Result<()>;
}

#[derive(Default)]
struct MemoryInner {
    records: Vec<(String, WorkflowTask)>,
    counters: HashMap<String, i64>,
}

/// In-memory task store. Backs tests and single-process deployments.
#[derive(Default)]
pub struct MemoryTaskStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowTaskStore for MemoryTaskStore {
    async fn create(&self, task: &mut WorkflowTask) -> Result<String> {
        if task.workflow_name.is_empty() {
            return Err(StoreError::Invalid("empty workflow name".to_string()));
        }
        let mut inner = self.inner.lock().expect("task store poisoned");
        let counter = inner
            .counters
            .entry(task.workflow_name.clone())
            .or_insert(0);
        *counter += 1;
        task.task_id = *counter;
        if task.create_time == 0 {
            task.create_time = chrono::Utc::now().timestamp();
        }
        let id = uuid::Uuid::new_v4().to_string();
        inner.records.push((id.clone(), task.clone()));
        Ok(id)
    }

    async fn list(&self, opt: &ListTaskOptions) -> Result<(Vec<WorkflowTask>, u64)> {
        let inner = self.inner.lock().expect("task store poisoned");
        let mut matched: Vec<WorkflowTask> = inner
            .records
            .iter()
            .filter(|(_, t)| {
                opt.workflow_name
                    .as_deref()
                    .is_none_or(|name| t.workflow_name == name)
            })
            .map(|(_, t)| t.clone())
            .collect();
        let total = matched.len() as u64;
        matched.sort_by_key(|t| std::cmp::Reverse(t.create_time));
        if opt.page_size > 0 {
            let skip = (opt.page_num.saturating_sub(1) * opt.page_size) as usize;
            matched = matched
                .into_iter()
                .skip(skip)
                .take(opt.page_size as usize)
                .collect();
        }
        Ok((matched, total))
    }

    async fn find_incomplete(&self) -> Result<Vec<WorkflowTask>> {
        let inner = self.inner.lock().expect("task store poisoned");
        let mut matched: Vec<WorkflowTask> = inner
            .records
            .iter()
            .filter(|(_, t)| {
                !t.is_deleted && matches!(t.status, Status::Created | Status::Running)
            })
            .map(|(_, t)| t.clone())
            .collect();
        matched.sort_by_key(|t| t.create_time);
        Ok(matched)
    }

    async fn find(&self, workflow_name: &str, task_id: i64) -> Result<WorkflowTask> {
        let inner = self.inner.lock().expect("task store poisoned");
        inner
            .records
            .iter()
            .find(|(_, t)| t.workflow_name == workflow_name && t.task_id == task_id)
            .map(|(_, t)| t.clone())
            .ok_or_else(|| StoreError::NotFound(format!("{workflow_name}/{task_id}")))
    }

    async fn find_by_id(&self, id: &str) -> Result<WorkflowTask> {
        let inner = self.inner.lock().expect("task store poisoned");
        inner
            .records
            .iter()
            .find(|(record_id, _)| record_id == id)
            .map(|(_, t)| t.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update(&self, task: &WorkflowTask) -> Result<()> {
        let mut inner = self.inner.lock().expect("task store poisoned");
        let slot = inner
            .records
            .iter_mut()
            .find(|(_, t)| t.workflow_name == task.workflow_name && t.task_id == task.task_id)
            .ok_or_else(|| {
                StoreError::NotFound(format!("{}/{}", task.workflow_name, task.task_id))
            })?;
        slot.1 = task.clone();
        Ok(())
    }

    async fn delete_by_workflow_name(&self, workflow_name: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("task store poisoned");
        for (_, task) in inner
            .records
            .iter_mut()
            .filter(|(_, t)| t.workflow_name == workflow_name)
        {
            task.is_deleted = true;
            task.is_archived = true;
        }
        Ok(())
    }

    async fn archive_history(&self, workflow_name: &str, remain: i64) -> Result<()> {
        let mut inner = self.inner.lock().expect("task store poisoned");
        let total = inner
            .records
            .iter()
            .filter(|(_, t)| t.workflow_name == workflow_name && !t.is_deleted)
            .count() as i64;
        let cutoff = total - remain + 1;
        for (_, task) in inner.records.iter_mut().filter(|(_, t)| {
            t.workflow_name == workflow_name && !t.is_deleted && t.task_id < cutoff
        }) {
            task.is_archived = true;
        }
        Ok(())
    }
}
