//! Workflow controller
//!
//! Drives one workflow task from `Running` to a terminal state: stages run
//! strictly sequentially, jobs within a stage run concurrently under a
//! caller-supplied bound, and the first stage that ends in anything but
//! `Passed` causes every remaining stage to be skipped. Cancellation is
//! cooperative through a token registered in the shared [`CancelRegistry`]
//! for the lifetime of the run; a per-job timeout cancels that job's subtree
//! only. Progress snapshots are pushed through a persistence port at
//! run-start, stage boundaries and run-end, best effort.

pub mod cancel;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use forge_core::CoreError;
use forge_core::domain::{JobTask, Status, StageTask, WorkflowTask, status::aggregate_statuses};

pub use cancel::{CancelError, CancelRegistry};

/// Port through which compiled job tasks reach a worker, locally or remote.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Runs one job task to completion, observing the cancellation token.
    /// Implementations may update step-level state on the task in place.
    async fn run_job(
        &self,
        job: &mut JobTask,
        cancel: &CancellationToken,
    ) -> forge_core::Result<()>;
}

/// Persistence port called at defined lifecycle points. Writes are
/// best-effort snapshots (at-least-once); failures are logged, never fatal.
#[async_trait]
pub trait TaskPersister: Send + Sync {
    async fn ack(&self, task: &WorkflowTask) -> anyhow::Result<()>;
}

/// Controller for a single workflow task run.
pub struct WorkflowController {
    task: WorkflowTask,
    registry: Arc<CancelRegistry>,
    persister: Arc<dyn TaskPersister>,
    executor: Arc<dyn JobExecutor>,
}

impl WorkflowController {
    pub fn new(
        task: WorkflowTask,
        registry: Arc<CancelRegistry>,
        persister: Arc<dyn TaskPersister>,
        executor: Arc<dyn JobExecutor>,
    ) -> Self {
        Self {
            task,
            registry,
            persister,
            executor,
        }
    }

    pub fn task(&self) -> &WorkflowTask {
        &self.task
    }

    pub fn into_task(self) -> WorkflowTask {
        self.task
    }

    /// Runs the workflow to a terminal state and returns it.
    ///
    /// `concurrency` bounds how many jobs of one stage execute in parallel.
    pub async fn run(&mut self, concurrency: usize) -> Status {
        self.task.status = Status::Running;
        self.task.start_time = chrono::Utc::now().timestamp();
        self.ack().await;
        info!(
            workflow = %self.task.workflow_name,
            task_id = self.task.task_id,
            "start workflow"
        );

        let token = self
            .registry
            .register(&self.task.workflow_name, self.task.task_id);

        let mut halted = false;
        for i in 0..self.task.stages.len() {
            if halted {
                skip_stage(&mut self.task.stages[i]);
                continue;
            }
            Self::run_stage(
                &mut self.task.stages[i],
                self.executor.clone(),
                &token,
                concurrency,
            )
            .await;
            if self.task.stages[i].status != Status::Passed {
                halted = true;
            }
            self.ack().await;
        }

        self.task.status = self.task.derive_status();
        self.task.end_time = chrono::Utc::now().timestamp();
        self.registry
            .remove(&self.task.workflow_name, self.task.task_id);
        self.ack().await;
        info!(
            workflow = %self.task.workflow_name,
            task_id = self.task.task_id,
            status = %self.task.status,
            "finish workflow"
        );
        self.task.status
    }

    async fn run_stage(
        stage: &mut StageTask,
        executor: Arc<dyn JobExecutor>,
        token: &CancellationToken,
        concurrency: usize,
    ) {
        stage.status = Status::Running;
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

        let jobs = std::mem::take(&mut stage.jobs);
        let mut slots: Vec<JobTask> = jobs
            .iter()
            .map(|job| {
                let mut fallback = job.clone();
                fallback.status = Status::Failed;
                fallback.error = Some("job task panicked".to_string());
                fallback
            })
            .collect();

        let mut handles = Vec::with_capacity(jobs.len());
        for (idx, mut job) in jobs.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let executor = executor.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("stage semaphore closed");
                Self::run_job(&mut job, executor.as_ref(), &token).await;
                (idx, job)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((idx, job)) => slots[idx] = job,
                Err(e) => warn!("job task panicked: {e}"),
            }
        }
        stage.jobs = slots;
        stage.status = aggregate_statuses(stage.jobs.iter().map(|j| j.status));
    }

    async fn run_job(job: &mut JobTask, executor: &dyn JobExecutor, token: &CancellationToken) {
        if token.is_cancelled() {
            job.status = Status::Cancelled;
            return;
        }
        job.status = Status::Running;

        // Child token: a per-job timeout must look like a cancellation to
        // this job's subtree without touching sibling jobs.
        let job_token = token.child_token();
        let result = if job.timeout > 0 {
            let deadline = Duration::from_secs(job.timeout as u64);
            match timeout(deadline, executor.run_job(job, &job_token)).await {
                Ok(result) => result,
                Err(_) => {
                    job_token.cancel();
                    Err(CoreError::Timeout(job.timeout))
                }
            }
        } else {
            executor.run_job(job, &job_token).await
        };

        match result {
            Ok(()) => job.status = Status::Passed,
            Err(e) => {
                job.status = e.terminal_status();
                job.error = Some(e.to_string());
            }
        }
    }

    async fn ack(&self) {
        if let Err(e) = self.persister.ack(&self.task).await {
            warn!(
                workflow = %self.task.workflow_name,
                task_id = self.task.task_id,
                "ack failed: {e:#}"
            );
        }
    }
}

fn skip_stage(stage: &mut StageTask) {
    stage.status = Status::Skipped;
    for job in &mut stage.jobs {
        job.status = Status::Skipped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::domain::JobType;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted executor: behavior keyed by job name.
    #[derive(Default)]
    struct FakeExecutor {
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    #[async_trait]
    impl JobExecutor for FakeExecutor {
        async fn run_job(
            &self,
            job: &mut JobTask,
            cancel: &CancellationToken,
        ) -> forge_core::Result<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            let result = match job.name.as_str() {
                name if name.starts_with("fail") => {
                    Err(CoreError::execution("shell", "exit status 1"))
                }
                name if name.starts_with("block") => {
                    cancel.cancelled().await;
                    Err(CoreError::Cancelled)
                }
                _ => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(())
                }
            };
            self.running.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    #[derive(Default)]
    struct RecordingPersister {
        acks: Mutex<Vec<Status>>,
    }

    #[async_trait]
    impl TaskPersister for RecordingPersister {
        async fn ack(&self, task: &WorkflowTask) -> anyhow::Result<()> {
            self.acks.lock().unwrap().push(task.status);
            Ok(())
        }
    }

    fn job(name: &str, timeout: i64) -> JobTask {
        let mut job = JobTask::new(name, JobType::Testing);
        job.timeout = timeout;
        job
    }

    fn task_with_stages(stages: Vec<(&str, Vec<JobTask>)>) -> WorkflowTask {
        let mut task = WorkflowTask::new("nightly", "acme");
        task.task_id = 1;
        task.stages = stages
            .into_iter()
            .map(|(name, jobs)| StageTask::new(name, jobs))
            .collect();
        task
    }

    fn controller(
        task: WorkflowTask,
        registry: Arc<CancelRegistry>,
        persister: Arc<RecordingPersister>,
        executor: Arc<FakeExecutor>,
    ) -> WorkflowController {
        WorkflowController::new(task, registry, persister, executor)
    }

    #[tokio::test]
    async fn test_all_passed_run() {
        let persister = Arc::new(RecordingPersister::default());
        let task = task_with_stages(vec![
            ("build", vec![job("ok-1", 0), job("ok-2", 0)]),
            ("test", vec![job("ok-3", 0)]),
        ]);
        let mut ctl = controller(
            task,
            Arc::new(CancelRegistry::new()),
            persister.clone(),
            Arc::new(FakeExecutor::default()),
        );
        let status = ctl.run(4).await;
        assert_eq!(status, Status::Passed);
        let task = ctl.task();
        assert!(task.stages.iter().all(|s| s.status == Status::Passed));
        assert!(task.start_time > 0 && task.end_time >= task.start_time);

        let acks = persister.acks.lock().unwrap();
        assert_eq!(*acks.first().unwrap(), Status::Running);
        assert_eq!(*acks.last().unwrap(), Status::Passed);
    }

    #[tokio::test]
    async fn test_failure_skips_remaining_stages() {
        let task = task_with_stages(vec![
            ("build", vec![job("ok-1", 0)]),
            ("test", vec![job("fail-1", 0), job("ok-2", 0)]),
            ("deploy", vec![job("ok-3", 0)]),
        ]);
        let mut ctl = controller(
            task,
            Arc::new(CancelRegistry::new()),
            Arc::new(RecordingPersister::default()),
            Arc::new(FakeExecutor::default()),
        );
        let status = ctl.run(4).await;
        assert_eq!(status, Status::Failed);

        let stages = &ctl.task().stages;
        assert_eq!(stages[0].status, Status::Passed);
        assert_eq!(stages[1].status, Status::Failed);
        assert_eq!(stages[2].status, Status::Skipped);
        assert_eq!(stages[2].jobs[0].status, Status::Skipped);

        let failed = &stages[1].jobs[0];
        assert_eq!(failed.status, Status::Failed);
        assert!(failed.error.as_deref().unwrap().contains("exit status 1"));
        // The sibling still ran to completion.
        assert_eq!(stages[1].jobs[1].status, Status::Passed);
    }

    #[tokio::test]
    async fn test_timeout_does_not_abort_siblings() {
        let task = task_with_stages(vec![(
            "test",
            vec![job("block-slow", 1), job("ok-fast", 0)],
        )]);
        let mut ctl = controller(
            task,
            Arc::new(CancelRegistry::new()),
            Arc::new(RecordingPersister::default()),
            Arc::new(FakeExecutor::default()),
        );
        let status = ctl.run(4).await;
        assert_eq!(status, Status::Timeout);

        let stage = &ctl.task().stages[0];
        assert_eq!(stage.jobs[0].status, Status::Timeout);
        assert_eq!(stage.jobs[1].status, Status::Passed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_running_workflow() {
        let registry = Arc::new(CancelRegistry::new());
        let task = task_with_stages(vec![("test", vec![job("block-1", 0), job("block-2", 0)])]);
        let mut ctl = controller(
            task,
            registry.clone(),
            Arc::new(RecordingPersister::default()),
            Arc::new(FakeExecutor::default()),
        );

        let handle = tokio::spawn(async move {
            let status = ctl.run(4).await;
            (status, ctl.into_task())
        });

        // Wait for the run to register itself, then trigger cancellation.
        while !registry.contains("nightly", 1) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        registry.cancel("nightly", 1).unwrap();

        let (status, task) = handle.await.unwrap();
        assert_eq!(status, Status::Cancelled);
        assert!(task.stages[0].jobs.iter().all(|j| j.status == Status::Cancelled));
        // Terminal runs leave no stale registration behind.
        assert!(!registry.contains("nightly", 1));
        assert!(registry.cancel("nightly", 1).is_err());
    }

    #[tokio::test]
    async fn test_concurrency_bound_is_respected() {
        let executor = Arc::new(FakeExecutor::default());
        let task = task_with_stages(vec![(
            "test",
            vec![job("ok-1", 0), job("ok-2", 0), job("ok-3", 0)],
        )]);
        let mut ctl = controller(
            task,
            Arc::new(CancelRegistry::new()),
            Arc::new(RecordingPersister::default()),
            executor.clone(),
        );
        ctl.run(1).await;
        assert_eq!(executor.max_running.load(Ordering::SeqCst), 1);
    }
}
