//! Workflow domain types
//!
//! Two layers share these types:
//! - the *template* layer (`WorkflowSpec`/`StageSpec`/`Job`) authored once per
//!   workflow and optionally overridden at trigger time;
//! - the *run* layer (`WorkflowTask`/`StageTask`/`JobTask`) produced by the
//!   job compiler for a single trigger and mutated by the controller.
//!
//! Job and step specs are raw values until a variant compiler or step runner
//! decodes them; the type tag says which schema applies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::status::Status;
use super::step::{CacheSettings, KeyVal, StepTask};

/// Job kind tag. Closed set: the compiler dispatches over it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Build,
    Deploy,
    Testing,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Build => "build",
            JobType::Deploy => "deploy",
            JobType::Testing => "testing",
        }
    }
}

/// A declared unit of work inside a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub job_type: JobType,
    /// Type-specific payload; loosely typed as authored.
    pub spec: Value,
}

/// An ordered grouping of jobs executed as a sequential barrier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub jobs: Vec<Job>,
}

/// A named, versioned pipeline template composed of ordered stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    pub project: String,
    pub stages: Vec<StageSpec>,
}

/// (service, module, image) triple used by deploy jobs. Produced either from
/// a service catalog lookup or propagated from an upstream build job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAndImage {
    pub service_name: String,
    pub service_module: String,
    #[serde(default)]
    pub image: String,
}

/// A build target declared by a build job; its image is the build output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAndBuild {
    pub service_name: String,
    pub service_module: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub repos: Vec<super::step::Repository>,
    #[serde(default)]
    pub key_vals: Vec<KeyVal>,
}

/// Execution-environment properties of a compiled job task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobTaskProperties {
    #[serde(default)]
    pub timeout: i64,
    #[serde(default)]
    pub custom_envs: Vec<KeyVal>,
    #[serde(default)]
    pub envs: Vec<KeyVal>,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub cache_enable: bool,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub cache_user_dir: String,
}

/// The executable unit produced by compiling one job declaration. Job tasks
/// are recomputed per trigger and never outlive their parent workflow task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTask {
    pub name: String,
    pub job_type: JobType,
    pub status: Status,
    /// Timeout in seconds; 0 means no per-task timeout.
    pub timeout: i64,
    #[serde(default)]
    pub error: Option<String>,
    pub steps: Vec<StepTask>,
    #[serde(default)]
    pub properties: JobTaskProperties,
}

impl JobTask {
    pub fn new(name: impl Into<String>, job_type: JobType) -> Self {
        Self {
            name: name.into(),
            job_type,
            status: Status::Created,
            timeout: 0,
            error: None,
            steps: Vec::new(),
            properties: JobTaskProperties::default(),
        }
    }
}

/// A stage of a run: compiled job tasks plus a status derived from them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTask {
    pub name: String,
    pub status: Status,
    pub jobs: Vec<JobTask>,
}

impl StageTask {
    pub fn new(name: impl Into<String>, jobs: Vec<JobTask>) -> Self {
        Self {
            name: name.into(),
            status: Status::Created,
            jobs,
        }
    }
}

/// One execution instance of a named workflow.
///
/// (workflow_name, task_id) is unique; task ids are assigned at creation,
/// increase monotonically per workflow and are never reused. Tasks are never
/// physically deleted, only soft-deleted/archived by retention policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub workflow_name: String,
    pub task_id: i64,
    pub project: String,
    pub status: Status,
    pub stages: Vec<StageTask>,
    /// Unix seconds; 0 until the run starts/ends.
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_archived: bool,
}

impl WorkflowTask {
    pub fn new(workflow_name: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            task_id: 0,
            project: project.into(),
            status: Status::Created,
            stages: Vec::new(),
            start_time: 0,
            end_time: 0,
            create_time: chrono::Utc::now().timestamp(),
            is_deleted: false,
            is_archived: false,
        }
    }

    /// Derives the workflow status from its stages by the priority rule.
    pub fn derive_status(&self) -> Status {
        super::status::aggregate_statuses(self.stages.iter().map(|s| s.status))
    }
}
