//! Domain types shared between the orchestrator (compiles, schedules,
//! persists) and the runner (executes).

pub mod status;
pub mod step;
pub mod workflow;

pub use status::Status;
pub use step::{
    ArchiveStepSpec, CacheMedium, CacheSettings, DeployStepSpec, GitStepSpec, HelmDeployStepSpec,
    KeyVal, ModuleAndImage, NfsProperties, ObjectStorageInfo, Repository, ShellStepSpec, StepTask,
    StepType, Tool, ToolInstallStepSpec, Upload,
};
pub use workflow::{
    Job, JobTask, JobTaskProperties, JobType, ServiceAndBuild, ServiceAndImage, StageSpec,
    StageTask, WorkflowSpec, WorkflowTask,
};
