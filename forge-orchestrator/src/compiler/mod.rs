//! Job compiler
//!
//! Each job variant implements one contract with four operations:
//! - `instantiate`: decode the loosely-typed authored spec into the variant's
//!   typed spec (fatal on schema mismatch)
//! - `set_preset`: enrich the typed spec with defaults resolved from live
//!   catalogs; optional enrichment that fails to resolve is logged and
//!   skipped, never fatal
//! - `merge_args`: fold user-submitted trigger overrides into the spec; a
//!   non-matching override job is a silent no-op
//! - `to_jobs`: compile into one or more executable job tasks; any missing
//!   reference here aborts compilation of that job with a descriptive error
//!
//! The preset/compile asymmetry is deliberate: presets populate editable
//! defaults, final compilation must produce a runnable graph or fail visibly.

pub mod build;
pub mod catalog;
pub mod deploy;
pub mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use forge_core::Result;
use forge_core::domain::{
    Job, JobTask, JobType, KeyVal, Repository, StageTask, WorkflowSpec, WorkflowTask,
};

pub use build::{BuildJob, BuildJobSpec};
pub use catalog::{
    ClusterCatalog, ClusterInfo, DeployMechanism, ProjectCatalog, ServiceCatalog, ServiceInfo,
    StorageCatalog, TestingCatalog, TestingDefinition,
};
pub use deploy::{DeployJob, DeployJobSpec, DeploySource};
pub use testing::{TestModule, TestingJob, TestingJobSpec};

// Line-continuation markers joined away before scripts are split into lines.
const WRAP_LINE_LF: &str = "\\\n";
const WRAP_LINE_CRLF: &str = "\\\r\n";

/// Shared contract implemented by every job variant compiler.
#[async_trait]
pub trait JobCompiler: Send + Sync {
    /// Decodes the raw authored spec into the variant's typed spec and writes
    /// the normalized form back onto the job.
    fn instantiate(&self, job: &mut Job) -> Result<()>;

    /// Enriches the spec with defaults resolved from live catalogs.
    async fn set_preset(&self, job: &mut Job, workflow: &WorkflowSpec) -> Result<()>;

    /// Merges a user-submitted override declaration into the spec. Only
    /// applies when both job name and job type match.
    fn merge_args(&self, job: &mut Job, args: &Job) -> Result<()>;

    /// Compiles the declaration into executable job tasks for one trigger.
    async fn to_jobs(
        &self,
        job: &Job,
        workflow: &WorkflowSpec,
        task_id: i64,
    ) -> Result<Vec<JobTask>>;
}

/// Generates the random suffix appended to compiled task names.
///
/// Injected so tests can pin a deterministic generator; the production
/// default draws from a v4 UUID.
pub trait NameSuffixer: Send + Sync {
    fn suffix(&self) -> String;
}

/// Production suffixer: first five hex chars of a fresh v4 UUID.
pub struct RandomSuffixer;

impl NameSuffixer for RandomSuffixer {
    fn suffix(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()[..5].to_string()
    }
}

/// Fixed suffixer for deterministic compilation in tests.
pub struct FixedSuffixer(pub &'static str);

impl NameSuffixer for FixedSuffixer {
    fn suffix(&self) -> String {
        self.0.to_string()
    }
}

/// Everything a variant compiler needs besides the job itself.
#[derive(Clone)]
pub struct CompileContext {
    pub projects: Arc<dyn ProjectCatalog>,
    pub services: Arc<dyn ServiceCatalog>,
    pub clusters: Arc<dyn ClusterCatalog>,
    pub testings: Arc<dyn TestingCatalog>,
    pub storage: Arc<dyn StorageCatalog>,
    pub suffixer: Arc<dyn NameSuffixer>,
    /// Base address used to construct BUILD_URL values.
    pub system_address: String,
}

/// Returns the compiler for a job type. The variant set is closed; adding a
/// variant forces this match to be extended.
pub fn compiler_for(job_type: JobType, ctx: CompileContext) -> Box<dyn JobCompiler> {
    match job_type {
        JobType::Build => Box::new(BuildJob::new(ctx)),
        JobType::Deploy => Box::new(DeployJob::new(ctx)),
        JobType::Testing => Box::new(TestingJob::new(ctx)),
    }
}

/// Merges user-submitted override jobs into a workflow template. Overrides
/// that match no declared job (by name and type) are silently ignored.
pub fn merge_workflow_args(
    workflow: &mut WorkflowSpec,
    user_jobs: &[Job],
    ctx: &CompileContext,
) -> Result<()> {
    for stage in &mut workflow.stages {
        for job in &mut stage.jobs {
            let compiler = compiler_for(job.job_type, ctx.clone());
            for user_job in user_jobs {
                compiler.merge_args(job, user_job)?;
            }
        }
    }
    Ok(())
}

/// Populates presets for every job of a workflow template.
pub async fn set_workflow_presets(workflow: &mut WorkflowSpec, ctx: &CompileContext) -> Result<()> {
    let snapshot = workflow.clone();
    for stage in &mut workflow.stages {
        for job in &mut stage.jobs {
            let compiler = compiler_for(job.job_type, ctx.clone());
            compiler.set_preset(job, &snapshot).await?;
        }
    }
    Ok(())
}

/// Compiles a workflow template into a run snapshot, stage by stage.
pub async fn compile_workflow_task(
    workflow: &WorkflowSpec,
    task_id: i64,
    ctx: &CompileContext,
) -> Result<WorkflowTask> {
    let mut task = WorkflowTask::new(&workflow.name, &workflow.project);
    task.task_id = task_id;
    for stage in &workflow.stages {
        let mut jobs = Vec::new();
        for job in &stage.jobs {
            let compiler = compiler_for(job.job_type, ctx.clone());
            jobs.extend(compiler.to_jobs(job, workflow, task_id).await?);
        }
        task.stages.push(StageTask::new(&stage.name, jobs));
    }
    Ok(task)
}

// =============================================================================
// Shared compilation helpers
// =============================================================================

/// Merges repository lists by identity key. Entries from `overrides` replace
/// base entries with the same identity in place; override-only entries are
/// appended after the base list.
pub fn merge_repos(base: &[Repository], overrides: &[Repository]) -> Vec<Repository> {
    let mut merged: Vec<Repository> = base.to_vec();
    for over in overrides {
        match merged.iter_mut().find(|r| r.identity() == over.identity()) {
            Some(slot) => *slot = over.clone(),
            None => merged.push(over.clone()),
        }
    }
    merged
}

/// Renders key/value defaults with user overrides taking precedence. The
/// result keeps the default list's keys and order; override-only keys are
/// dropped.
pub fn render_key_vals(overrides: &[KeyVal], defaults: &[KeyVal]) -> Vec<KeyVal> {
    defaults
        .iter()
        .map(|kv| {
            overrides
                .iter()
                .find(|o| o.key == kv.key)
                .cloned()
                .unwrap_or_else(|| kv.clone())
        })
        .collect()
}

/// Renders `$KEY` / `${KEY}` references in a template string against the
/// assembled environment. Longer keys substitute first so a key is never
/// shadowed by one of its prefixes.
pub fn render_env(template: &str, envs: &[KeyVal]) -> String {
    let mut keys: Vec<&KeyVal> = envs.iter().collect();
    keys.sort_by_key(|kv| std::cmp::Reverse(kv.key.len()));
    let mut rendered = template.to_string();
    for kv in keys {
        rendered = rendered.replace(&format!("${{{}}}", kv.key), &kv.value);
        rendered = rendered.replace(&format!("${}", kv.key), &kv.value);
    }
    rendered
}

/// Normalizes a script body: joins backslash-continued lines, then splits
/// into discrete lines.
pub fn normalize_script(script: &str) -> Vec<String> {
    script
        .replace(WRAP_LINE_CRLF, "")
        .replace(WRAP_LINE_LF, "")
        .split('\n')
        .map(|line| line.to_string())
        .collect()
}

/// Formats a compiled task name: lowercase, runs of characters outside
/// `[a-z0-9-]` collapsed to a single dash, no leading/trailing dash.
pub fn job_name_format(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true;
    for ch in name.to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Environment variables derived from the source repositories of a task.
pub fn repo_variables(repos: &[Repository]) -> Vec<KeyVal> {
    let mut vars = Vec::new();
    for (i, repo) in repos.iter().enumerate() {
        let prefix = repo_env_name(&repo.repo_name);
        vars.push(KeyVal::new(format!("REPONAME_{i}"), &repo.repo_name));
        vars.push(KeyVal::new(format!("{prefix}_BRANCH"), &repo.branch));
        vars.push(KeyVal::new(format!("{prefix}_COMMIT_ID"), &repo.commit_id));
        if repo.pr > 0 {
            vars.push(KeyVal::new(format!("{prefix}_PR"), repo.pr.to_string()));
        }
    }
    vars
}

/// Fixed variables every compiled task receives.
pub fn fixed_task_variables(
    task_id: i64,
    project: &str,
    workflow_name: &str,
    system_address: &str,
) -> Vec<KeyVal> {
    let build_url = format!(
        "{system_address}/v1/projects/detail/{project}/pipelines/custom/{workflow_name}/{task_id}"
    );
    vec![
        KeyVal::new("TASK_ID", task_id.to_string()),
        KeyVal::new("PROJECT", project),
        KeyVal::new("WORKFLOW", workflow_name),
        KeyVal::new("CI", "true"),
        KeyVal::new("ZADIG", "true"),
        KeyVal::new("BUILD_URL", build_url),
    ]
}

fn repo_env_name(repo_name: &str) -> String {
    repo_name
        .to_uppercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
