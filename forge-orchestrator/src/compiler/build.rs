//! Build job compiler
//!
//! A build job declares one target per (service, module) pair and compiles to
//! one task per target: tool installation, source fetch, then the build
//! script with the target's image reference exported to the environment.
//! Deploy jobs reference a build job by name to propagate these images.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use forge_core::domain::{
    GitStepSpec, Job, JobTask, JobType, KeyVal, ServiceAndBuild, ShellStepSpec, StepTask, StepType,
    Tool, WorkflowSpec,
};
use forge_core::spec_util::{decode_spec, encode_spec};
use forge_core::Result;

use super::{
    CompileContext, JobCompiler, fixed_task_variables, job_name_format, merge_repos,
    normalize_script, render_key_vals, repo_variables,
};

/// Typed spec of a build job declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildJobSpec {
    pub service_and_builds: Vec<ServiceAndBuild>,
    /// Script body shared by every build target.
    #[serde(default)]
    pub scripts: String,
    #[serde(default)]
    pub installs: Vec<Tool>,
    /// Timeout in seconds per compiled build task.
    #[serde(default)]
    pub timeout: i64,
}

pub struct BuildJob {
    ctx: CompileContext,
}

impl BuildJob {
    pub fn new(ctx: CompileContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobCompiler for BuildJob {
    fn instantiate(&self, job: &mut Job) -> Result<()> {
        let spec: BuildJobSpec = decode_spec(&job.spec)?;
        job.spec = encode_spec(&spec)?;
        Ok(())
    }

    async fn set_preset(&self, job: &mut Job, _workflow: &WorkflowSpec) -> Result<()> {
        // Build targets are fully authored in the template; nothing external
        // to resolve. Normalize the stored spec.
        self.instantiate(job)
    }

    fn merge_args(&self, job: &mut Job, args: &Job) -> Result<()> {
        if job.name != args.name || job.job_type != args.job_type {
            return Ok(());
        }
        let mut spec: BuildJobSpec = decode_spec(&job.spec)?;
        let args_spec: BuildJobSpec = decode_spec(&args.spec)?;
        for target in &mut spec.service_and_builds {
            if let Some(args_target) = args_spec.service_and_builds.iter().find(|t| {
                t.service_name == target.service_name && t.service_module == target.service_module
            }) {
                target.repos = merge_repos(&target.repos, &args_target.repos);
                target.key_vals = render_key_vals(&args_target.key_vals, &target.key_vals);
                if !args_target.image.is_empty() {
                    target.image = args_target.image.clone();
                }
            }
        }
        job.spec = encode_spec(&spec)?;
        Ok(())
    }

    async fn to_jobs(
        &self,
        job: &Job,
        workflow: &WorkflowSpec,
        task_id: i64,
    ) -> Result<Vec<JobTask>> {
        let spec: BuildJobSpec = decode_spec(&job.spec)?;
        let storage = self.ctx.storage.find_default().await?;

        let mut resp = Vec::new();
        for target in &spec.service_and_builds {
            let name = job_name_format(&format!(
                "{}-{}-{}-{}",
                job.name,
                target.service_name,
                target.service_module,
                self.ctx.suffixer.suffix()
            ));
            let mut task = JobTask::new(&name, JobType::Build);
            task.timeout = spec.timeout;
            task.properties.timeout = spec.timeout;

            let mut envs = target.key_vals.clone();
            envs.extend(repo_variables(&target.repos));
            envs.extend(fixed_task_variables(
                task_id,
                &workflow.project,
                &workflow.name,
                &self.ctx.system_address,
            ));
            envs.push(KeyVal::new("SERVICE", &target.service_name));
            envs.push(KeyVal::new("SERVICE_MODULE", &target.service_module));
            envs.push(KeyVal::new("IMAGE", &target.image));
            task.properties.envs = envs;

            let tool_spec = forge_core::domain::ToolInstallStepSpec {
                installs: spec.installs.clone(),
                storage: storage.clone(),
            };
            task.steps.push(StepTask::new(
                format!("{}-tool-install", target.service_name),
                &name,
                StepType::ToolInstall,
                &tool_spec,
            )?);

            let git_spec = GitStepSpec {
                repos: target.repos.clone(),
            };
            task.steps.push(StepTask::new(
                format!("{}-git", target.service_name),
                &name,
                StepType::Git,
                &git_spec,
            )?);

            let shell_spec = ShellStepSpec {
                scripts: normalize_script(&spec.scripts),
            };
            task.steps.push(StepTask::new(
                format!("{}-shell", target.service_name),
                &name,
                StepType::Shell,
                &shell_spec,
            )?);

            resp.push(task);
        }
        Ok(resp)
    }
}
