//! Deploy job compiler
//!
//! A deploy job takes its (service, module, image) bindings either from the
//! runtime service catalog or from a named upstream build job of the same
//! workflow, then fans out by the project's deploy mechanism: one task per
//! (service, module) pair for per-host deploys, one task per service with all
//! module images grouped for helm deploys.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use forge_core::domain::{
    DeployStepSpec, HelmDeployStepSpec, Job, JobTask, JobType, ModuleAndImage, ServiceAndImage,
    StepTask, StepType, WorkflowSpec,
};
use forge_core::spec_util::{decode_spec, encode_spec};
use forge_core::{CoreError, Result};

use super::{BuildJobSpec, CompileContext, DeployMechanism, JobCompiler};

/// Where a deploy job sources its image bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeploySource {
    /// Bindings authored against the live service catalog.
    #[default]
    Runtime,
    /// Bindings propagated from a named upstream build job's output.
    FromJob,
}

/// Typed spec of a deploy job declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployJobSpec {
    pub env: String,
    #[serde(default)]
    pub source: DeploySource,
    /// Name of the upstream build job when source is `FromJob`.
    #[serde(default)]
    pub job_name: String,
    #[serde(default)]
    pub deploy_mechanism: Option<DeployMechanism>,
    #[serde(default)]
    pub service_and_images: Vec<ServiceAndImage>,
}

pub struct DeployJob {
    ctx: CompileContext,
}

impl DeployJob {
    pub fn new(ctx: CompileContext) -> Self {
        Self { ctx }
    }

    /// Collects image bindings from the named upstream build job. Missing
    /// upstream references are fatal here: final compilation must produce a
    /// runnable graph or fail visibly.
    fn upstream_images(spec: &DeployJobSpec, workflow: &WorkflowSpec) -> Result<Vec<ServiceAndImage>> {
        let upstream = workflow
            .stages
            .iter()
            .flat_map(|stage| stage.jobs.iter())
            .find(|job| job.job_type == JobType::Build && job.name == spec.job_name)
            .ok_or_else(|| {
                CoreError::lookup(
                    "upstream build job",
                    &spec.job_name,
                    "not declared in this workflow",
                )
            })?;
        let build_spec: BuildJobSpec = decode_spec(&upstream.spec)?;
        Ok(build_spec
            .service_and_builds
            .iter()
            .map(|build| ServiceAndImage {
                service_name: build.service_name.clone(),
                service_module: build.service_module.clone(),
                image: build.image.clone(),
            })
            .collect())
    }

    /// Groups bindings by service name, preserving first-seen service order
    /// and per-service binding order.
    fn group_by_service(deploys: &[ServiceAndImage]) -> Vec<(String, Vec<ServiceAndImage>)> {
        let mut groups: Vec<(String, Vec<ServiceAndImage>)> = Vec::new();
        for deploy in deploys {
            match groups.iter_mut().find(|(name, _)| *name == deploy.service_name) {
                Some((_, members)) => members.push(deploy.clone()),
                None => groups.push((deploy.service_name.clone(), vec![deploy.clone()])),
            }
        }
        groups
    }
}

#[async_trait]
impl JobCompiler for DeployJob {
    fn instantiate(&self, job: &mut Job) -> Result<()> {
        let spec: DeployJobSpec = decode_spec(&job.spec)?;
        job.spec = encode_spec(&spec)?;
        Ok(())
    }

    async fn set_preset(&self, job: &mut Job, workflow: &WorkflowSpec) -> Result<()> {
        let mut spec: DeployJobSpec = decode_spec(&job.spec)?;

        match self.ctx.projects.deploy_mechanism(&workflow.project).await {
            Ok(mechanism) => spec.deploy_mechanism = Some(mechanism),
            Err(e) => warn!(project = %workflow.project, error = %e, "skip deploy mechanism preset"),
        }

        if spec.source == DeploySource::Runtime {
            match self.ctx.services.list_services(&workflow.project).await {
                Ok(services) => {
                    spec.service_and_images = services
                        .iter()
                        .flat_map(|service| {
                            service.modules.iter().map(|module| ServiceAndImage {
                                service_name: service.name.clone(),
                                service_module: module.clone(),
                                image: String::new(),
                            })
                        })
                        .collect();
                }
                Err(e) => {
                    warn!(project = %workflow.project, error = %e, "skip service expansion preset")
                }
            }
        }

        job.spec = encode_spec(&spec)?;
        Ok(())
    }

    fn merge_args(&self, job: &mut Job, args: &Job) -> Result<()> {
        if job.name != args.name || job.job_type != args.job_type {
            return Ok(());
        }
        let mut spec: DeployJobSpec = decode_spec(&job.spec)?;
        let args_spec: DeployJobSpec = decode_spec(&args.spec)?;
        // The trigger payload carries the user's binding selection.
        spec.service_and_images = args_spec.service_and_images;
        job.spec = encode_spec(&spec)?;
        Ok(())
    }

    async fn to_jobs(
        &self,
        job: &Job,
        workflow: &WorkflowSpec,
        _task_id: i64,
    ) -> Result<Vec<JobTask>> {
        let mut spec: DeployJobSpec = decode_spec(&job.spec)?;

        let cluster_id = self
            .ctx
            .clusters
            .env_cluster(&workflow.project, &spec.env)
            .await?;

        if spec.source == DeploySource::FromJob {
            spec.service_and_images
                .extend(Self::upstream_images(&spec, workflow)?);
        }

        let mechanism = spec.deploy_mechanism.ok_or_else(|| {
            CoreError::lookup("deploy mechanism", &workflow.project, "unresolved; run presets first")
        })?;

        let mut resp = Vec::new();
        match mechanism {
            DeployMechanism::PerHost => {
                for deploy in &spec.service_and_images {
                    let mut task = JobTask::new(
                        format!(
                            "{}-{}-{}",
                            job.name, deploy.service_name, deploy.service_module
                        ),
                        JobType::Deploy,
                    );
                    let step_spec = DeployStepSpec {
                        env: spec.env.clone(),
                        service_name: deploy.service_name.clone(),
                        service_module: deploy.service_module.clone(),
                        cluster_id: cluster_id.clone(),
                        image: deploy.image.clone(),
                    };
                    task.steps.push(StepTask::new(
                        format!("{}-deploy", deploy.service_name),
                        &task.name,
                        StepType::Deploy,
                        &step_spec,
                    )?);
                    resp.push(task);
                }
            }
            DeployMechanism::Helm => {
                for (service_name, deploys) in Self::group_by_service(&spec.service_and_images) {
                    let mut task =
                        JobTask::new(format!("{}-{}", job.name, service_name), JobType::Deploy);
                    let step_spec = HelmDeployStepSpec {
                        env: spec.env.clone(),
                        service_name: service_name.clone(),
                        cluster_id: cluster_id.clone(),
                        images: deploys
                            .iter()
                            .map(|deploy| ModuleAndImage {
                                service_module: deploy.service_module.clone(),
                                image: deploy.image.clone(),
                            })
                            .collect(),
                    };
                    task.steps.push(StepTask::new(
                        format!("{service_name}-deploy"),
                        &task.name,
                        StepType::HelmDeploy,
                        &step_spec,
                    )?);
                    resp.push(task);
                }
            }
        }

        Ok(resp)
    }
}
