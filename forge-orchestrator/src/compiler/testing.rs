//! Testing job compiler
//!
//! A testing job fans out into one task per test module. Each compiled task
//! runs, in fixed order: tool installation, source fetch, the test script,
//! an HTML report archive when the definition declares a report path, and an
//! artifact archive. Preset population is tolerant of deleted test
//! definitions; final compilation is not.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use forge_core::domain::{
    ArchiveStepSpec, CacheMedium, GitStepSpec, Job, JobTask, JobType, KeyVal, Repository,
    ShellStepSpec, StepTask, StepType, ToolInstallStepSpec, Upload, WorkflowSpec,
};
use forge_core::spec_util::{decode_spec, encode_spec};
use forge_core::Result;

use super::{
    CompileContext, JobCompiler, TestingDefinition, fixed_task_variables, job_name_format,
    merge_repos, normalize_script, render_env, render_key_vals, repo_variables,
};

/// One test module referenced by a testing job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestModule {
    pub test_name: String,
    #[serde(default)]
    pub repos: Vec<Repository>,
    #[serde(default)]
    pub key_vals: Vec<KeyVal>,
}

/// Typed spec of a testing job declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestingJobSpec {
    pub test_modules: Vec<TestModule>,
}

pub struct TestingJob {
    ctx: CompileContext,
}

impl TestingJob {
    pub fn new(ctx: CompileContext) -> Self {
        Self { ctx }
    }

    async fn compile_module(
        &self,
        job: &Job,
        workflow: &WorkflowSpec,
        task_id: i64,
        module: &TestModule,
    ) -> Result<JobTask> {
        let info: TestingDefinition = self.ctx.testings.find(&module.test_name).await?;
        let cluster = self.ctx.clusters.get(&info.cluster_id).await?;
        let storage = self.ctx.storage.find_default().await?;

        let name = job_name_format(&format!(
            "{}-{}-{}",
            module.test_name,
            job.name,
            self.ctx.suffixer.suffix()
        ));
        let mut task = JobTask::new(&name, JobType::Testing);
        task.timeout = info.timeout;
        task.properties.timeout = info.timeout;
        task.properties.cluster_id = info.cluster_id.clone();
        task.properties.custom_envs = render_key_vals(&module.key_vals, &info.envs);

        match cluster.cache.medium {
            None => task.properties.cache_enable = false,
            Some(_) => {
                task.properties.cache = cluster.cache.clone();
                task.properties.cache_enable = info.cache_enable;
                task.properties.cache_user_dir = info.cache_user_dir.clone();
            }
        }

        let repos = merge_repos(&info.repos, &module.repos);

        let mut envs = task.properties.custom_envs.clone();
        envs.extend(repo_variables(&repos));
        envs.extend(fixed_task_variables(
            task_id,
            &workflow.project,
            &workflow.name,
            &self.ctx.system_address,
        ));
        task.properties.envs = envs;

        // NFS-backed caches carry env-templated paths; render them against
        // the assembled variables before the task ships to a worker.
        if task.properties.cache_enable
            && task.properties.cache.medium == Some(CacheMedium::NetworkFilesystem)
        {
            task.properties.cache_user_dir =
                render_env(&task.properties.cache_user_dir, &task.properties.envs);
            task.properties.cache.nfs.subpath =
                render_env(&task.properties.cache.nfs.subpath, &task.properties.envs);
        }

        let tool_spec = ToolInstallStepSpec {
            installs: info.installs.clone(),
            storage: storage.clone(),
        };
        task.steps.push(StepTask::new(
            format!("{}-tool-install", module.test_name),
            &name,
            StepType::ToolInstall,
            &tool_spec,
        )?);

        let git_spec = GitStepSpec { repos };
        task.steps.push(StepTask::new(
            format!("{}-git", module.test_name),
            &name,
            StepType::Git,
            &git_spec,
        )?);

        let shell_spec = ShellStepSpec {
            scripts: normalize_script(&info.scripts),
        };
        task.steps.push(StepTask::new(
            format!("{}-shell", module.test_name),
            &name,
            StepType::Shell,
            &shell_spec,
        )?);

        if !info.test_report_path.is_empty() {
            let report_spec = ArchiveStepSpec {
                uploads: vec![Upload {
                    file_path: info.test_report_path.clone(),
                    destination_path: format!("{}/{}/test", workflow.name, task_id),
                    optional: false,
                }],
                storage: storage.clone(),
            };
            task.steps.push(StepTask::new(
                format!("{}-archive-html-report", module.test_name),
                &name,
                StepType::Archive,
                &report_spec,
            )?);
        }

        let artifact_spec = ArchiveStepSpec {
            uploads: info
                .artifact_paths
                .iter()
                .map(|artifact| Upload {
                    file_path: artifact.clone(),
                    destination_path: format!("{}/{}/artifact", workflow.name, task_id),
                    optional: true,
                })
                .collect(),
            storage,
        };
        task.steps.push(StepTask::new(
            format!("{}-archive-result", module.test_name),
            &name,
            StepType::Archive,
            &artifact_spec,
        )?);

        Ok(task)
    }
}

#[async_trait]
impl JobCompiler for TestingJob {
    fn instantiate(&self, job: &mut Job) -> Result<()> {
        let spec: TestingJobSpec = decode_spec(&job.spec)?;
        job.spec = encode_spec(&spec)?;
        Ok(())
    }

    async fn set_preset(&self, job: &mut Job, _workflow: &WorkflowSpec) -> Result<()> {
        let mut spec: TestingJobSpec = decode_spec(&job.spec)?;
        for module in &mut spec.test_modules {
            // A module whose definition was deleted stays unenriched; presets
            // populate editable defaults and must never hard-fail.
            let info = match self.ctx.testings.find(&module.test_name).await {
                Ok(info) => info,
                Err(e) => {
                    warn!(test = %module.test_name, error = %e, "skip preset for test module");
                    continue;
                }
            };
            module.repos = merge_repos(&info.repos, &module.repos);
            module.key_vals = render_key_vals(&module.key_vals, &info.envs);
        }
        job.spec = encode_spec(&spec)?;
        Ok(())
    }

    fn merge_args(&self, job: &mut Job, args: &Job) -> Result<()> {
        if job.name != args.name || job.job_type != args.job_type {
            return Ok(());
        }
        let mut spec: TestingJobSpec = decode_spec(&job.spec)?;
        let args_spec: TestingJobSpec = decode_spec(&args.spec)?;
        for module in &mut spec.test_modules {
            if let Some(args_module) = args_spec
                .test_modules
                .iter()
                .find(|m| m.test_name == module.test_name)
            {
                module.repos = merge_repos(&module.repos, &args_module.repos);
                module.key_vals = render_key_vals(&args_module.key_vals, &module.key_vals);
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
        let spec: TestingJobSpec = decode_spec(&job.spec)?;
        let mut resp = Vec::new();
        for module in &spec.test_modules {
            resp.push(self.compile_module(job, workflow, task_id, module).await?);
        }
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::catalog::fakes::{self, FakeClusters};
    use crate::compiler::{ClusterInfo, TestingDefinition};
    use forge_core::domain::{CacheSettings, NfsProperties, Tool};
    use std::collections::HashMap;

    fn smoke_definition() -> TestingDefinition {
        TestingDefinition {
            name: "smoke".to_string(),
            timeout: 600,
            cluster_id: "cluster-1".to_string(),
            scripts: "make prepare \\\nall\nmake test".to_string(),
            test_report_path: "report/index.html".to_string(),
            artifact_paths: vec!["out/junit.xml".to_string(), "out/cov".to_string()],
            installs: vec![Tool {
                name: "go".to_string(),
                version: "1.22".to_string(),
                ..Default::default()
            }],
            repos: vec![Repository {
                source: "github".to_string(),
                owner: "acme".to_string(),
                repo_name: "api".to_string(),
                branch: "main".to_string(),
                pr: 0,
                commit_id: String::new(),
                address: String::new(),
                checkout_path: String::new(),
            }],
            envs: vec![KeyVal::new("MODE", "fast")],
            cache_enable: false,
            cache_user_dir: String::new(),
        }
    }

    fn testing_job() -> Job {
        let spec = TestingJobSpec {
            test_modules: vec![TestModule {
                test_name: "smoke".to_string(),
                repos: vec![],
                key_vals: vec![KeyVal::new("MODE", "slow")],
            }],
        };
        Job {
            name: "run-tests".to_string(),
            job_type: JobType::Testing,
            spec: encode_spec(&spec).unwrap(),
        }
    }

    fn workflow() -> WorkflowSpec {
        WorkflowSpec {
            name: "nightly".to_string(),
            project: "acme".to_string(),
            stages: vec![],
        }
    }

    fn ctx_with(definition: Option<TestingDefinition>) -> crate::compiler::CompileContext {
        let mut testings = HashMap::new();
        if let Some(def) = definition {
            testings.insert(def.name.clone(), def);
        }
        fakes::context(
            crate::compiler::DeployMechanism::PerHost,
            vec![],
            testings,
            FakeClusters::default(),
        )
    }

    #[tokio::test]
    async fn test_to_jobs_assembles_steps_in_fixed_order() {
        let compiler = TestingJob::new(ctx_with(Some(smoke_definition())));
        let tasks = compiler.to_jobs(&testing_job(), &workflow(), 7).await.unwrap();

        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(task.name, "smoke-run-tests-abcde");
        assert_eq!(task.timeout, 600);

        let kinds: Vec<StepType> = task.steps.iter().map(|s| s.step_type).collect();
        assert_eq!(
            kinds,
            vec![
                StepType::ToolInstall,
                StepType::Git,
                StepType::Shell,
                StepType::Archive,
                StepType::Archive,
            ]
        );

        let shell: ShellStepSpec = decode_spec(&task.steps[2].spec).unwrap();
        assert_eq!(
            shell.scripts,
            vec!["make prepare all".to_string(), "make test".to_string()]
        );

        let report: ArchiveStepSpec = decode_spec(&task.steps[3].spec).unwrap();
        assert_eq!(report.uploads.len(), 1);
        assert_eq!(report.uploads[0].destination_path, "nightly/7/test");

        let artifacts: ArchiveStepSpec = decode_spec(&task.steps[4].spec).unwrap();
        assert_eq!(artifacts.uploads.len(), 2);
        assert!(artifacts
            .uploads
            .iter()
            .all(|u| u.destination_path == "nightly/7/artifact"));
    }

    #[tokio::test]
    async fn test_report_archive_step_is_conditional() {
        let mut definition = smoke_definition();
        definition.test_report_path = String::new();
        let compiler = TestingJob::new(ctx_with(Some(definition)));
        let tasks = compiler.to_jobs(&testing_job(), &workflow(), 7).await.unwrap();

        let kinds: Vec<StepType> = tasks[0].steps.iter().map(|s| s.step_type).collect();
        assert_eq!(kinds.iter().filter(|k| **k == StepType::Archive).count(), 1);
    }

    #[tokio::test]
    async fn test_task_envs_carry_fixed_variables_and_overrides() {
        let compiler = TestingJob::new(ctx_with(Some(smoke_definition())));
        let tasks = compiler.to_jobs(&testing_job(), &workflow(), 7).await.unwrap();

        let envs = &tasks[0].properties.envs;
        let get = |k: &str| envs.iter().find(|v| v.key == k).map(|v| v.value.clone());
        assert_eq!(get("MODE").as_deref(), Some("slow"));
        assert_eq!(get("TASK_ID").as_deref(), Some("7"));
        assert_eq!(get("PROJECT").as_deref(), Some("acme"));
        assert_eq!(get("WORKFLOW").as_deref(), Some("nightly"));
        assert_eq!(get("CI").as_deref(), Some("true"));
        assert_eq!(get("ZADIG").as_deref(), Some("true"));
        assert_eq!(get("API_BRANCH").as_deref(), Some("main"));
        assert_eq!(
            get("BUILD_URL").as_deref(),
            Some("https://forge.local/v1/projects/detail/acme/pipelines/custom/nightly/7")
        );
    }

    #[tokio::test]
    async fn test_nfs_cache_paths_render_against_envs() {
        let mut definition = smoke_definition();
        definition.cache_enable = true;
        definition.cache_user_dir = "cache/$PROJECT".to_string();

        let mut clusters = FakeClusters::default();
        clusters.clusters.insert(
            "cluster-1".to_string(),
            ClusterInfo {
                id: "cluster-1".to_string(),
                cache: CacheSettings {
                    medium: Some(CacheMedium::NetworkFilesystem),
                    nfs: NfsProperties {
                        subpath: "$WORKFLOW/$TASK_ID".to_string(),
                        provision_type: String::new(),
                    },
                },
            },
        );

        let mut testings = HashMap::new();
        testings.insert("smoke".to_string(), definition);
        let ctx = fakes::context(
            crate::compiler::DeployMechanism::PerHost,
            vec![],
            testings,
            clusters,
        );

        let compiler = TestingJob::new(ctx);
        let tasks = compiler.to_jobs(&testing_job(), &workflow(), 7).await.unwrap();

        let props = &tasks[0].properties;
        assert!(props.cache_enable);
        assert_eq!(props.cache_user_dir, "cache/acme");
        assert_eq!(props.cache.nfs.subpath, "nightly/7");
    }

    #[tokio::test]
    async fn test_preset_skips_deleted_definition() {
        let compiler = TestingJob::new(ctx_with(None));
        let mut job = testing_job();
        let before = job.spec.clone();

        compiler.set_preset(&mut job, &workflow()).await.unwrap();
        // The module stays unenriched but the job survives.
        let spec: TestingJobSpec = decode_spec(&job.spec).unwrap();
        assert_eq!(spec.test_modules.len(), 1);
        assert_eq!(job.spec, before);
    }

    #[tokio::test]
    async fn test_to_jobs_fails_on_deleted_definition() {
        let compiler = TestingJob::new(ctx_with(None));
        let err = compiler
            .to_jobs(&testing_job(), &workflow(), 7)
            .await
            .unwrap_err();
        assert!(err.is_lookup());
        assert!(err.to_string().contains("smoke"));
    }

    #[tokio::test]
    async fn test_preset_merges_definition_defaults() {
        let compiler = TestingJob::new(ctx_with(Some(smoke_definition())));
        let mut job = testing_job();
        compiler.set_preset(&mut job, &workflow()).await.unwrap();

        let spec: TestingJobSpec = decode_spec(&job.spec).unwrap();
        let module = &spec.test_modules[0];
        assert_eq!(module.repos.len(), 1);
        assert_eq!(module.repos[0].repo_name, "api");
        // User override survives preset population.
        assert_eq!(module.key_vals[0].value, "slow");
    }

    #[tokio::test]
    async fn test_compiling_twice_is_deterministic() {
        let compiler = TestingJob::new(ctx_with(Some(smoke_definition())));
        let job = testing_job();
        let first = compiler.to_jobs(&job, &workflow(), 7).await.unwrap();
        let second = compiler.to_jobs(&job, &workflow(), 7).await.unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.properties.envs, b.properties.envs);
            assert_eq!(a.steps.len(), b.steps.len());
            for (sa, sb) in a.steps.iter().zip(b.steps.iter()) {
                assert_eq!(sa.name, sb.name);
                assert_eq!(sa.step_type, sb.step_type);
                assert_eq!(sa.spec, sb.spec);
            }
        }
    }
}
