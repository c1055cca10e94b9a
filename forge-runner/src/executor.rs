//! Job execution
//!
//! Prepares the workspace and merged environment, then drives the declared
//! steps strictly in order. The first failing step aborts the job; later
//! steps never run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::context::{JobContext, split_env};
use crate::step;

pub struct JobExecutor {
    config: Config,
    ctx: JobContext,
}

impl JobExecutor {
    pub fn new(config: Config, ctx: JobContext) -> Self {
        Self { config, ctx }
    }

    /// Resolves the workspace directory.
    ///
    /// An empty workspace in the context means this job is ephemeral and gets
    /// a fresh temp directory. A declared workspace is created if missing and
    /// reused across retries so caches survive.
    pub fn prepare_workspace(&self) -> Result<PathBuf> {
        let workspace = if self.ctx.workspace.is_empty() {
            std::env::temp_dir().join(format!("forge-{}", uuid::Uuid::new_v4().simple()))
        } else {
            PathBuf::from(&self.ctx.workspace)
        };
        std::fs::create_dir_all(&workspace)
            .with_context(|| format!("create workspace {}", workspace.display()))?;
        Ok(workspace)
    }

    /// Builds the merged environment every step runs under.
    pub fn build_env(&self, workspace: &Path) -> Vec<(String, String)> {
        let mut envs: Vec<(String, String)> = vec![
            ("CI".to_string(), "true".to_string()),
            ("ZADIG".to_string(), "true".to_string()),
            ("HOME".to_string(), self.config.home.clone()),
            (
                "WORKSPACE".to_string(),
                workspace.display().to_string(),
            ),
        ];

        let inherited = std::env::var("PATH").unwrap_or_default();
        let declared = self.ctx.path_entries(&self.config.home);
        let path = match (declared.is_empty(), inherited.is_empty()) {
            (true, _) => inherited,
            (false, true) => declared,
            (false, false) => format!("{declared}:{inherited}"),
        };
        envs.push(("PATH".to_string(), path));

        if !self.config.docker_host.is_empty() {
            envs.push(("DOCKER_HOST".to_string(), self.config.docker_host.clone()));
        }

        for entry in self.ctx.envs.iter().chain(self.ctx.secret_envs.iter()) {
            if let Some((key, value)) = split_env(entry) {
                envs.push((key.to_string(), value.to_string()));
            }
        }
        envs
    }

    /// Values of credential envs, for masking in logged previews.
    fn secret_values(&self) -> Vec<String> {
        self.ctx
            .secret_envs
            .iter()
            .filter_map(|e| split_env(e))
            .map(|(_, v)| v.to_string())
            .filter(|v| !v.is_empty())
            .collect()
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let workspace = self.prepare_workspace()?;
        std::env::set_current_dir(&workspace)
            .with_context(|| format!("enter workspace {}", workspace.display()))?;
        info!(workspace = %workspace.display(), "workspace ready");

        let envs = self.build_env(&workspace);
        let secrets = self.secret_values();

        for (idx, task) in self.ctx.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                anyhow::bail!("job cancelled before step {}", task.name);
            }
            info!(step = %task.name, "running step {}/{}", idx + 1, self.ctx.steps.len());
            step::run_step(task, &workspace, &envs, &secrets, cancel)
                .await
                .with_context(|| format!("step {} failed", task.name))?;
        }
        Ok(())
    }
}
