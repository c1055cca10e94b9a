//! Forge Runner
//!
//! A stateless worker that executes one compiled job task inside its pod or
//! container.
//!
//! Architecture:
//! - Configuration: load settings from environment variables
//! - Context: the job context document mounted by the orchestrator
//! - Executor: workspace acquisition, environment merge, sequential steps
//! - Steps: shell, tool install, git, archive, deploy
//!
//! The runner reads its job context from a mounted file, prepares the
//! workspace, then runs each declared step in order. The first failing step
//! aborts the job and the process exit code reports the outcome.

mod config;
mod context;
mod executor;
mod step;
mod storage;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::executor::JobExecutor;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forge_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Forge Runner");

    let config = Config::from_env()?;
    config.validate()?;
    info!(context_file = %config.job_context_file, "Loaded configuration");

    let ctx = context::JobContext::load(&config.job_context_file)
        .context("Failed to load job context")?;
    info!(steps = ctx.steps.len(), "Loaded job context");

    let cancel = CancellationToken::new();
    let executor = JobExecutor::new(config, ctx);

    if let Err(e) = executor.run(&cancel).await {
        error!("Job execution failed: {:#}", e);
        return Err(e);
    }

    info!("Job finished successfully");
    Ok(())
}
