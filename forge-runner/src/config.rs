//! Runner configuration
//!
//! The runner is configured entirely through environment variables set by the
//! orchestrator when it provisions the worker pod.

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the mounted job context document.
    pub job_context_file: String,

    /// Home directory exported to job scripts as `HOME`.
    pub home: String,

    /// Docker daemon address exported as `DOCKER_HOST`; may be empty.
    pub docker_host: String,
}

impl Config {
    /// Creates configuration from environment variables.
    ///
    /// Expected environment variables:
    /// - JOB_CONTEXT_FILE (optional, default: /home/jobexecutor/job-context.yaml)
    /// - HOME (optional, default: /root)
    /// - DOCKER_HOST (optional)
    pub fn from_env() -> anyhow::Result<Self> {
        let job_context_file = std::env::var("JOB_CONTEXT_FILE")
            .unwrap_or_else(|_| "/home/jobexecutor/job-context.yaml".to_string());
        let home = std::env::var("HOME").unwrap_or_else(|_| "/root".to_string());
        let docker_host = std::env::var("DOCKER_HOST").unwrap_or_default();

        Ok(Self {
            job_context_file,
            home,
            docker_host,
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.job_context_file.is_empty() {
            anyhow::bail!("job context file path cannot be empty");
        }
        if self.home.is_empty() {
            anyhow::bail!("home directory cannot be empty");
        }
        Ok(())
    }
}
