//! Job context document
//!
//! The orchestrator compiles a job task into a YAML context document and
//! mounts it into the worker. It carries everything the runner needs to
//! execute: workspace location, environment, PATH extensions and the ordered
//! list of step descriptors.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use forge_core::domain::StepTask;

/// The document the runner reads at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobContext {
    /// Workspace directory; empty means the runner allocates a temp dir.
    #[serde(default)]
    pub workspace: String,

    /// Plain environment variables as `KEY=VALUE` strings.
    #[serde(default)]
    pub envs: Vec<String>,

    /// Credential environment variables, same format. Their values are
    /// masked in any logged command preview.
    #[serde(default)]
    pub secret_envs: Vec<String>,

    /// Extra PATH entries; `$HOME` is substituted before joining.
    #[serde(default)]
    pub paths: Vec<String>,

    /// Steps to execute, in order.
    #[serde(default)]
    pub steps: Vec<StepTask>,
}

impl JobContext {
    /// Loads and parses the context document at `path`.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read job context file {path}"))?;
        let ctx: JobContext = serde_yaml::from_str(&raw).context("parse job context yaml")?;
        Ok(ctx)
    }

    /// Joins the declared PATH entries with `$HOME` expanded, colon separated.
    pub fn path_entries(&self, home: &str) -> String {
        self.paths
            .iter()
            .map(|p| p.replace("$HOME", home))
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Splits a `KEY=VALUE` entry. Values may themselves contain `=`.
pub fn split_env(entry: &str) -> Option<(&str, &str)> {
    entry.split_once('=')
}
