//! Execution contexts: isolated places to clone, read, run and lint code.
//!
//! A [`SandboxProvider`] creates one [`ExecutionContext`] per job. The worker
//! owns that context exclusively and destroys it in its cleanup phase.

pub mod docker;
pub mod local;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::util::format_wait;

pub use docker::DockerProvider;
pub use local::LocalProvider;

/// Exit status and combined stdout/stderr of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Combine the two output streams the way `2>&1` would (minus interleaving).
pub(crate) fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut combined = String::from_utf8_lossy(stdout).into_owned();
    let stderr = String::from_utf8_lossy(stderr);
    if !stderr.is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&stderr);
    }
    combined
}

/// Run a host command to completion within `timeout`. The child is killed
/// when the bound elapses.
pub(crate) async fn run_bounded(
    cmd: &mut tokio::process::Command,
    timeout: Duration,
    what: &str,
) -> Result<std::process::Output> {
    cmd.kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result.with_context(|| format!("Failed to run {}", what)),
        Err(_) => anyhow::bail!("{} did not return within {}", what, format_wait(timeout)),
    }
}

/// An isolated environment bound to one job.
///
/// Paths are relative to the context's workspace root; an absolute path such
/// as `/tmp/report.md` names a location inside the context, never on the host.
/// Commands run with the workspace root as their working directory. A command
/// that exceeds its timeout is killed and reported as an `Err`.
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    fn id(&self) -> &str;

    /// Shallow-clone `repo_url` into `dest`. A failed clone is a non-zero
    /// exit, not an `Err`.
    async fn clone_repo(&self, repo_url: &str, dest: &str) -> Result<CommandOutput>;

    /// Every regular file under `root`, as paths relative to `root`.
    async fn list_files(&self, root: &str) -> Result<Vec<String>>;

    async fn read_file(&self, path: &str) -> Result<String>;

    async fn exec(&self, command: &str, timeout: Duration) -> Result<CommandOutput>;

    async fn upload_file(&self, content: &[u8], path: &str) -> Result<()>;

    async fn destroy(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(&self) -> Result<Box<dyn ExecutionContext>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxBackend {
    #[default]
    Docker,
    Local,
}

impl SandboxBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxBackend::Docker => "docker",
            SandboxBackend::Local => "local",
        }
    }
}

impl fmt::Display for SandboxBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SandboxBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(SandboxBackend::Docker),
            "local" => Ok(SandboxBackend::Local),
            other => Err(format!("unknown sandbox backend '{}' (expected docker or local)", other)),
        }
    }
}

/// `[sandbox]` section of the review config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub backend: SandboxBackend,
    /// Container image; must provide `git` and the language runtimes.
    pub image: String,
    pub memory: String,
    pub cpus: f64,
    pub clone_timeout_secs: u64,
    /// Extra environment for every command run in the context.
    pub env: HashMap<String, String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::Docker,
            image: "python:3.12".to_string(),
            memory: "2g".to_string(),
            cpus: 2.0,
            clone_timeout_secs: 120,
            env: HashMap::new(),
        }
    }
}

impl SandboxConfig {
    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }
}

/// Build the provider selected by `config.backend`.
pub fn provider_from_config(config: &SandboxConfig) -> Arc<dyn SandboxProvider> {
    match config.backend {
        SandboxBackend::Docker => Arc::new(DockerProvider::new(config.clone())),
        SandboxBackend::Local => Arc::new(LocalProvider::new(config.clone())),
    }
}
