//! Host-local execution context: a private scratch directory per job.
//!
//! This gives no isolation beyond the directory boundary; it exists for
//! development machines without Docker and for tests.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;
use walkdir::WalkDir;

use super::{CommandOutput, ExecutionContext, SandboxConfig, SandboxProvider, combine_output};
use crate::review::analysis::is_skipped_dir;
use crate::util::{format_wait, shell_quote};

pub struct LocalProvider {
    config: SandboxConfig,
    base_dir: PathBuf,
}

impl LocalProvider {
    pub fn new(config: SandboxConfig) -> Self {
        Self::with_base_dir(config, std::env::temp_dir())
    }

    /// Place scratch directories under `base_dir` instead of the system temp dir.
    pub fn with_base_dir(config: SandboxConfig, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            base_dir: base_dir.into(),
        }
    }
}

#[async_trait]
impl SandboxProvider for LocalProvider {
    async fn create(&self) -> Result<Box<dyn ExecutionContext>> {
        let id = format!("local-{}", &Uuid::new_v4().simple().to_string()[..12]);
        let root = self.base_dir.join(format!("interna-review-{}", id));
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create scratch directory {}", root.display()))?;
        tracing::debug!(sandbox_id = %id, root = %root.display(), "local sandbox created");

        Ok(Box::new(LocalContext {
            id,
            root,
            env: self.config.env.clone(),
            clone_timeout: self.config.clone_timeout(),
        }))
    }
}

pub struct LocalContext {
    id: String,
    root: PathBuf,
    env: HashMap<String, String>,
    clone_timeout: Duration,
}

impl LocalContext {
    /// Map a context path onto the scratch root, rejecting anything that
    /// would climb out of it.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            anyhow::bail!("Path escapes sandbox root: {}", path);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ExecutionContext for LocalContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn clone_repo(&self, repo_url: &str, dest: &str) -> Result<CommandOutput> {
        self.resolve(dest)?;
        let command = format!(
            "git clone --depth 1 {} {}",
            shell_quote(repo_url),
            shell_quote(dest)
        );
        self.exec(&command, self.clone_timeout).await
    }

    async fn list_files(&self, root: &str) -> Result<Vec<String>> {
        let base = self.resolve(root)?;
        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            let walker = WalkDir::new(&base).into_iter().filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !is_skipped_dir(&entry.file_name().to_string_lossy())
            });
            for entry in walker {
                let entry = entry.with_context(|| format!("Failed to walk {}", base.display()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(&base)
                    .context("walked outside the listing root")?;
                let parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                files.push(parts.join("/"));
            }
            files.sort();
            Ok(files)
        })
        .await
        .context("File listing task failed")?
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        let bytes = tokio::fs::read(&full)
            .await
            .with_context(|| format!("Failed to read {}", path))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn exec(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .envs(&self.env)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The shell leads a fresh group so a timeout can reach its descendants.
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn: {}", command))?;
        let mut group = ProcessGroupGuard::new(child.id());

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.with_context(|| format!("Failed to wait for: {}", command))?,
            Err(_) => anyhow::bail!("Command timed out after {}: {}", format_wait(timeout), command),
        };
        group.disarm();

        Ok(CommandOutput::new(
            output.status.code().unwrap_or(-1),
            combine_output(&output.stdout, &output.stderr),
        ))
    }

    async fn upload_file(&self, content: &[u8], path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&full, content)
            .await
            .with_context(|| format!("Failed to write {}", path))
    }

    async fn destroy(self: Box<Self>) -> Result<()> {
        tokio::fs::remove_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to remove {}", self.root.display()))?;
        tracing::debug!(sandbox_id = %self.id, "local sandbox removed");
        Ok(())
    }
}

/// Kills the process group led by a spawned shell when dropped while armed.
struct ProcessGroupGuard {
    pgid: Option<u32>,
    armed: bool,
}

impl ProcessGroupGuard {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let (true, Some(pgid)) = (self.armed, self.pgid) {
            kill_process_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    if pgid == 0 {
        return;
    }
    let res = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if res != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!(pgid, "failed to kill process group: {}", err);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}
