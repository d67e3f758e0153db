//! Docker-backed execution context driven through the `docker` CLI.
//!
//! Each job gets one long-lived container (`sleep infinity`) with memory and
//! CPU limits. Every operation is a `docker exec` into it; `docker rm -f`
//! tears it down.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{CommandOutput, ExecutionContext, SandboxConfig, SandboxProvider, combine_output, run_bounded};
use crate::review::analysis::SKIP_DIRS;
use crate::util::{format_wait, shell_quote};

const WORKDIR: &str = "/workspace";

/// Exit status `timeout(1)` uses when it had to kill the command.
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Host-side slack on top of the in-container timeout.
const HOST_GRACE: Duration = Duration::from_secs(10);

/// Bound for `docker run`, which may have to pull the image first.
const START_TIMEOUT: Duration = Duration::from_secs(300);

/// Bound for short bookkeeping calls (list, read, upload, remove).
const CLI_TIMEOUT: Duration = Duration::from_secs(60);

pub struct DockerProvider {
    config: SandboxConfig,
}

impl DockerProvider {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--rm".to_string(),
            "--memory".to_string(),
            self.config.memory.clone(),
            "--cpus".to_string(),
            self.config.cpus.to_string(),
            "-w".to_string(),
            WORKDIR.to_string(),
            "-e".to_string(),
            "GIT_TERMINAL_PROMPT=0".to_string(),
        ];
        let mut env: Vec<_> = self.config.env.iter().collect();
        env.sort();
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(self.config.image.clone());
        args.push("sleep".to_string());
        args.push("infinity".to_string());
        args
    }
}

#[async_trait]
impl SandboxProvider for DockerProvider {
    async fn create(&self) -> Result<Box<dyn ExecutionContext>> {
        let mut cmd = tokio::process::Command::new("docker");
        cmd.args(self.run_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let output = run_bounded(&mut cmd, START_TIMEOUT, "docker run").await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("docker run failed: {}", stderr.trim());
        }

        let container_id = String::from_utf8(output.stdout)
            .context("Invalid UTF-8 in docker output")?
            .trim()
            .to_string();
        if container_id.is_empty() {
            anyhow::bail!("docker run returned no container id");
        }
        tracing::debug!(sandbox_id = %container_id, image = %self.config.image, "container started");

        Ok(Box::new(DockerContext {
            container_id,
            clone_timeout: self.config.clone_timeout(),
        }))
    }
}

pub struct DockerContext {
    container_id: String,
    clone_timeout: Duration,
}

impl DockerContext {
    async fn docker_exec(&self, script: &str, host_timeout: Duration) -> Result<CommandOutput> {
        let mut cmd = tokio::process::Command::new("docker");
        cmd.args(["exec", &self.container_id, "sh", "-c", script])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let output = run_bounded(&mut cmd, host_timeout, "docker exec").await?;
        Ok(CommandOutput::new(
            output.status.code().unwrap_or(-1),
            combine_output(&output.stdout, &output.stderr),
        ))
    }
}

/// Wrap `command` in the in-container `timeout` so a stuck process dies with
/// its deadline even if the host side gives up first.
pub(crate) fn timed_script(command: &str, timeout: Duration) -> String {
    format!(
        "timeout {} sh -c {}",
        timeout.as_secs().max(1),
        shell_quote(command)
    )
}

/// `find` invocation listing regular files under `root`, pruning the same
/// directories discovery skips.
pub(crate) fn list_script(root: &str) -> String {
    let names: Vec<String> = SKIP_DIRS
        .iter()
        .map(|d| format!("-name {}", shell_quote(d)))
        .collect();
    format!(
        "cd {} && find . -mindepth 1 -type d \\( -name '.*' -o {} \\) -prune -o -type f -print",
        shell_quote(root),
        names.join(" -o ")
    )
}

#[async_trait]
impl ExecutionContext for DockerContext {
    fn id(&self) -> &str {
        &self.container_id[..self.container_id.len().min(12)]
    }

    async fn clone_repo(&self, repo_url: &str, dest: &str) -> Result<CommandOutput> {
        let command = format!(
            "git clone --depth 1 {} {}",
            shell_quote(repo_url),
            shell_quote(dest)
        );
        self.exec(&command, self.clone_timeout).await
    }

    async fn list_files(&self, root: &str) -> Result<Vec<String>> {
        let output = self
            .docker_exec(&list_script(root), CLI_TIMEOUT)
            .await?;
        if !output.success() {
            anyhow::bail!("Listing {} failed: {}", root, output.output.trim());
        }
        let mut files: Vec<String> = output
            .output
            .lines()
            .filter_map(|line| line.strip_prefix("./"))
            .map(str::to_string)
            .collect();
        files.sort();
        Ok(files)
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let mut cmd = tokio::process::Command::new("docker");
        cmd.args(["exec", &self.container_id, "cat", "--", path])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let output = run_bounded(&mut cmd, CLI_TIMEOUT, "docker exec cat").await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to read {}: {}", path, stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn exec(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let output = self
            .docker_exec(&timed_script(command, timeout), timeout + HOST_GRACE)
            .await?;
        if output.exit_code == TIMEOUT_EXIT_CODE {
            anyhow::bail!("Command timed out after {}: {}", format_wait(timeout), command);
        }
        Ok(output)
    }

    async fn upload_file(&self, content: &[u8], path: &str) -> Result<()> {
        let quoted = shell_quote(path);
        let script = format!("mkdir -p \"$(dirname {})\" && cat > {}", quoted, quoted);
        let mut child = tokio::process::Command::new("docker")
            .args(["exec", "-i", &self.container_id, "sh", "-c", &script])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn docker exec for upload")?;

        let mut stdin = child.stdin.take().context("docker exec stdin unavailable")?;
        let transfer = async {
            stdin
                .write_all(content)
                .await
                .with_context(|| format!("Failed to stream {} into container", path))?;
            drop(stdin);
            child
                .wait_with_output()
                .await
                .context("Failed to wait for docker exec")
        };
        let output = match tokio::time::timeout(CLI_TIMEOUT, transfer).await {
            Ok(result) => result?,
            Err(_) => anyhow::bail!(
                "Uploading {} did not finish within {}",
                path,
                format_wait(CLI_TIMEOUT)
            ),
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to upload {}: {}", path, stderr.trim());
        }
        Ok(())
    }

    async fn destroy(self: Box<Self>) -> Result<()> {
        let mut cmd = tokio::process::Command::new("docker");
        cmd.args(["rm", "-f", &self.container_id])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let output = run_bounded(&mut cmd, CLI_TIMEOUT, "docker rm").await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("docker rm -f {} failed: {}", self.container_id, stderr.trim());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_run_args_include_limits_and_env() {
        let provider = DockerProvider::new(SandboxConfig {
            image: "node:22".to_string(),
            memory: "1g".to_string(),
            cpus: 1.5,
            env: HashMap::from([("B".to_string(), "2".to_string()), ("A".to_string(), "1".to_string())]),
            ..SandboxConfig::default()
        });
        let args = provider.run_args();
        let joined = args.join(" ");
        assert!(joined.starts_with("run -d --rm --memory 1g --cpus 1.5 -w /workspace"));
        assert!(joined.contains("-e A=1 -e B=2"));
        assert!(joined.ends_with("node:22 sleep infinity"));
    }

    #[test]
    fn test_timed_script_quotes_command() {
        assert_eq!(
            timed_script("python 'a b.py'", Duration::from_secs(30)),
            r#"timeout 30 sh -c 'python '\''a b.py'\'''"#
        );
        // sub-second timeouts still give the command a chance to run
        assert!(timed_script("true", Duration::from_millis(10)).starts_with("timeout 1 "));
    }

    #[test]
    fn test_list_script_prunes_skipped_dirs() {
        let script = list_script("repo");
        assert!(script.starts_with("cd repo && find ."));
        assert!(script.contains("-name node_modules"));
        assert!(script.contains("-name __pycache__"));
        assert!(script.contains("-name '.*'"));
        assert!(script.ends_with("-prune -o -type f -print"));
    }
}
