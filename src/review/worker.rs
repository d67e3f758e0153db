//! The review worker: one strictly sequential pass per job.
//!
//! ```text
//! provision ─> clone ─> discover ─> per file (read ─> execute ─> lint ─> critique)
//!                                        ─> report ─> cleanup ─> done ─> end-of-stream
//! ```
//!
//! Only provisioning failures and panics end the job early; everything else
//! is recorded against the file it happened to. Cleanup and the end-of-stream
//! sentinel run on every path.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::FutureExt;

use super::analysis::{ExecOutcome, LintOutcome, SourceFile, classify_lint, select_source_files};
use super::critique::{CritiqueInput, ModelClient, critique_file};
use super::db::DbHandle;
use super::events::{EventKind, StepEmitter};
use super::models::{FileReview, ReviewSummary};
use super::report::{ReportMeta, SANDBOX_REPORT_PATH, render_report};
use super::sandbox::{ExecutionContext, SandboxProvider};
use crate::config::ReviewSettings;
use crate::util::truncate_chars;

/// Directory inside the execution context the repository is cloned into.
pub const REPO_DIR: &str = "repo";

/// Prefix of the single step emitted once teardown has been attempted.
pub const CLEANUP_MARKER: &str = "Cleanup complete";

const DIAGNOSTIC_CHARS: usize = 200;

pub struct ReviewWorker {
    job_id: String,
    repo_url: String,
    emitter: StepEmitter,
    provider: Arc<dyn SandboxProvider>,
    critic: Option<Arc<dyn ModelClient>>,
    settings: ReviewSettings,
    db: Option<DbHandle>,
}

impl ReviewWorker {
    pub fn new(
        repo_url: impl Into<String>,
        emitter: StepEmitter,
        provider: Arc<dyn SandboxProvider>,
        settings: ReviewSettings,
    ) -> Self {
        Self {
            job_id: emitter.job_id().to_string(),
            repo_url: repo_url.into(),
            emitter,
            provider,
            critic: None,
            settings,
            db: None,
        }
    }

    pub fn with_critic(mut self, critic: Option<Arc<dyn ModelClient>>) -> Self {
        self.critic = critic;
        self
    }

    pub fn with_db(mut self, db: Option<DbHandle>) -> Self {
        self.db = db;
        self
    }

    /// Run the job to completion. Never panics outward and always ends the
    /// job's stream.
    pub async fn run(self) -> Result<ReviewSummary> {
        let sentinel = self.emitter.sentinel();
        tracing::info!(job_id = %self.job_id, repo_url = %self.repo_url, "review started");
        self.record_start().await;

        let mut sandbox: Option<Box<dyn ExecutionContext>> = None;
        let outcome = match AssertUnwindSafe(self.drive(&mut sandbox)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!(
                "Review worker panicked: {}",
                panic_message(panic.as_ref())
            )),
        };

        if let Err(e) = &outcome {
            let message = format!("{:#}", e);
            tracing::error!(job_id = %self.job_id, "review failed: {}", message);
            self.emitter.error(message.clone());
            self.record_failure(message).await;
        }

        self.cleanup(sandbox).await;

        if let Ok(summary) = &outcome {
            tracing::info!(
                job_id = %self.job_id,
                files = summary.files_reviewed,
                health = summary.health.label(),
                "review finished"
            );
            self.emitter.emit(EventKind::Done, summary.headline());
        }
        sentinel.finish();
        outcome
    }

    async fn drive(&self, slot: &mut Option<Box<dyn ExecutionContext>>) -> Result<ReviewSummary> {
        self.emitter.step("Creating sandbox...");
        let created = self
            .provider
            .create()
            .await
            .context("Failed to create sandbox")?;
        let sandbox: &dyn ExecutionContext = &**slot.insert(created);
        tracing::info!(job_id = %self.job_id, sandbox_id = sandbox.id(), "sandbox ready");
        self.emitter.step(format!("Sandbox ready (id={})", sandbox.id()));

        let mut notes = Vec::new();
        let cloned = self.clone_repo(sandbox, &mut notes).await;
        let files = self.discover(sandbox, cloned, &mut notes).await;

        let mut reviews = Vec::with_capacity(files.len());
        let mut installs_done = HashSet::new();
        for (i, file) in files.iter().enumerate() {
            if self.emitter.is_closed() {
                let skipped = files.len() - i;
                tracing::warn!(job_id = %self.job_id, skipped, "stream consumer gone, skipping remaining files");
                notes.push(format!(
                    "Analysis stopped early: {} file(s) skipped after the client disconnected",
                    skipped
                ));
                break;
            }
            reviews.push(
                self.review_file(sandbox, file, i + 1, files.len(), &mut installs_done)
                    .await,
            );
        }

        let meta = ReportMeta {
            repo_url: self.repo_url.clone(),
            generated_at: Utc::now(),
            notes,
        };
        let report = render_report(&meta, &reviews);
        let summary = ReviewSummary::from_reviews(&reviews);
        self.persist(sandbox, &summary, &report, &reviews).await;
        self.emitter.emit_data(
            EventKind::Report,
            format!("Report ready ({} file(s) reviewed)", summary.files_reviewed),
            report,
        );
        Ok(summary)
    }

    /// Returns whether the clone succeeded. Failure is reported and noted but
    /// the job carries on.
    async fn clone_repo(&self, sandbox: &dyn ExecutionContext, notes: &mut Vec<String>) -> bool {
        self.emitter.step(format!("Cloning {}...", self.repo_url));
        let failure = match sandbox.clone_repo(&self.repo_url, REPO_DIR).await {
            Ok(output) if output.success() => return true,
            Ok(output) => format!(
                "Clone failed (exit code {}): {}",
                output.exit_code,
                truncate_chars(output.output.trim(), DIAGNOSTIC_CHARS)
            ),
            Err(e) => format!(
                "Clone failed: {}",
                truncate_chars(&format!("{:#}", e), DIAGNOSTIC_CHARS)
            ),
        };
        tracing::warn!(job_id = %self.job_id, "{}", failure);
        self.emitter.error(failure.clone());
        notes.push(failure);
        false
    }

    async fn discover(&self, sandbox: &dyn ExecutionContext, cloned: bool, notes: &mut Vec<String>) -> Vec<SourceFile> {
        let listing = match sandbox.list_files(REPO_DIR).await {
            Ok(listing) => listing,
            Err(e) => {
                // Nothing to list after a failed clone; only worth reporting otherwise.
                if cloned {
                    let message = format!(
                        "Listing files failed: {}",
                        truncate_chars(&format!("{:#}", e), DIAGNOSTIC_CHARS)
                    );
                    self.emitter.error(message.clone());
                    notes.push(message);
                }
                Vec::new()
            }
        };
        let files = select_source_files(listing, self.settings.max_files);
        self.emitter
            .step(format!("Found {} source file(s)", files.len()));
        for file in &files {
            self.emitter.emit(EventKind::File, file.path.clone());
        }
        files
    }

    async fn review_file(
        &self,
        sandbox: &dyn ExecutionContext,
        file: &SourceFile,
        index: usize,
        total: usize,
        installs_done: &mut HashSet<&'static str>,
    ) -> FileReview {
        let path = file.path.as_str();
        self.emitter
            .emit(EventKind::File, format!("Reading {} ({}/{})", path, index, total));
        let code = match sandbox.read_file(&format!("{}/{}", REPO_DIR, path)).await {
            Ok(code) => code,
            Err(e) => format!("Error reading file: {:#}", e),
        };

        self.emitter
            .emit(EventKind::Execute, format!("Executing {}...", path));
        let execution = self.execute(sandbox, file).await;
        self.emitter
            .emit(EventKind::Execute, format!("{}: execution {}", path, execution.summary()));

        self.emitter.emit(EventKind::Lint, format!("Linting {}...", path));
        let lint = self.lint(sandbox, file, installs_done).await;
        self.emitter
            .emit(EventKind::Lint, format!("{}: linter {}", path, lint.summary()));

        let critique = match &self.critic {
            Some(critic) => {
                self.emitter.step(format!("Analysing {} with AI...", path));
                let input = CritiqueInput {
                    path,
                    language: file.language,
                    code: &code,
                    execution: &execution,
                    lint: &lint,
                };
                let critique =
                    critique_file(critic.as_ref(), &input, self.settings.critique_excerpt_chars).await;
                self.emitter.step(format!(
                    "{}: score {}/10 - {}",
                    path, critique.score, critique.verdict
                ));
                Some(critique)
            }
            None => None,
        };

        FileReview::new(path, file.language, execution, lint, critique)
    }

    async fn execute(&self, sandbox: &dyn ExecutionContext, file: &SourceFile) -> ExecOutcome {
        let Some(command) = file.language.run_command(&file.path) else {
            return ExecOutcome::Unsupported {
                language: file.language,
            };
        };
        let command = format!("cd {} && {}", REPO_DIR, command);
        match sandbox.exec(&command, self.settings.exec_timeout()).await {
            Ok(output) => ExecOutcome::from_output(output),
            Err(e) => ExecOutcome::Error {
                message: truncate_chars(&format!("{:#}", e), DIAGNOSTIC_CHARS),
            },
        }
    }

    async fn lint(
        &self,
        sandbox: &dyn ExecutionContext,
        file: &SourceFile,
        installs_done: &mut HashSet<&'static str>,
    ) -> LintOutcome {
        let linters = file.language.linters();
        if linters.is_empty() {
            return LintOutcome::NotConfigured {
                language: file.language,
            };
        }

        for install in linters.iter().filter_map(|l| l.install_command()) {
            if installs_done.insert(install) {
                match sandbox
                    .exec(install, self.settings.linter_install_timeout())
                    .await
                {
                    Ok(output) if output.success() => {}
                    Ok(output) => tracing::warn!(
                        job_id = %self.job_id,
                        exit_code = output.exit_code,
                        "linter install failed: {}",
                        truncate_chars(output.output.trim(), DIAGNOSTIC_CHARS)
                    ),
                    Err(e) => tracing::warn!(job_id = %self.job_id, "linter install failed: {:#}", e),
                }
            }
        }

        let mut runs = Vec::with_capacity(linters.len());
        for linter in linters {
            let command = format!("cd {} && {}", REPO_DIR, linter.command(&file.path));
            let result = sandbox.exec(&command, self.settings.lint_timeout()).await;
            runs.push((*linter, result));
        }
        classify_lint(runs)
    }

    /// Best effort: database row, local report file, copy inside the sandbox.
    async fn persist(&self, sandbox: &dyn ExecutionContext, summary: &ReviewSummary, report: &str, reviews: &[FileReview]) {
        if let Some(db) = &self.db {
            let job_id = self.job_id.clone();
            let summary = summary.clone();
            let report = report.to_string();
            let reviews = reviews.to_vec();
            if let Err(e) = db
                .call(move |db| db.complete_review(&job_id, &summary, &report, &reviews))
                .await
            {
                tracing::warn!(job_id = %self.job_id, "failed to store review: {:#}", e);
            }
        }

        if let Some(dir) = &self.settings.report_dir {
            if let Err(e) = write_report_file(dir.clone(), &self.job_id, report).await {
                tracing::warn!(job_id = %self.job_id, "failed to write report file: {:#}", e);
            }
        }

        if let Err(e) = sandbox.upload_file(report.as_bytes(), SANDBOX_REPORT_PATH).await {
            tracing::warn!(job_id = %self.job_id, "failed to upload report to sandbox: {:#}", e);
        }
    }

    async fn cleanup(&self, sandbox: Option<Box<dyn ExecutionContext>>) {
        let Some(sandbox) = sandbox else {
            self.emitter
                .step(format!("{}: no sandbox was provisioned", CLEANUP_MARKER));
            return;
        };

        self.emitter.step("Cleaning up sandbox...");
        let id = sandbox.id().to_string();
        match sandbox.destroy().await {
            Ok(()) => {
                tracing::info!(job_id = %self.job_id, sandbox_id = %id, "sandbox deleted");
                self.emitter
                    .step(format!("{}: sandbox {} deleted", CLEANUP_MARKER, id));
            }
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, sandbox_id = %id, "sandbox deletion failed: {:#}", e);
                self.emitter.step(format!(
                    "{}: failed to delete sandbox {}: {}",
                    CLEANUP_MARKER,
                    id,
                    truncate_chars(&format!("{:#}", e), DIAGNOSTIC_CHARS)
                ));
            }
        }
    }

    async fn record_start(&self) {
        let Some(db) = &self.db else { return };
        let job_id = self.job_id.clone();
        let repo_url = self.repo_url.clone();
        if let Err(e) = db.call(move |db| db.insert_review(&job_id, &repo_url)).await {
            tracing::warn!(job_id = %self.job_id, "failed to record review start: {:#}", e);
        }
    }

    async fn record_failure(&self, message: String) {
        let Some(db) = &self.db else { return };
        let job_id = self.job_id.clone();
        if let Err(e) = db.call(move |db| db.fail_review(&job_id, &message)).await {
            tracing::warn!(job_id = %self.job_id, "failed to record review failure: {:#}", e);
        }
    }
}

async fn write_report_file(dir: PathBuf, job_id: &str, report: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(format!("{}.md", job_id));
    tokio::fs::write(&path, report)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
