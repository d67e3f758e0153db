//! Source discovery and classification of execution and linter results.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::language::{Language, Linter};
use super::sandbox::CommandOutput;

/// Directory names never descended into during discovery.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    "dist",
    "build",
    ".mypy_cache",
    ".pytest_cache",
];

pub fn is_skipped_dir(name: &str) -> bool {
    name.starts_with('.') || SKIP_DIRS.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    pub language: Language,
}

/// Pick the reviewable files out of a raw listing: recognised extension, no
/// skipped or hidden directory on the path. Result is sorted by path and cut
/// to `max_files` when given.
pub fn select_source_files<I, S>(paths: I, max_files: Option<usize>) -> Vec<SourceFile>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut files: Vec<SourceFile> = paths
        .into_iter()
        .filter_map(|p| {
            let path = p.as_ref().trim_start_matches("./");
            let mut parts: Vec<&str> = path.split('/').collect();
            parts.pop();
            if parts.iter().any(|dir| is_skipped_dir(dir)) {
                return None;
            }
            Language::from_path(path).map(|language| SourceFile {
                path: path.to_string(),
                language,
            })
        })
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files.dedup_by(|a, b| a.path == b.path);
    if let Some(max) = max_files {
        files.truncate(max);
    }
    files
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecOutcome {
    Success { output: String },
    Failed { exit_code: i32, output: String },
    Unsupported { language: Language },
    /// The command could not complete (timeout, sandbox failure).
    Error { message: String },
}

impl ExecOutcome {
    pub fn from_output(output: CommandOutput) -> Self {
        if output.success() {
            ExecOutcome::Success {
                output: output.output,
            }
        } else {
            ExecOutcome::Failed {
                exit_code: output.exit_code,
                output: output.output,
            }
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ExecOutcome::Failed { .. } | ExecOutcome::Error { .. })
    }

    pub fn summary(&self) -> String {
        match self {
            ExecOutcome::Success { .. } => "success".to_string(),
            ExecOutcome::Failed { exit_code, .. } => format!("failed (exit code {})", exit_code),
            ExecOutcome::Unsupported { language } => {
                format!("not supported for {}", language)
            }
            ExecOutcome::Error { message } => format!("error: {}", message),
        }
    }

    pub fn output(&self) -> Option<&str> {
        match self {
            ExecOutcome::Success { output } | ExecOutcome::Failed { output, .. } => Some(output),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LintOutcome {
    Clean { output: String },
    Issues { count: usize, output: String },
    NotConfigured { language: Language },
    Failed { message: String },
}

impl LintOutcome {
    pub fn has_findings(&self) -> bool {
        matches!(self, LintOutcome::Issues { .. } | LintOutcome::Failed { .. })
    }

    pub fn summary(&self) -> String {
        match self {
            LintOutcome::Clean { .. } => "clean".to_string(),
            LintOutcome::Issues { count, .. } => {
                format!("{} issue{}", count, if *count == 1 { "" } else { "s" })
            }
            LintOutcome::NotConfigured { language } => {
                format!("not configured for {}", language)
            }
            LintOutcome::Failed { message } => format!("failed: {}", message),
        }
    }

    pub fn output(&self) -> Option<&str> {
        match self {
            LintOutcome::Clean { output } | LintOutcome::Issues { output, .. } => Some(output),
            _ => None,
        }
    }
}

static PYTHON_LINT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[^\s:][^:]*:\d+:\d+: [A-Z]+\d+").expect("valid regex")
});

static ESLINT_PROBLEMS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) problems?").expect("valid regex"));

/// Number of findings reported in a linter's output.
pub fn count_issues(linter: Linter, output: &str) -> usize {
    match linter {
        Linter::Pylint | Linter::Flake8 => PYTHON_LINT_LINE.find_iter(output).count(),
        Linter::Eslint => ESLINT_PROBLEMS
            .captures(output)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(0),
    }
}

/// Fold the individual linter runs for one file into a single outcome.
///
/// A non-zero exit with no recognisable findings means the linter itself
/// broke (missing binary, bad config) and is reported as a failure.
pub fn classify_lint(runs: Vec<(Linter, anyhow::Result<CommandOutput>)>) -> LintOutcome {
    let mut total = 0;
    let mut combined = String::new();

    for (linter, result) in runs {
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                return LintOutcome::Failed {
                    message: format!("{}: {:#}", linter.name(), e),
                };
            }
        };
        let count = count_issues(linter, &output.output);
        if !output.success() && count == 0 {
            let first_line = output.output.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
            return LintOutcome::Failed {
                message: format!(
                    "{} exited with code {} {}",
                    linter.name(),
                    output.exit_code,
                    first_line.trim()
                )
                .trim_end()
                .to_string(),
            };
        }
        total += count;
        if !combined.is_empty() {
            combined.push('\n');
        }
        combined.push_str(&format!("[{}]\n{}", linter.name(), output.output.trim_end()));
    }

    if total > 0 {
        LintOutcome::Issues {
            count: total,
            output: combined,
        }
    } else {
        LintOutcome::Clean { output: combined }
    }
}
