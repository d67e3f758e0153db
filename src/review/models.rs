use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::analysis::{ExecOutcome, LintOutcome};
use super::language::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Warn,
    Fail,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Warn => "WARN",
            Verdict::Fail => "FAIL",
        }
    }

    /// Verdict for a file that got no AI critique.
    pub fn derive(execution: &ExecOutcome, lint: &LintOutcome) -> Self {
        if execution.is_failure() {
            Verdict::Fail
        } else if lint.has_findings() {
            Verdict::Warn
        } else {
            Verdict::Pass
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PASS" => Ok(Verdict::Pass),
            "WARN" => Ok(Verdict::Warn),
            "FAIL" => Ok(Verdict::Fail),
            other => Err(format!("unknown verdict: {}", other)),
        }
    }
}

/// Model assessment of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    /// 0..=10
    pub score: u8,
    pub issues: Vec<String>,
    pub security: String,
    pub best_practices: String,
    pub verdict: Verdict,
    pub reason: String,
}

/// Everything the worker learned about one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReview {
    pub path: String,
    pub language: Language,
    pub execution: ExecOutcome,
    pub lint: LintOutcome,
    pub critique: Option<Critique>,
    pub verdict: Verdict,
}

impl FileReview {
    pub fn new(
        path: impl Into<String>,
        language: Language,
        execution: ExecOutcome,
        lint: LintOutcome,
        critique: Option<Critique>,
    ) -> Self {
        let verdict = critique
            .as_ref()
            .map(|c| c.verdict)
            .unwrap_or_else(|| Verdict::derive(&execution, &lint));
        Self {
            path: path.into(),
            language,
            execution,
            lint,
            critique,
            verdict,
        }
    }

    pub fn score(&self) -> Option<u8> {
        self.critique.as_ref().map(|c| c.score)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverallHealth {
    Clean,
    NeedsWork,
    CriticalIssues,
}

impl OverallHealth {
    pub fn label(&self) -> &'static str {
        match self {
            OverallHealth::Clean => "Clean",
            OverallHealth::NeedsWork => "Needs Work",
            OverallHealth::CriticalIssues => "Critical Issues",
        }
    }
}

/// Aggregate counts over a job's file reviews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub files_reviewed: usize,
    pub passed: usize,
    pub warned: usize,
    pub failed: usize,
    pub execution_failures: usize,
    pub unsupported_executions: usize,
    pub lint_issues: usize,
    pub lint_not_configured: usize,
    pub security_notes: usize,
    pub average_score: Option<f64>,
    pub health: OverallHealth,
}

impl ReviewSummary {
    pub fn from_reviews(reviews: &[FileReview]) -> Self {
        let count = |v: Verdict| reviews.iter().filter(|r| r.verdict == v).count();
        let passed = count(Verdict::Pass);
        let warned = count(Verdict::Warn);
        let failed = count(Verdict::Fail);

        let scores: Vec<f64> = reviews
            .iter()
            .filter_map(FileReview::score)
            .map(f64::from)
            .collect();
        let average_score = (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64);

        let health = if failed > 0 {
            OverallHealth::CriticalIssues
        } else if warned > 0 {
            OverallHealth::NeedsWork
        } else {
            OverallHealth::Clean
        };

        Self {
            files_reviewed: reviews.len(),
            passed,
            warned,
            failed,
            execution_failures: reviews.iter().filter(|r| r.execution.is_failure()).count(),
            unsupported_executions: reviews
                .iter()
                .filter(|r| matches!(r.execution, ExecOutcome::Unsupported { .. }))
                .count(),
            lint_issues: reviews
                .iter()
                .map(|r| match r.lint {
                    LintOutcome::Issues { count, .. } => count,
                    _ => 0,
                })
                .sum(),
            lint_not_configured: reviews
                .iter()
                .filter(|r| matches!(r.lint, LintOutcome::NotConfigured { .. }))
                .count(),
            security_notes: reviews
                .iter()
                .filter_map(|r| r.critique.as_ref())
                .filter(|c| has_security_concern(&c.security))
                .count(),
            average_score,
            health,
        }
    }

    /// One-line summary carried by the final `done` event.
    pub fn headline(&self) -> String {
        format!(
            "Review complete: {} file{} reviewed, {} passed, {} warned, {} failed ({})",
            self.files_reviewed,
            if self.files_reviewed == 1 { "" } else { "s" },
            self.passed,
            self.warned,
            self.failed,
            self.health.label()
        )
    }
}

/// Whether a critique's security note reports an actual concern.
pub fn has_security_concern(note: &str) -> bool {
    let note = note.trim().to_ascii_lowercase();
    !(note.is_empty()
        || note == "none"
        || note == "n/a"
        || note.starts_with("none ")
        || note.starts_with("no security")
        || note.starts_with("no issues")
        || note.starts_with("no obvious"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Running,
    Completed,
    Failed,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Running => "running",
            ReviewStatus::Completed => "completed",
            ReviewStatus::Failed => "failed",
        }
    }
}

impl FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ReviewStatus::Running),
            "completed" => Ok(ReviewStatus::Completed),
            "failed" => Ok(ReviewStatus::Failed),
            other => Err(format!("unknown review status: {}", other)),
        }
    }
}

/// Row of the `reviews` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub job_id: String,
    pub repo_url: String,
    pub status: ReviewStatus,
    pub files_reviewed: i64,
    pub overall_score: Option<f64>,
    pub health: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

/// Row of the `file_reviews` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReviewRecord {
    pub path: String,
    pub language: String,
    pub verdict: Verdict,
    pub score: Option<i64>,
    pub execution: String,
    pub lint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewDetail {
    #[serde(flatten)]
    pub review: ReviewRecord,
    pub files: Vec<FileReviewRecord>,
}
