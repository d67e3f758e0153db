//! Markdown report synthesis.
//!
//! `render_report` is pure: the same inputs always give the same document.
//! Only per-file sections use `###` headings, so a reader can count them.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use super::models::{FileReview, ReviewSummary, Verdict};
use crate::util::truncate_chars;

/// Path the report is uploaded to inside the execution context.
pub const SANDBOX_REPORT_PATH: &str = "/tmp/code_review_report.md";

const OUTPUT_EXCERPT_CHARS: usize = 800;

#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub repo_url: String,
    pub generated_at: DateTime<Utc>,
    /// Job-level problems worth showing in the summary (e.g. a failed clone).
    pub notes: Vec<String>,
}

fn badge(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Pass => "✅",
        Verdict::Warn => "⚠️",
        Verdict::Fail => "❌",
    }
}

/// Collapse model or tool text onto one line so it cannot open new sections.
fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn indented(text: &str) -> String {
    truncate_chars(text.trim_end(), OUTPUT_EXCERPT_CHARS)
        .lines()
        .map(|line| format!("    {}\n", line))
        .collect()
}

fn plural(n: usize, word: &str) -> String {
    format!("{} {}{}", n, word, if n == 1 { "" } else { "s" })
}

pub fn recommendations(summary: &ReviewSummary) -> Vec<String> {
    let mut recs = Vec::new();
    if summary.files_reviewed == 0 {
        recs.push(
            "No source files were analysed. Check that the repository URL is correct and that it \
             contains files in a supported language."
                .to_string(),
        );
        return recs;
    }
    if summary.execution_failures > 0 {
        recs.push(format!(
            "Fix the {} that failed to execute before merging.",
            plural(summary.execution_failures, "file")
        ));
    }
    if summary.security_notes > 0 {
        recs.push(format!(
            "Review the security notes raised on {}.",
            plural(summary.security_notes, "file")
        ));
    }
    if summary.lint_issues > 0 {
        recs.push(format!(
            "Address the {} reported by the linters.",
            plural(summary.lint_issues, "finding")
        ));
    }
    if summary.warned > 0 {
        recs.push(format!(
            "Revisit the {} marked WARN.",
            plural(summary.warned, "file")
        ));
    }
    if summary.lint_not_configured > 0 {
        recs.push(format!(
            "Add linting for the {} whose language has no configured linter.",
            plural(summary.lint_not_configured, "file")
        ));
    }
    if summary.unsupported_executions > 0 {
        recs.push(format!(
            "Add tests or run targets for the {} that could not be executed directly.",
            plural(summary.unsupported_executions, "file")
        ));
    }
    if recs.is_empty() {
        recs.push("No blocking issues found. Keep linting and tests running in CI.".to_string());
    }
    recs
}

fn render_file(out: &mut String, review: &FileReview) {
    let _ = writeln!(
        out,
        "### {} `{}`  [{}]\n",
        badge(review.verdict),
        review.path,
        review.verdict
    );
    let _ = writeln!(out, "**Language:** {}  ", review.language);
    let _ = writeln!(out, "**Execution:** {}  ", review.execution.summary());
    let _ = writeln!(out, "**Linter:** {}  ", review.lint.summary());

    match &review.critique {
        Some(critique) => {
            let _ = writeln!(out, "**Quality Score:** {}/10\n", critique.score);
            if critique.issues.is_empty() {
                let _ = writeln!(out, "**Issues:** None\n");
            } else {
                let _ = writeln!(out, "**Issues:**");
                for issue in &critique.issues {
                    let _ = writeln!(out, "- {}", one_line(issue));
                }
                out.push('\n');
            }
            let security = one_line(&critique.security);
            let _ = writeln!(
                out,
                "**Security:** {}  ",
                if security.is_empty() { "None" } else { &security }
            );
            if !critique.best_practices.trim().is_empty() {
                let _ = writeln!(out, "**Best Practices:** {}  ", one_line(&critique.best_practices));
            }
            let reason = one_line(&critique.reason);
            if reason.is_empty() {
                let _ = writeln!(out, "**Verdict:** {}", review.verdict);
            } else {
                let _ = writeln!(out, "**Verdict:** {} - {}", review.verdict, reason);
            }
        }
        None => {
            let _ = writeln!(out, "**Quality Score:** n/a  ");
            let _ = writeln!(out, "**Verdict:** {}", review.verdict);
        }
    }

    if review.execution.is_failure() {
        if let Some(output) = review.execution.output().filter(|o| !o.trim().is_empty()) {
            let _ = writeln!(out, "\n**Execution output:**\n");
            out.push_str(&indented(output));
        }
    }
    out.push('\n');
}

pub fn render_report(meta: &ReportMeta, reviews: &[FileReview]) -> String {
    let summary = ReviewSummary::from_reviews(reviews);
    let mut out = String::new();

    let _ = writeln!(out, "# Code Review Report\n");
    let _ = writeln!(out, "**Repo:** {}  ", meta.repo_url);
    let _ = writeln!(
        out,
        "**Date:** {}  ",
        meta.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(out, "**Files reviewed:** {}\n", summary.files_reviewed);
    let _ = writeln!(out, "---\n");

    let _ = writeln!(out, "## Summary\n");
    let _ = writeln!(out, "**Overall health:** {}\n", summary.health.label());
    let _ = writeln!(
        out,
        "**Verdict distribution:** {} PASS, {} WARN, {} FAIL  ",
        summary.passed, summary.warned, summary.failed
    );
    if let Some(avg) = summary.average_score {
        let _ = writeln!(out, "**Average quality score:** {:.1}/10  ", avg);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "- Execution failures: {}", summary.execution_failures);
    let _ = writeln!(out, "- Not executable: {}", summary.unsupported_executions);
    let _ = writeln!(out, "- Linter findings: {}", summary.lint_issues);
    let _ = writeln!(out, "- Files without a linter: {}", summary.lint_not_configured);
    if !meta.notes.is_empty() {
        let _ = writeln!(out, "\n**Notes:**");
        for note in &meta.notes {
            let _ = writeln!(out, "- {}", one_line(note));
        }
    }
    let _ = writeln!(out, "\n---\n");

    let _ = writeln!(out, "## File Reviews\n");
    if reviews.is_empty() {
        let _ = writeln!(out, "No source files were analysed.\n");
    }
    for review in reviews {
        render_file(&mut out, review);
    }
    let _ = writeln!(out, "---\n");

    let _ = writeln!(out, "## Overall Recommendations\n");
    for (i, rec) in recommendations(&summary).iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, rec);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::analysis::{ExecOutcome, LintOutcome};
    use crate::review::language::Language;
    use crate::review::models::Critique;
    use chrono::TimeZone;

    fn meta() -> ReportMeta {
        ReportMeta {
            repo_url: "https://github.com/x/y".to_string(),
            generated_at: Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap(),
            notes: Vec::new(),
        }
    }

    fn clean_file(path: &str) -> FileReview {
        FileReview::new(
            path,
            Language::Python,
            ExecOutcome::Success { output: "ok".into() },
            LintOutcome::Clean { output: String::new() },
            None,
        )
    }

    fn section_count(report: &str) -> usize {
        report.lines().filter(|l| l.starts_with("### ")).count()
    }

    #[test]
    fn test_header_and_sections() {
        let reviews = vec![clean_file("a.py"), clean_file("b.py"), clean_file("c.py")];
        let report = render_report(&meta(), &reviews);

        assert!(report.starts_with("# Code Review Report\n"));
        assert!(report.contains("**Repo:** https://github.com/x/y"));
        assert!(report.contains("**Date:** 2026-03-04 05:06:07 UTC"));
        assert!(report.contains("**Files reviewed:** 3"));
        assert!(report.contains("**Overall health:** Clean"));
        assert_eq!(section_count(&report), 3);
        assert!(report.contains("### ✅ `a.py`  [PASS]"));
        assert!(report.contains("## Overall Recommendations"));
        assert!(report.contains("1. No blocking issues found."));
    }

    #[test]
    fn test_deterministic() {
        let reviews = vec![clean_file("a.py")];
        assert_eq!(render_report(&meta(), &reviews), render_report(&meta(), &reviews));
    }

    #[test]
    fn test_zero_files() {
        let mut meta = meta();
        meta.notes.push("Clone failed: repository not found".into());
        let report = render_report(&meta, &[]);
        assert!(report.contains("**Files reviewed:** 0"));
        assert!(report.contains("No source files were analysed."));
        assert!(report.contains("- Clone failed: repository not found"));
        assert_eq!(section_count(&report), 0);
        assert!(report.contains("1. No source files were analysed. Check"));
    }

    #[test]
    fn test_not_configured_linter_and_failed_execution() {
        let reviews = vec![
            FileReview::new(
                "main.go",
                Language::Go,
                ExecOutcome::Failed {
                    exit_code: 1,
                    output: "panic: boom\n### not a heading".into(),
                },
                LintOutcome::NotConfigured { language: Language::Go },
                None,
            ),
            clean_file("ok.py"),
        ];
        let report = render_report(&meta(), &reviews);
        assert!(report.contains("**Linter:** not configured for go"));
        assert!(report.contains("### ❌ `main.go`  [FAIL]"));
        assert!(report.contains("    panic: boom"));
        assert!(report.contains("**Overall health:** Critical Issues"));
        assert!(report.contains("Fix the 1 file that failed to execute"));
        assert!(report.contains("Add linting for the 1 file whose language"));
        // tool output never opens a new section
        assert_eq!(section_count(&report), 2);
    }

    #[test]
    fn test_critique_fields_rendered() {
        let critique = Critique {
            score: 6,
            issues: vec!["Function too long".into(), "### sneaky\nmultiline".into()],
            security: "Uses eval on user input".into(),
            best_practices: "Split into modules".into(),
            verdict: Verdict::Warn,
            reason: "works but fragile".into(),
        };
        let reviews = vec![FileReview::new(
            "app.py",
            Language::Python,
            ExecOutcome::Success { output: String::new() },
            LintOutcome::Issues { count: 4, output: String::new() },
            Some(critique),
        )];
        let report = render_report(&meta(), &reviews);
        assert!(report.contains("### ⚠️ `app.py`  [WARN]"));
        assert!(report.contains("**Quality Score:** 6/10"));
        assert!(report.contains("- Function too long"));
        assert!(report.contains("- ### sneaky multiline"));
        assert!(report.contains("**Security:** Uses eval on user input"));
        assert!(report.contains("**Verdict:** WARN - works but fragile"));
        assert!(report.contains("**Average quality score:** 6.0/10"));
        assert!(report.contains("Review the security notes raised on 1 file."));
        assert!(report.contains("Address the 4 findings reported by the linters."));
        assert_eq!(section_count(&report), 1);
    }
}
