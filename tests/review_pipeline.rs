//! End-to-end runs of the review pipeline against scripted sandboxes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use futures::StreamExt;

use interna_review::config::ReviewSettings;
use interna_review::review::critique::ModelClient;
use interna_review::review::db::{DbHandle, ReviewDb};
use interna_review::review::models::ReviewStatus;
use interna_review::review::sandbox::{CommandOutput, ExecutionContext, SandboxProvider};
use interna_review::review::worker::CLEANUP_MARKER;
use interna_review::review::{EventKind, ReviewEvent, ReviewService};

type ExecScript = Arc<dyn Fn(&str) -> Option<CommandOutput> + Send + Sync>;

/// What the fake sandbox does for one job.
#[derive(Clone)]
struct Scenario {
    provision_error: Option<&'static str>,
    clone_output: CommandOutput,
    files: Vec<(&'static str, &'static str)>,
    /// `None` from the script means the command never finishes.
    exec: ExecScript,
    panic_on_read: Option<&'static str>,
}

impl Scenario {
    fn with_files(files: Vec<(&'static str, &'static str)>) -> Self {
        Self {
            provision_error: None,
            clone_output: CommandOutput::new(0, ""),
            files,
            exec: Arc::new(clean_exec),
            panic_on_read: None,
        }
    }
}

fn clean_exec(command: &str) -> Option<CommandOutput> {
    if command.contains("pylint") {
        Some(CommandOutput::new(
            0,
            "Your code has been rated at 10.00/10",
        ))
    } else {
        Some(CommandOutput::new(0, "ok"))
    }
}

#[derive(Default)]
struct Recorder {
    created: AtomicUsize,
    destroyed: AtomicUsize,
    commands: Mutex<Vec<String>>,
    uploads: Mutex<Vec<String>>,
}

struct FakeProvider {
    scenario: Scenario,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl SandboxProvider for FakeProvider {
    async fn create(&self) -> Result<Box<dyn ExecutionContext>> {
        if let Some(err) = self.scenario.provision_error {
            bail!("{}", err);
        }
        let n = self.recorder.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(FakeContext {
            id: format!("fake-{}", n),
            scenario: self.scenario.clone(),
            recorder: self.recorder.clone(),
            cloned: Mutex::new(false),
        }))
    }
}

struct FakeContext {
    id: String,
    scenario: Scenario,
    recorder: Arc<Recorder>,
    cloned: Mutex<bool>,
}

#[async_trait]
impl ExecutionContext for FakeContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn clone_repo(&self, _repo_url: &str, _dest: &str) -> Result<CommandOutput> {
        let output = self.scenario.clone_output.clone();
        *self.cloned.lock().unwrap() = output.success();
        Ok(output)
    }

    async fn list_files(&self, root: &str) -> Result<Vec<String>> {
        if !*self.cloned.lock().unwrap() {
            bail!("{}: No such file or directory", root);
        }
        Ok(self.scenario.files.iter().map(|(p, _)| p.to_string()).collect())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        if let Some(target) = self.scenario.panic_on_read {
            if path.ends_with(target) {
                panic!("fake sandbox exploded reading {}", path);
            }
        }
        self.scenario
            .files
            .iter()
            .find(|(p, _)| path == format!("repo/{}", p))
            .map(|(_, code)| code.to_string())
            .ok_or_else(|| anyhow::anyhow!("{}: not found", path))
    }

    async fn exec(&self, command: &str, _timeout: Duration) -> Result<CommandOutput> {
        self.recorder.commands.lock().unwrap().push(command.to_string());
        match (self.scenario.exec)(command) {
            Some(output) => Ok(output),
            None => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                bail!("unreachable in tests")
            }
        }
    }

    async fn upload_file(&self, _content: &[u8], path: &str) -> Result<()> {
        self.recorder.uploads.lock().unwrap().push(path.to_string());
        Ok(())
    }

    async fn destroy(self: Box<Self>) -> Result<()> {
        self.recorder.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct CannedModel {
    reply: String,
}

#[async_trait]
impl ModelClient for CannedModel {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(self.reply.clone())
    }
}

fn settings() -> ReviewSettings {
    ReviewSettings {
        ai_critique: false,
        report_dir: None,
        ..ReviewSettings::default()
    }
}

fn service_for(scenario: Scenario, settings: ReviewSettings) -> (ReviewService, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let provider = Arc::new(FakeProvider {
        scenario,
        recorder: recorder.clone(),
    });
    (ReviewService::new(provider, settings), recorder)
}

async fn run_job(service: &ReviewService) -> (String, Vec<ReviewEvent>) {
    let job = service.submit("https://github.com/x/y").unwrap();
    let stream = service.open_stream(&job.job_id).unwrap();
    let records = stream.into_stream().collect::<Vec<_>>().await;
    (job.job_id, records)
}

fn pairs(records: &[ReviewEvent]) -> Vec<(EventKind, &str)> {
    records.iter().map(|r| (r.kind, r.message.as_str())).collect()
}

fn cleanup_markers(records: &[ReviewEvent]) -> usize {
    records
        .iter()
        .filter(|r| r.kind == EventKind::Step && r.message.starts_with(CLEANUP_MARKER))
        .count()
}

fn assert_single_terminal(records: &[ReviewEvent]) {
    let last = records.last().expect("stream yielded nothing");
    assert!(
        matches!(last.kind, EventKind::Done | EventKind::Error),
        "stream ended with {:?}",
        last
    );
    let dones = records.iter().filter(|r| r.kind == EventKind::Done).count();
    assert!(dones <= 1, "more than one done: {:?}", pairs(records));
}

#[tokio::test]
async fn test_clean_repository_event_sequence() {
    let scenario = Scenario::with_files(vec![
        ("a.py", "print('a')\n"),
        ("b.py", "print('b')\n"),
        ("c.py", "print('c')\n"),
    ]);
    let (service, recorder) = service_for(scenario, settings());
    let (job_id, records) = run_job(&service).await;

    let mut expected = vec![
        (EventKind::Step, "Creating sandbox...".to_string()),
        (EventKind::Step, "Sandbox ready (id=fake-1)".to_string()),
        (EventKind::Step, "Cloning https://github.com/x/y...".to_string()),
        (EventKind::Step, "Found 3 source file(s)".to_string()),
        (EventKind::File, "a.py".to_string()),
        (EventKind::File, "b.py".to_string()),
        (EventKind::File, "c.py".to_string()),
    ];
    for (i, path) in ["a.py", "b.py", "c.py"].iter().enumerate() {
        expected.extend([
            (EventKind::File, format!("Reading {} ({}/3)", path, i + 1)),
            (EventKind::Execute, format!("Executing {}...", path)),
            (EventKind::Execute, format!("{}: execution success", path)),
            (EventKind::Lint, format!("Linting {}...", path)),
            (EventKind::Lint, format!("{}: linter clean", path)),
        ]);
    }
    expected.extend([
        (EventKind::Report, "Report ready (3 file(s) reviewed)".to_string()),
        (EventKind::Step, "Cleaning up sandbox...".to_string()),
        (EventKind::Step, format!("{}: sandbox fake-1 deleted", CLEANUP_MARKER)),
    ]);

    let (body, last) = records.split_at(records.len() - 1);
    let actual: Vec<(EventKind, String)> = body.iter().map(|r| (r.kind, r.message.clone())).collect();
    assert_eq!(actual, expected);

    assert_eq!(last[0].kind, EventKind::Done);
    assert!(last[0].message.starts_with("Review complete: 3 files reviewed, 3 passed"));

    let report = records
        .iter()
        .find(|r| r.kind == EventKind::Report)
        .and_then(|r| r.data.as_deref())
        .unwrap();
    assert!(report.contains("# Code Review Report"));
    assert_eq!(report.lines().filter(|l| l.starts_with("### ")).count(), 3);

    assert_eq!(recorder.destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(
        recorder.uploads.lock().unwrap().as_slice(),
        ["/tmp/code_review_report.md"]
    );
    assert!(!service.registry().contains(&job_id));
}

#[tokio::test]
async fn test_linter_install_runs_once_per_job() {
    let scenario = Scenario::with_files(vec![("a.py", "x = 1\n"), ("b.py", "y = 2\n")]);
    let (service, recorder) = service_for(scenario, settings());
    run_job(&service).await;

    let commands = recorder.commands.lock().unwrap();
    let installs = commands.iter().filter(|c| c.starts_with("pip install")).count();
    assert_eq!(installs, 1);
    assert!(commands.contains(&"cd repo && python a.py".to_string()));
    assert!(commands.contains(&"cd repo && flake8 b.py".to_string()));
}

#[tokio::test]
async fn test_language_without_linter_is_not_configured() {
    let scenario = Scenario::with_files(vec![("main.go", "package main\nfunc main() {}\n")]);
    let (service, _recorder) = service_for(scenario, settings());
    let (_, records) = run_job(&service).await;
    let pairs = pairs(&records);

    let before = pairs
        .iter()
        .position(|p| *p == (EventKind::Lint, "Linting main.go..."))
        .unwrap();
    assert_eq!(
        pairs[before + 1],
        (EventKind::Lint, "main.go: linter not configured for go")
    );

    let report = records
        .iter()
        .find_map(|r| r.data.as_deref())
        .unwrap();
    assert!(report.contains("**Linter:** not configured for go"));
    assert_eq!(records.last().unwrap().kind, EventKind::Done);
    assert!(!records.iter().any(|r| r.kind == EventKind::Error));
}

#[tokio::test]
async fn test_discovery_order_is_preserved() {
    let scenario = Scenario::with_files(vec![
        ("tools/run.sh", "echo hi\n"),
        ("app.js", "console.log(1)\n"),
        ("node_modules/dep/index.js", "module.exports = 1\n"),
        ("README.md", "# readme\n"),
        ("lib/util.py", "pass\n"),
    ]);
    let (service, _recorder) = service_for(scenario, settings());
    let (_, records) = run_job(&service).await;

    let echoed: Vec<&str> = records
        .iter()
        .filter(|r| r.kind == EventKind::File && !r.message.starts_with("Reading "))
        .map(|r| r.message.as_str())
        .collect();
    assert_eq!(echoed, ["app.js", "lib/util.py", "tools/run.sh"]);

    let executed: Vec<&str> = records
        .iter()
        .filter(|r| r.kind == EventKind::Execute)
        .filter_map(|r| r.message.strip_prefix("Executing "))
        .filter_map(|m| m.strip_suffix("..."))
        .collect();
    assert_eq!(executed, echoed);

    let linted: Vec<&str> = records
        .iter()
        .filter(|r| r.kind == EventKind::Lint)
        .filter_map(|r| r.message.strip_prefix("Linting "))
        .filter_map(|m| m.strip_suffix("..."))
        .collect();
    assert_eq!(linted, echoed);
}

#[tokio::test]
async fn test_clone_failure_still_reports() {
    let mut scenario = Scenario::with_files(vec![("a.py", "print(1)\n")]);
    scenario.clone_output = CommandOutput::new(128, "fatal: repository not found\n");
    let (service, recorder) = service_for(scenario, settings());
    let (_, records) = run_job(&service).await;
    let pairs = pairs(&records);

    assert!(pairs.contains(&(
        EventKind::Error,
        "Clone failed (exit code 128): fatal: repository not found"
    )));
    assert!(pairs.contains(&(EventKind::Step, "Found 0 source file(s)")));

    let report = records
        .iter()
        .find(|r| r.kind == EventKind::Report)
        .and_then(|r| r.data.as_deref())
        .unwrap();
    assert!(report.contains("No source files were analysed"));
    assert!(report.contains("Clone failed"));

    assert_eq!(cleanup_markers(&records), 1);
    assert_eq!(recorder.destroyed.load(Ordering::SeqCst), 1);
    assert_single_terminal(&records);
    assert_eq!(records.last().unwrap().kind, EventKind::Done);
}

#[tokio::test]
async fn test_per_file_failure_does_not_stop_job() {
    let mut scenario = Scenario::with_files(vec![("bad.py", "raise SystemExit(3)\n"), ("good.py", "pass\n")]);
    scenario.exec = Arc::new(|command: &str| {
        if command.contains("python bad.py") {
            Some(CommandOutput::new(3, "Traceback (most recent call last):\nSystemExit: 3\n"))
        } else if command.contains("flake8 good.py") {
            Some(CommandOutput::new(1, "good.py:1:1: E302 expected 2 blank lines\n"))
        } else {
            clean_exec(command)
        }
    });
    let (service, recorder) = service_for(scenario, settings());
    let (_, records) = run_job(&service).await;
    let pairs = pairs(&records);

    assert!(pairs.contains(&(EventKind::Execute, "bad.py: execution failed (exit code 3)")));
    assert!(pairs.contains(&(EventKind::Lint, "good.py: linter 1 issue")));

    let report = records
        .iter()
        .find(|r| r.kind == EventKind::Report)
        .and_then(|r| r.data.as_deref())
        .unwrap();
    assert!(report.contains("### ❌ `bad.py`  [FAIL]"));
    assert!(report.contains("### ⚠️ `good.py`  [WARN]"));

    assert_eq!(cleanup_markers(&records), 1);
    assert_eq!(recorder.destroyed.load(Ordering::SeqCst), 1);
    assert_single_terminal(&records);
    assert!(records.last().unwrap().message.contains("1 failed"));
}

#[tokio::test]
async fn test_provisioning_failure_ends_with_error_then_done() {
    let mut scenario = Scenario::with_files(vec![]);
    scenario.provision_error = Some("docker daemon not running");
    let (service, recorder) = service_for(scenario, settings());
    let (job_id, records) = run_job(&service).await;

    assert_eq!(
        pairs(&records),
        vec![
            (EventKind::Step, "Creating sandbox..."),
            (
                EventKind::Error,
                "Failed to create sandbox: docker daemon not running"
            ),
            (
                EventKind::Step,
                "Cleanup complete: no sandbox was provisioned"
            ),
            (EventKind::Done, "Review complete"),
        ]
    );
    assert_eq!(recorder.created.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.destroyed.load(Ordering::SeqCst), 0);
    assert!(!service.registry().contains(&job_id));
}

#[tokio::test]
async fn test_worker_panic_is_contained() {
    let mut scenario = Scenario::with_files(vec![("a.py", "pass\n"), ("b.py", "pass\n")]);
    scenario.panic_on_read = Some("b.py");
    let (service, recorder) = service_for(scenario, settings());
    let (_, records) = run_job(&service).await;

    let error = records
        .iter()
        .find(|r| r.kind == EventKind::Error)
        .unwrap();
    assert!(error.message.starts_with("Review worker panicked: fake sandbox exploded"));
    assert!(!records.iter().any(|r| r.kind == EventKind::Report));

    assert_eq!(cleanup_markers(&records), 1);
    assert_eq!(recorder.destroyed.load(Ordering::SeqCst), 1);
    assert_single_terminal(&records);
}

#[tokio::test]
async fn test_stuck_worker_times_out_stream() {
    let mut scenario = Scenario::with_files(vec![("loop.py", "while True: pass\n")]);
    scenario.exec = Arc::new(|command: &str| {
        if command.contains("python loop.py") {
            None
        } else {
            clean_exec(command)
        }
    });
    let settings = ReviewSettings {
        stream_timeout_secs: 1,
        ..settings()
    };
    let (service, _recorder) = service_for(scenario, settings);
    let (job_id, records) = run_job(&service).await;

    let last = records.last().unwrap();
    assert_eq!(last.kind, EventKind::Error);
    assert_eq!(last.message, "Timed out after 1s waiting for the next event");
    assert!(pairs(&records).contains(&(EventKind::Execute, "Executing loop.py...")));
    assert!(!records.iter().any(|r| r.kind == EventKind::Done));
    assert!(!service.registry().contains(&job_id));
}

#[tokio::test]
async fn test_ai_critique_steps_and_history() {
    let scenario = Scenario::with_files(vec![("app.py", "def main():\n    return 1\n")]);
    let settings = ReviewSettings {
        ai_critique: true,
        ..settings()
    };
    let critic: Arc<dyn ModelClient> = Arc::new(CannedModel {
        reply: r#"```json
{"score": 8, "issues": ["No docstring"], "security": "No issues found",
 "best_practices": "Small and readable", "verdict": "PASS", "reason": "Works"}
```"#
            .to_string(),
    });
    let db = DbHandle::new(ReviewDb::new_in_memory().unwrap());
    let (service, _recorder) = service_for(scenario, settings);
    let service = service.with_critic(Some(critic)).with_db(Some(db.clone()));
    let (job_id, records) = run_job(&service).await;
    let pairs = pairs(&records);

    assert!(pairs.contains(&(EventKind::Step, "Analysing app.py with AI...")));
    assert!(pairs.contains(&(EventKind::Step, "app.py: score 8/10 - PASS")));
    assert_eq!(records.last().unwrap().kind, EventKind::Done);

    let detail = db
        .call(move |db| db.get_review(&job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(detail.review.status, ReviewStatus::Completed);
    assert_eq!(detail.review.files_reviewed, 1);
    assert_eq!(detail.files.len(), 1);
    assert_eq!(detail.files[0].path, "app.py");
    assert_eq!(detail.files[0].score, Some(8));
}

#[tokio::test]
async fn test_concurrent_jobs_are_isolated() {
    let scenario = Scenario::with_files(vec![("a.py", "pass\n")]);
    let (service, recorder) = service_for(scenario, settings());

    let mut handles = Vec::new();
    for _ in 0..4 {
        let service = service.clone();
        handles.push(tokio::spawn(async move { run_job(&service).await }));
    }
    let mut seen = HashMap::new();
    for handle in handles {
        let (job_id, records) = handle.await.unwrap();
        assert_eq!(cleanup_markers(&records), 1);
        assert_single_terminal(&records);
        seen.insert(job_id, records.len());
    }
    assert_eq!(seen.len(), 4);
    assert_eq!(recorder.destroyed.load(Ordering::SeqCst), 4);
    assert!(service.registry().is_empty());
}
