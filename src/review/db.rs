use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use super::models::{
    FileReview, FileReviewRecord, ReviewDetail, ReviewRecord, ReviewStatus, ReviewSummary, Verdict,
};

/// Async-safe handle to the review database.
///
/// Wraps `ReviewDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so SQLite I/O never ties up
/// async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<ReviewDb>>,
}

impl DbHandle {
    pub fn new(db: ReviewDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&ReviewDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct ReviewDb {
    conn: Connection,
}

struct ReviewRow {
    job_id: String,
    repo_url: String,
    status: String,
    files_reviewed: i64,
    overall_score: Option<f64>,
    health: Option<String>,
    report: Option<String>,
    error: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

impl ReviewRow {
    fn into_record(self) -> Result<ReviewRecord> {
        Ok(ReviewRecord {
            status: ReviewStatus::from_str(&self.status).map_err(|e| anyhow::anyhow!(e))?,
            job_id: self.job_id,
            repo_url: self.repo_url,
            files_reviewed: self.files_reviewed,
            overall_score: self.overall_score,
            health: self.health,
            report: self.report,
            error: self.error,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

impl ReviewDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS reviews (
                    job_id TEXT PRIMARY KEY,
                    repo_url TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'running',
                    files_reviewed INTEGER NOT NULL DEFAULT 0,
                    overall_score REAL,
                    report TEXT,
                    error TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    completed_at TEXT
                );

                CREATE TABLE IF NOT EXISTS file_reviews (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_id TEXT NOT NULL REFERENCES reviews(job_id) ON DELETE CASCADE,
                    path TEXT NOT NULL,
                    language TEXT NOT NULL,
                    verdict TEXT NOT NULL,
                    score INTEGER,
                    execution TEXT NOT NULL,
                    lint TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_file_reviews_job ON file_reviews(job_id);
                CREATE INDEX IF NOT EXISTS idx_reviews_created ON reviews(created_at);
                ",
            )
            .context("Failed to create tables")?;

        // Additive migrations (nullable columns, safe to re-run).
        match self.conn.execute("ALTER TABLE reviews ADD COLUMN health TEXT", []) {
            Ok(_) => {}
            Err(e) if e.to_string().contains("duplicate column") => {}
            Err(e) => return Err(anyhow::anyhow!("Failed to add health column: {}", e)),
        }
        Ok(())
    }

    pub fn insert_review(&self, job_id: &str, repo_url: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO reviews (job_id, repo_url, status) VALUES (?1, ?2, ?3)",
                params![job_id, repo_url, ReviewStatus::Running.as_str()],
            )
            .context("Failed to insert review")?;
        Ok(())
    }

    pub fn complete_review(
        &self,
        job_id: &str,
        summary: &ReviewSummary,
        report: &str,
        files: &[FileReview],
    ) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "UPDATE reviews SET status = ?1, files_reviewed = ?2, overall_score = ?3, health = ?4,
                report = ?5, completed_at = datetime('now') WHERE job_id = ?6",
            params![
                ReviewStatus::Completed.as_str(),
                summary.files_reviewed as i64,
                summary.average_score,
                summary.health.label(),
                report,
                job_id
            ],
        )
        .context("Failed to update review")?;
        tx.execute("DELETE FROM file_reviews WHERE job_id = ?1", params![job_id])
            .context("Failed to clear file reviews")?;
        for file in files {
            tx.execute(
                "INSERT INTO file_reviews (job_id, path, language, verdict, score, execution, lint)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    job_id,
                    file.path,
                    file.language.as_str(),
                    file.verdict.as_str(),
                    file.score().map(i64::from),
                    file.execution.summary(),
                    file.lint.summary()
                ],
            )
            .with_context(|| format!("Failed to insert file review for {}", file.path))?;
        }
        tx.commit().context("Failed to commit review")?;
        Ok(())
    }

    pub fn fail_review(&self, job_id: &str, error: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE reviews SET status = ?1, error = ?2, completed_at = datetime('now') WHERE job_id = ?3",
                params![ReviewStatus::Failed.as_str(), error, job_id],
            )
            .context("Failed to mark review failed")?;
        Ok(())
    }

    pub fn get_review(&self, job_id: &str) -> Result<Option<ReviewDetail>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT job_id, repo_url, status, files_reviewed, overall_score, health, report, error, created_at, completed_at
                 FROM reviews WHERE job_id = ?1",
            )
            .context("Failed to prepare get_review")?;
        let mut rows = stmt
            .query_map(params![job_id], |row| {
                Ok(ReviewRow {
                    job_id: row.get(0)?,
                    repo_url: row.get(1)?,
                    status: row.get(2)?,
                    files_reviewed: row.get(3)?,
                    overall_score: row.get(4)?,
                    health: row.get(5)?,
                    report: row.get(6)?,
                    error: row.get(7)?,
                    created_at: row.get(8)?,
                    completed_at: row.get(9)?,
                })
            })
            .context("Failed to query review")?;
        let review = match rows.next() {
            Some(row) => row.context("Failed to read review row")?.into_record()?,
            None => return Ok(None),
        };
        let files = self.get_file_reviews(job_id)?;
        Ok(Some(ReviewDetail { review, files }))
    }

    pub fn get_file_reviews(&self, job_id: &str) -> Result<Vec<FileReviewRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT path, language, verdict, score, execution, lint
                 FROM file_reviews WHERE job_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare get_file_reviews")?;
        let rows = stmt
            .query_map(params![job_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .context("Failed to query file reviews")?;
        let mut files = Vec::new();
        for row in rows {
            let (path, language, verdict, score, execution, lint) =
                row.context("Failed to read file review row")?;
            files.push(FileReviewRecord {
                verdict: Verdict::from_str(&verdict).map_err(|e| anyhow::anyhow!(e))?,
                path,
                language,
                score,
                execution,
                lint,
            });
        }
        Ok(files)
    }

    /// Most recent reviews first, without report bodies.
    pub fn list_reviews(&self, limit: usize) -> Result<Vec<ReviewRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT job_id, repo_url, status, files_reviewed, overall_score, health, error, created_at, completed_at
                 FROM reviews ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            )
            .context("Failed to prepare list_reviews")?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(ReviewRow {
                    job_id: row.get(0)?,
                    repo_url: row.get(1)?,
                    status: row.get(2)?,
                    files_reviewed: row.get(3)?,
                    overall_score: row.get(4)?,
                    health: row.get(5)?,
                    report: None,
                    error: row.get(6)?,
                    created_at: row.get(7)?,
                    completed_at: row.get(8)?,
                })
            })
            .context("Failed to query reviews")?;
        let mut reviews = Vec::new();
        for row in rows {
            reviews.push(row.context("Failed to read review row")?.into_record()?);
        }
        Ok(reviews)
    }
}
