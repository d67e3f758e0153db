//! Layered configuration for the review service.
//!
//! Values are resolved in order: built-in defaults, then
//! `.interna/review.toml` in the project directory, then environment
//! variables (a `.env` file is loaded first if present). CLI flags are applied
//! on top by the `serve` command.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//!
//! [sandbox]
//! backend = "docker"
//! image = "python:3.12"
//! memory = "2g"
//! cpus = 2.0
//! clone_timeout_secs = 120
//!
//! [review]
//! exec_timeout_secs = 30
//! stream_timeout_secs = 300
//! ai_critique = true
//! report_dir = ".interna/reports"
//!
//! [model]
//! model = "gemini-2.5-flash"
//! temperature = 0.2
//!
//! [database]
//! path = ".interna/reviews.db"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::review::sandbox::SandboxConfig;

/// Environment variable holding the model provider API key.
pub const MODEL_API_KEY_ENV: &str = "GOOGLE_API_KEY";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub server: ServerSection,
    pub sandbox: SandboxConfig,
    pub review: ReviewSettings,
    pub model: ModelConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Knobs for a single review job.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReviewSettings {
    /// Per-file execution bound.
    pub exec_timeout_secs: u64,
    /// Per-linter invocation bound.
    pub lint_timeout_secs: u64,
    /// Bound for the one-time `pip install` of the Python linters.
    pub linter_install_timeout_secs: u64,
    /// How long the stream adapter waits for the next event before giving up.
    pub stream_timeout_secs: u64,
    /// Cap on discovered files; `None` analyses everything.
    pub max_files: Option<usize>,
    pub ai_critique: bool,
    /// Characters of source sent to the model per file.
    pub critique_excerpt_chars: usize,
    /// Directory receiving `<job_id>.md` copies of each report.
    pub report_dir: Option<PathBuf>,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            exec_timeout_secs: 30,
            lint_timeout_secs: 30,
            linter_install_timeout_secs: 60,
            stream_timeout_secs: 300,
            max_files: None,
            ai_critique: true,
            critique_excerpt_chars: 3000,
            report_dir: Some(PathBuf::from(".interna/reports")),
        }
    }
}

impl ReviewSettings {
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub fn lint_timeout(&self) -> Duration {
        Duration::from_secs(self.lint_timeout_secs)
    }

    pub fn linter_install_timeout(&self) -> Duration {
        Duration::from_secs(self.linter_install_timeout_secs)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model: String,
    /// Normally supplied through `GOOGLE_API_KEY` rather than the file.
    pub api_key: Option<String>,
    pub base_url: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            temperature: 0.2,
            max_output_tokens: 2048,
            request_timeout_secs: 120,
        }
    }
}

impl ModelConfig {
    /// The API key if one is configured and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".interna/reviews.db"),
        }
    }
}

impl ReviewConfig {
    /// Path of the optional config file inside a project directory.
    pub fn file_path(project_dir: &Path) -> PathBuf {
        project_dir.join(".interna").join("review.toml")
    }

    /// Load defaults, the project file and environment overrides.
    pub fn load(project_dir: &Path) -> Result<Self> {
        // A missing .env is the normal case.
        let _ = dotenvy::from_path(project_dir.join(".env"));

        let mut config = Self::from_file(&Self::file_path(project_dir))?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a config file, returning defaults when it does not exist.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Apply environment overrides through `lookup` so tests need not touch
    /// the process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(MODEL_API_KEY_ENV) {
            self.model.api_key = Some(key);
        }
        if let Some(model) = lookup("REVIEW_MODEL") {
            self.model.model = model;
        }
        if let Some(backend) = lookup("REVIEW_SANDBOX_BACKEND") {
            match backend.parse() {
                Ok(backend) => self.sandbox.backend = backend,
                Err(e) => tracing::warn!(value = %backend, "Ignoring REVIEW_SANDBOX_BACKEND: {}", e),
            }
        }
        if let Some(image) = lookup("REVIEW_SANDBOX_IMAGE") {
            self.sandbox.image = image;
        }
        if let Some(secs) = lookup("REVIEW_STREAM_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            self.review.stream_timeout_secs = secs;
        }
    }
}
