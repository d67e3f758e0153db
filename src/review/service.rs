//! Job submission and stream lookup.

use std::sync::Arc;

use serde::Serialize;
use tracing::Instrument;

use super::critique::ModelClient;
use super::db::DbHandle;
use super::jobs::JobRegistry;
use super::sandbox::SandboxProvider;
use super::stream::JobStream;
use super::worker::ReviewWorker;
use crate::config::{MODEL_API_KEY_ENV, ReviewSettings};
use crate::errors::ReviewError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedJob {
    pub job_id: String,
    pub stream_url: String,
}

/// Owns the job registry and everything a worker needs.
#[derive(Clone)]
pub struct ReviewService {
    registry: JobRegistry,
    provider: Arc<dyn SandboxProvider>,
    critic: Option<Arc<dyn ModelClient>>,
    settings: ReviewSettings,
    db: Option<DbHandle>,
}

impl ReviewService {
    pub fn new(provider: Arc<dyn SandboxProvider>, settings: ReviewSettings) -> Self {
        Self {
            registry: JobRegistry::new(),
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

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn db(&self) -> Option<&DbHandle> {
        self.db.as_ref()
    }

    pub fn settings(&self) -> &ReviewSettings {
        &self.settings
    }

    /// Validate, register the job and start its worker. Returns without
    /// waiting for any of the work.
    pub fn submit(&self, repo_url: &str) -> Result<SubmittedJob, ReviewError> {
        let repo_url = repo_url.trim();
        if !(repo_url.starts_with("http://") || repo_url.starts_with("https://")) {
            return Err(ReviewError::InvalidRequest(
                "repo_url must be an http(s) URL".to_string(),
            ));
        }
        if self.settings.ai_critique && self.critic.is_none() {
            return Err(ReviewError::Misconfigured(format!(
                "{} not configured",
                MODEL_API_KEY_ENV
            )));
        }

        let (job_id, emitter) = self.registry.create(repo_url);
        let worker = ReviewWorker::new(repo_url, emitter, self.provider.clone(), self.settings.clone())
            .with_critic(self.critic.clone().filter(|_| self.settings.ai_critique))
            .with_db(self.db.clone());

        let span = tracing::info_span!("review", job_id = %job_id);
        tokio::spawn(
            async move {
                // The worker reports its own failures on the stream.
                let _ = worker.run().await;
            }
            .instrument(span),
        );

        tracing::info!(job_id = %job_id, repo_url, "review submitted");
        Ok(SubmittedJob {
            stream_url: format!("/review/{}", job_id),
            job_id,
        })
    }

    /// Claim the job's event stream. At most one stream per job.
    pub fn open_stream(&self, job_id: &str) -> Result<JobStream, ReviewError> {
        self.registry
            .take_stream(job_id, self.settings.stream_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::sandbox::{ExecutionContext, SandboxProvider};
    use async_trait::async_trait;

    struct NoSandbox;

    #[async_trait]
    impl SandboxProvider for NoSandbox {
        async fn create(&self) -> anyhow::Result<Box<dyn ExecutionContext>> {
            anyhow::bail!("no sandbox in unit tests")
        }
    }

    fn settings(ai_critique: bool) -> ReviewSettings {
        ReviewSettings {
            ai_critique,
            report_dir: None,
            ..ReviewSettings::default()
        }
    }

    #[tokio::test]
    async fn test_submit_rejects_non_http_url() {
        let service = ReviewService::new(Arc::new(NoSandbox), settings(false));
        for url in ["git@github.com:x/y.git", "ftp://x", "", "   "] {
            let err = service.submit(url).unwrap_err();
            assert!(matches!(err, ReviewError::InvalidRequest(_)), "{}", url);
        }
        assert!(service.registry().is_empty());
    }

    #[tokio::test]
    async fn test_submit_without_model_key_registers_nothing() {
        let service = ReviewService::new(Arc::new(NoSandbox), settings(true));
        let err = service.submit("https://github.com/x/y").unwrap_err();
        match err {
            ReviewError::Misconfigured(msg) => assert!(msg.contains("GOOGLE_API_KEY")),
            other => panic!("Expected Misconfigured, got {:?}", other),
        }
        assert!(service.registry().is_empty());
    }

    #[tokio::test]
    async fn test_submit_registers_and_returns_stream_url() {
        let service = ReviewService::new(Arc::new(NoSandbox), settings(false));
        let job = service.submit("https://github.com/x/y").unwrap();
        assert_eq!(job.stream_url, format!("/review/{}", job.job_id));
        assert!(service.registry().contains(&job.job_id));
    }

    #[tokio::test]
    async fn test_open_stream_unknown_job() {
        let service = ReviewService::new(Arc::new(NoSandbox), settings(false));
        let err = service.open_stream("missing").unwrap_err();
        assert!(matches!(err, ReviewError::NotFound { .. }));
    }
}
