//! Typed errors for the review service.
//!
//! `ReviewError` covers everything a caller of the job API can observe
//! synchronously: rejected submissions, missing configuration and unknown or
//! already-claimed streams. Failures *inside* a running job never surface here;
//! they travel to the client as `error` events on the job's stream.

use thiserror::Error;

/// Errors returned by job submission and stream lookup.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Service misconfigured: {0}")]
    Misconfigured(String),

    #[error("Job {job_id} not found")]
    NotFound { job_id: String },

    #[error("Job {job_id} is already being streamed")]
    AlreadyStreaming { job_id: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ReviewError {
    pub fn not_found(job_id: impl Into<String>) -> Self {
        Self::NotFound {
            job_id: job_id.into(),
        }
    }
}
