//! Job registry: job id → channel receiver.
//!
//! The registry is owned by the service instance, not a process global. Each
//! entry's receiver can be taken exactly once; the entry itself stays until
//! the stream that took it is dropped, so a second consumer fails fast with
//! `AlreadyStreaming` instead of racing on a drained channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use uuid::Uuid;

use super::events::{JobMessage, StepEmitter};
use super::stream::JobStream;
use crate::errors::ReviewError;

#[derive(Debug)]
struct JobSlot {
    repo_url: String,
    created_at: DateTime<Utc>,
    receiver: Option<UnboundedReceiver<JobMessage>>,
}

/// Snapshot of a registered job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub job_id: String,
    pub repo_url: String,
    pub created_at: DateTime<Utc>,
    pub streaming: bool,
}

#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<DashMap<String, JobSlot>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job and return its id with the producer half of its
    /// channel.
    pub fn create(&self, repo_url: &str) -> (String, StepEmitter) {
        let job_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.jobs.insert(
            job_id.clone(),
            JobSlot {
                repo_url: repo_url.to_string(),
                created_at: Utc::now(),
                receiver: Some(rx),
            },
        );
        tracing::debug!(job_id = %job_id, repo_url, "job registered");
        (job_id.clone(), StepEmitter::new(job_id, tx))
    }

    /// Move the job's receiver into a [`JobStream`]. The job is removed from
    /// the registry when that stream is dropped.
    pub fn take_stream(&self, job_id: &str, wait_timeout: Duration) -> Result<JobStream, ReviewError> {
        let receiver = {
            let mut slot = self
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| ReviewError::not_found(job_id))?;
            slot.receiver
                .take()
                .ok_or_else(|| ReviewError::AlreadyStreaming {
                    job_id: job_id.to_string(),
                })?
        };
        let lease = JobLease {
            registry: self.clone(),
            job_id: job_id.to_string(),
        };
        Ok(JobStream::new(receiver, wait_timeout, lease))
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn get(&self, job_id: &str) -> Option<JobInfo> {
        self.jobs.get(job_id).map(|slot| JobInfo {
            job_id: job_id.to_string(),
            repo_url: slot.repo_url.clone(),
            created_at: slot.created_at,
            streaming: slot.receiver.is_none(),
        })
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn remove(&self, job_id: &str) -> bool {
        let removed = self.jobs.remove(job_id).is_some();
        if removed {
            tracing::debug!(job_id, "job removed from registry");
        }
        removed
    }
}

/// Removes its job from the registry when dropped.
#[derive(Debug)]
pub struct JobLease {
    registry: JobRegistry,
    job_id: String,
}

impl JobLease {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for JobLease {
    fn drop(&mut self) {
        self.registry.remove(&self.job_id);
    }
}
