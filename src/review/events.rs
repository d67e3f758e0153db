//! Event records and the worker-side emitter.
//!
//! A job's channel carries [`JobMessage`]s: real [`ReviewEvent`]s followed by
//! exactly one [`JobMessage::EndOfStream`]. The sentinel is a distinct variant
//! so it can never be confused with an event whose payload happens to be empty.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Closed set of event kinds a client routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Step,
    File,
    Execute,
    Lint,
    Report,
    Error,
    Done,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Step => "step",
            EventKind::File => "file",
            EventKind::Execute => "execute",
            EventKind::Lint => "lint",
            EventKind::Report => "report",
            EventKind::Error => "error",
            EventKind::Done => "done",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress record. Serialises as `{ "type", "message"?, "data"? }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl ReviewEvent {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(kind: EventKind, message: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: Some(data.into()),
        }
    }

    pub fn to_json(&self) -> String {
        // A struct of strings and a unit enum cannot fail to serialise.
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"type":"{}"}}"#, self.kind.as_str())
        })
    }
}

/// What travels on a job's channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobMessage {
    Event(ReviewEvent),
    EndOfStream,
}

/// Worker-side handle for one job's channel.
///
/// Sends are fire-and-forget into an unbounded queue, so emitting never waits
/// on the consumer and never fails observably. Once the consumer is gone the
/// sends become no-ops.
#[derive(Debug, Clone)]
pub struct StepEmitter {
    job_id: String,
    tx: UnboundedSender<JobMessage>,
}

impl StepEmitter {
    pub(crate) fn new(job_id: impl Into<String>, tx: UnboundedSender<JobMessage>) -> Self {
        Self {
            job_id: job_id.into(),
            tx,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn emit(&self, kind: EventKind, message: impl Into<String>) {
        self.send(ReviewEvent::new(kind, message));
    }

    pub fn emit_data(&self, kind: EventKind, message: impl Into<String>, data: impl Into<String>) {
        self.send(ReviewEvent::with_data(kind, message, data));
    }

    pub fn step(&self, message: impl Into<String>) {
        self.emit(EventKind::Step, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(EventKind::Error, message);
    }

    /// True once the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Arm the end-of-stream guard for this job.
    pub fn sentinel(&self) -> SentinelGuard {
        SentinelGuard {
            tx: Some(self.tx.clone()),
        }
    }

    fn send(&self, event: ReviewEvent) {
        tracing::debug!(job_id = %self.job_id, kind = %event.kind, message = %event.message, "emit");
        if self.tx.send(JobMessage::Event(event)).is_err() {
            tracing::trace!(job_id = %self.job_id, "event dropped, stream consumer gone");
        }
    }
}

/// Sends [`JobMessage::EndOfStream`] exactly once: on [`finish`](Self::finish)
/// or, failing that, on drop (including unwinding).
#[derive(Debug)]
pub struct SentinelGuard {
    tx: Option<UnboundedSender<JobMessage>>,
}

impl SentinelGuard {
    pub fn finish(mut self) {
        self.send();
    }

    fn send(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(JobMessage::EndOfStream);
        }
    }
}

impl Drop for SentinelGuard {
    fn drop(&mut self) {
        self.send();
    }
}
