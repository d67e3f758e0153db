//! Consumer side of a job's channel.
//!
//! [`JobStream`] waits for each record with a bounded timeout and stops on the
//! sentinel, on the timeout, or when the channel closes. It releases the job's
//! registry entry as soon as it stops (or when dropped, which covers a client
//! disconnecting mid-stream).

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use futures::stream;
use tokio::sync::mpsc::UnboundedReceiver;

use super::events::{EventKind, JobMessage, ReviewEvent};
use super::jobs::JobLease;
use crate::util::format_wait;

pub const COMPLETE_MESSAGE: &str = "Review complete";
pub const WORKER_GONE_MESSAGE: &str = "Review worker stopped unexpectedly";

#[derive(Debug)]
pub struct JobStream {
    receiver: UnboundedReceiver<JobMessage>,
    wait_timeout: Duration,
    lease: Option<JobLease>,
    saw_done: bool,
}

impl JobStream {
    pub(crate) fn new(receiver: UnboundedReceiver<JobMessage>, wait_timeout: Duration, lease: JobLease) -> Self {
        Self {
            receiver,
            wait_timeout,
            lease: Some(lease),
            saw_done: false,
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        self.lease.as_ref().map(JobLease::job_id)
    }

    pub fn is_finished(&self) -> bool {
        self.lease.is_none()
    }

    /// Next record for the client, or `None` once the stream has stopped.
    ///
    /// The final record is always a `done` or an `error`: a worker `done` is
    /// forwarded as-is, otherwise the sentinel produces a synthetic one.
    pub async fn next_record(&mut self) -> Option<ReviewEvent> {
        if self.is_finished() {
            return None;
        }

        match tokio::time::timeout(self.wait_timeout, self.receiver.recv()).await {
            Ok(Some(JobMessage::Event(event))) => {
                if event.kind == EventKind::Done {
                    self.saw_done = true;
                }
                Some(event)
            }
            Ok(Some(JobMessage::EndOfStream)) => {
                let saw_done = self.saw_done;
                self.finish("end of stream");
                (!saw_done).then(|| ReviewEvent::new(EventKind::Done, COMPLETE_MESSAGE))
            }
            Ok(None) => {
                let saw_done = self.saw_done;
                self.finish("channel closed without sentinel");
                (!saw_done).then(|| ReviewEvent::new(EventKind::Error, WORKER_GONE_MESSAGE))
            }
            Err(_) => {
                self.finish("wait timed out");
                Some(ReviewEvent::new(
                    EventKind::Error,
                    format!(
                        "Timed out after {} waiting for the next event",
                        format_wait(self.wait_timeout)
                    ),
                ))
            }
        }
    }

    fn finish(&mut self, reason: &str) {
        // Closing the receiver lets a still-running worker notice nobody is listening.
        self.receiver.close();
        if let Some(lease) = self.lease.take() {
            tracing::info!(job_id = %lease.job_id(), reason, "stream finished");
        }
    }

    /// Drive the stream to completion as a `futures` stream of records.
    pub fn into_stream(self) -> impl Stream<Item = ReviewEvent> + Send {
        stream::unfold(self, |mut job| async move {
            job.next_record().await.map(|record| (record, job))
        })
    }

    /// Server-sent events: one SSE event per record, named after its kind,
    /// with the record's JSON as data.
    pub fn into_sse(self) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send> {
        let events = futures::StreamExt::map(self.into_stream(), |record| Ok(to_sse_event(&record)));
        Sse::new(events).keep_alive(KeepAlive::default())
    }
}

pub fn to_sse_event(record: &ReviewEvent) -> Event {
    Event::default()
        .event(record.kind.as_str())
        .data(record.to_json())
}
