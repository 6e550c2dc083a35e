//! Submission queue: the bounded admission point into the engine.

use crate::error::{Error, Result};
use crate::model::QueryRequest;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use tokio::sync::mpsc;
use tracing::debug;

use super::job::{Job, JobHandle};

/// Create a submission queue with room for `capacity` unconsumed jobs.
pub(crate) fn channel(capacity: usize) -> (Submitter, mpsc::Receiver<Job>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Submitter { tx }, rx)
}

/// Producer handle. Cheap to clone; every inbound request handler holds one.
#[derive(Debug, Clone)]
pub struct Submitter {
    tx: mpsc::Sender<Job>,
}

impl Submitter {
    /// Enqueue a request, waiting for space if the queue is full.
    ///
    /// Fails with [`Error::EngineClosed`] once the dispatcher has stopped.
    pub async fn submit(&self, request: QueryRequest) -> Result<JobHandle> {
        let (job, handle) = Job::new(request);
        let id = job.id;
        if self.tx.send(job).await.is_err() {
            record_submit("closed");
            return Err(Error::EngineClosed);
        }
        record_submit("ok");
        debug!(job = %id, "job queued");
        Ok(handle)
    }

    /// Enqueue without waiting. Fails with [`Error::QueueFull`] when the
    /// queue holds `capacity` jobs, so the caller can reject instead of block.
    pub fn try_submit(&self, request: QueryRequest) -> Result<JobHandle> {
        let (job, handle) = Job::new(request);
        let id = job.id;
        match self.tx.try_send(job) {
            Ok(()) => {
                record_submit("ok");
                debug!(job = %id, "job queued");
                Ok(handle)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                record_submit("full");
                Err(Error::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                record_submit("closed");
                Err(Error::EngineClosed)
            }
        }
    }

    /// Free slots right now. Advisory only.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn record_submit(result: &'static str) {
    metrics::jobs_submitted().add(1, &[KeyValue::new("result", result)]);
}
