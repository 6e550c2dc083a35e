//! Jobs and their single-fire completion signal.

use crate::error::{Error, Result};
use crate::model::{QueryRecord, QueryRequest};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Newtype for in-engine job ids. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// What a caller eventually receives for a job.
pub type JobOutcome = Result<QueryRecord>;

/// One unit of submitted work. Owned by the engine from enqueue until its
/// completion fires.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub request: QueryRequest,
    pub(crate) completion: Completion,
}

impl Job {
    /// Create a job together with the handle its submitter waits on.
    pub fn new(request: QueryRequest) -> (Self, JobHandle) {
        let id = JobId::new();
        let (tx, rx) = oneshot::channel();
        (
            Self {
                id,
                request,
                completion: Completion(tx),
            },
            JobHandle { id, receiver: rx },
        )
    }

    /// Split into the request and the completion, for the worker.
    pub(crate) fn into_parts(self) -> (JobId, QueryRequest, Completion) {
        (self.id, self.request, self.completion)
    }
}

/// Engine side of the completion signal. Consumed on use, so it can fire at
/// most once; dropping it without firing releases the caller with
/// [`Error::Abandoned`].
#[derive(Debug)]
pub(crate) struct Completion(oneshot::Sender<JobOutcome>);

impl Completion {
    /// Fire the signal. Returns false if the caller stopped waiting.
    pub(crate) fn complete(self, outcome: JobOutcome) -> bool {
        self.0.send(outcome).is_ok()
    }
}

/// Caller side of a submitted job.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    receiver: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Wait for the job to finish.
    ///
    /// Resolves to the executor's outcome, or [`Error::Abandoned`] when the
    /// job was still queued (never dispatched) at shutdown. The engine itself
    /// imposes no timeout; wrap in `tokio::time::timeout` to bound the wait.
    pub async fn wait(self) -> JobOutcome {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Abandoned),
        }
    }
}
