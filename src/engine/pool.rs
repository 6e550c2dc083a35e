//! Idle registry: the bounded set of workers ready to take a job.
//!
//! A handle in the registry means its worker is idle and its intake slot is
//! empty. Workers put themselves back only after finishing a job, so the
//! registry never holds more than one handle per worker.

use crate::error::{Error, Result};
use tokio::sync::mpsc;

use super::job::Job;

/// A route to one idle worker's single-slot intake.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    worker: usize,
    intake: mpsc::Sender<Job>,
}

impl WorkerHandle {
    pub(crate) fn new(worker: usize, intake: mpsc::Sender<Job>) -> Self {
        Self { worker, intake }
    }

    pub(crate) fn worker(&self) -> usize {
        self.worker
    }

    /// Deliver a job. Hands the job back if the worker has already stopped.
    pub(crate) async fn hand_off(self, job: Job) -> std::result::Result<(), Job> {
        self.intake.send(job).await.map_err(|e| e.0)
    }
}

/// Worker side of the registry: each worker holds a clone to re-register.
#[derive(Debug, Clone)]
pub(crate) struct IdleRegistry {
    tx: mpsc::Sender<WorkerHandle>,
}

/// Dispatcher side of the registry. Owned by a single task, so idle workers
/// are taken strictly in registration order.
#[derive(Debug)]
pub(crate) struct IdleWorkers {
    rx: mpsc::Receiver<WorkerHandle>,
}

impl IdleRegistry {
    /// Capacity equals the worker count.
    pub(crate) fn new(workers: usize) -> (Self, IdleWorkers) {
        let (tx, rx) = mpsc::channel(workers);
        (Self { tx }, IdleWorkers { rx })
    }

    /// Publish a worker as idle. Never waits: a full registry means the
    /// one-registration-per-idle-worker rule was broken.
    pub(crate) fn register(&self, handle: WorkerHandle) -> Result<()> {
        let worker = handle.worker;
        self.tx.try_send(handle).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::PoolOverflow(worker),
            mpsc::error::TrySendError::Closed(_) => Error::EngineClosed,
        })
    }

    /// Number of workers currently registered as idle.
    pub(crate) fn idle(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

impl IdleWorkers {
    /// Wait for the next idle worker. `None` once every worker has exited.
    pub(crate) async fn acquire(&mut self) -> Option<WorkerHandle> {
        self.rx.recv().await
    }
}
