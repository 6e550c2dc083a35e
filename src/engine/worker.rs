//! Worker: registers as idle, takes one job, runs it, repeats.

use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::telemetry::job::{record_state_transition, start_job_span};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

use super::job::Job;
use super::pool::{IdleRegistry, WorkerHandle};
use super::wait_for_shutdown;

/// Lifecycle state of a worker. `Busy` never goes straight to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy,
    Stopped,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerState::Idle => "idle",
            WorkerState::Busy => "busy",
            WorkerState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

pub(crate) struct Worker<E> {
    id: usize,
    executor: Arc<E>,
    registry: IdleRegistry,
    shutdown: watch::Receiver<bool>,
    stopped: mpsc::Sender<usize>,
}

impl<E: Executor> Worker<E> {
    pub(crate) fn new(
        id: usize,
        executor: Arc<E>,
        registry: IdleRegistry,
        shutdown: watch::Receiver<bool>,
        stopped: mpsc::Sender<usize>,
    ) -> Self {
        Self {
            id,
            executor,
            registry,
            shutdown,
            stopped,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let (intake_tx, mut intake) = mpsc::channel(1);
        let result = self.serve(intake_tx, &mut intake).await;

        if let Err(ref e) = result {
            error!(worker = self.id, error = %e, "worker terminated on invariant violation");
        }
        debug!(worker = self.id, state = %WorkerState::Stopped, "worker stopped");

        // The dispatcher counts these; one per worker, whatever the exit path.
        if self.stopped.send(self.id).await.is_err() {
            warn!(worker = self.id, "dispatcher gone before stop was reported");
        }
        result
    }

    async fn serve(
        &mut self,
        intake_tx: mpsc::Sender<Job>,
        intake: &mut mpsc::Receiver<Job>,
    ) -> Result<()> {
        loop {
            self.registry
                .register(WorkerHandle::new(self.id, intake_tx.clone()))?;

            tokio::select! {
                biased;
                Some(job) = intake.recv() => self.execute(job).await,
                () = wait_for_shutdown(&mut self.shutdown) => {
                    // A job handed off at the same instant as the broadcast is
                    // already ours; finish it rather than drop it.
                    intake.close();
                    if let Ok(job) = intake.try_recv() {
                        self.execute(job).await;
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn execute(&self, job: Job) {
        let (job_id, request, completion) = job.into_parts();
        let span = start_job_span(&job_id, request.method.as_str(), &request.url, self.id);
        let job_span = span.clone();
        let executor = Arc::clone(&self.executor);

        async move {
            record_state_transition(&job_span, WorkerState::Idle, WorkerState::Busy);
            let start = Instant::now();

            // Run on its own task so a panicking executor still yields an outcome.
            let run = async move { executor.execute(&request).await };
            let outcome = match tokio::spawn(run.in_current_span()).await {
                Ok(outcome) => outcome,
                Err(e) => Err(Error::Other(format!("executor task failed: {e}"))),
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            let label = match &outcome {
                Ok(record) => {
                    info!(
                        query_id = %record.id,
                        status_code = record.status_code,
                        duration_ms,
                        "job completed"
                    );
                    "success"
                }
                Err(e) if e.is_execution() => {
                    warn!(error = %e, duration_ms, "job failed");
                    "failure"
                }
                Err(e) => {
                    error!(error = %e, duration_ms, "executor crashed");
                    "failure"
                }
            };
            metrics::jobs_completed().add(1, &[KeyValue::new("outcome", label)]);
            metrics::job_duration_ms()
                .record(duration_ms as f64, &[KeyValue::new("outcome", label)]);

            if !completion.complete(outcome) {
                debug!("submitter stopped waiting before completion");
            }
            record_state_transition(&job_span, WorkerState::Busy, WorkerState::Idle);
        }
        .instrument(span)
        .await
    }
}
