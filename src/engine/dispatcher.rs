//! Dispatcher: pairs queued jobs with idle workers and owns shutdown.
//!
//! Lifecycle is `NotRunning → Running → Draining → Stopped`. Draining lets
//! every job already handed to a worker finish; jobs still in the submission
//! queue, or still waiting for a free worker, are abandoned and their
//! submitters see [`Error::Abandoned`].
//!
//! Jobs reach workers in the order they left the queue. The dispatch loop
//! only moves jobs from the submission queue into a bounded pairing channel,
//! so it always sees a stop request promptly. A single pairer task drains
//! that channel, waiting for one idle worker per job.

use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::telemetry::metrics;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::job::Job;
use super::pool::{IdleRegistry, IdleWorkers};
use super::queue::{self, Submitter};
use super::wait_for_shutdown;
use super::worker::Worker;

/// Sizing for one engine instance. Fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl DispatchConfig {
    pub fn new(workers: usize, queue_capacity: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::Config("worker count must be positive".to_string()));
        }
        if queue_capacity == 0 {
            return Err(Error::Config("queue capacity must be positive".to_string()));
        }
        Ok(Self {
            workers,
            queue_capacity,
        })
    }
}

/// Lifecycle state of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherState {
    NotRunning,
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DispatcherState::NotRunning => "not_running",
            DispatcherState::Running => "running",
            DispatcherState::Draining => "draining",
            DispatcherState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// The dispatch engine. Construct once, [`start`](Self::start) once,
/// [`stop`](Self::stop) once.
pub struct Dispatcher<E: Executor> {
    config: DispatchConfig,
    executor: Arc<E>,
    submitter: Submitter,
    queue: Option<mpsc::Receiver<Job>>,
    state: Arc<watch::Sender<DispatcherState>>,
    stop: Arc<Notify>,
    stop_requested: AtomicBool,
}

impl<E: Executor> Dispatcher<E> {
    pub fn new(config: DispatchConfig, executor: Arc<E>) -> Self {
        let (submitter, queue) = queue::channel(config.queue_capacity);
        let (state, _) = watch::channel(DispatcherState::NotRunning);
        Self {
            config,
            executor,
            submitter,
            queue: Some(queue),
            state: Arc::new(state),
            stop: Arc::new(Notify::new()),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// A producer handle for the submission queue.
    pub fn submitter(&self) -> Submitter {
        self.submitter.clone()
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<DispatcherState> {
        self.state.subscribe()
    }

    /// Spawn the workers and the dispatch loop. Must run inside a Tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        let queue = self.queue.take().ok_or(Error::AlreadyStarted)?;
        let workers = self.config.workers;

        let (registry, idle) = IdleRegistry::new(workers);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (stopped_tx, stopped) = mpsc::channel(workers);

        let handles = (0..workers)
            .map(|id| {
                Worker::new(
                    id,
                    Arc::clone(&self.executor),
                    registry.clone(),
                    shutdown_rx.clone(),
                    stopped_tx.clone(),
                )
                .spawn()
            })
            .collect();

        let (pairing, jobs) = mpsc::channel(self.config.queue_capacity);
        let pairer = Pairer {
            jobs,
            idle,
            shutdown: shutdown.subscribe(),
        };

        let dispatch = DispatchLoop {
            config: self.config,
            queue,
            pairing,
            pairer: tokio::spawn(pairer.run()),
            shutdown,
            stopped,
            workers: handles,
            stop: Arc::clone(&self.stop),
            state: Arc::clone(&self.state),
        };

        self.state.send_replace(DispatcherState::Running);
        tokio::spawn(dispatch.run());

        info!(
            workers,
            queue_capacity = self.config.queue_capacity,
            "dispatcher started"
        );
        Ok(())
    }

    /// Request a graceful shutdown and wait until every worker has stopped.
    ///
    /// Only one call is accepted; a second returns [`Error::AlreadyStopping`].
    pub async fn stop(&self) -> Result<()> {
        if self.state() == DispatcherState::NotRunning {
            return Err(Error::NotRunning);
        }
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStopping);
        }

        info!("stopping dispatcher");
        self.stop.notify_one();

        let mut state = self.state.subscribe();
        state
            .wait_for(|s| *s == DispatcherState::Stopped)
            .await
            .map(|_| ())
            .map_err(|_| Error::Other("dispatcher state channel closed".to_string()))?;

        info!("dispatcher stopped");
        Ok(())
    }
}

struct DispatchLoop {
    config: DispatchConfig,
    queue: mpsc::Receiver<Job>,
    /// Feeds the pairer; bounded by the queue capacity.
    pairing: mpsc::Sender<Job>,
    pairer: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    stopped: mpsc::Receiver<usize>,
    workers: Vec<JoinHandle<Result<()>>>,
    stop: Arc<Notify>,
    state: Arc<watch::Sender<DispatcherState>>,
}

impl DispatchLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                () = self.stop.notified() => break,
                next = next_job(&self.pairing, &mut self.queue) => match next {
                    Some((slot, job)) => slot.send(job),
                    None => break,
                },
            }
        }

        self.drain().await;
    }

    async fn drain(mut self) {
        self.state.send_replace(DispatcherState::Draining);
        info!("dispatcher draining");

        // Nothing more gets in; whatever is still queued is abandoned.
        self.queue.close();
        let mut abandoned = 0usize;
        while let Ok(job) = self.queue.try_recv() {
            abandon(job, "still queued at shutdown");
            abandoned += 1;
        }
        if abandoned > 0 {
            warn!(abandoned, "queued jobs abandoned on shutdown");
        }

        self.shutdown.send_replace(true);

        if let Err(e) = self.pairer.await {
            error!(error = %e, "pairer task failed");
        }

        let mut finished = 0;
        while finished < self.config.workers {
            match self.stopped.recv().await {
                Some(worker) => {
                    finished += 1;
                    debug!(worker, finished, "worker reported stopped");
                }
                None => {
                    error!(finished, "stop notifications closed before every worker reported");
                    break;
                }
            }
        }

        for handle in self.workers.drain(..) {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "worker exited with error"),
                Err(e) => error!(error = %e, "worker task failed"),
            }
        }

        info!(workers = finished, "all workers stopped");
        self.state.send_replace(DispatcherState::Stopped);
    }
}

/// Reserve room in the pairing channel first, so a dequeued job always has
/// somewhere to go.
async fn next_job<'a>(
    pairing: &'a mpsc::Sender<Job>,
    queue: &mut mpsc::Receiver<Job>,
) -> Option<(mpsc::Permit<'a, Job>, Job)> {
    let slot = pairing.reserve().await.ok()?;
    let job = queue.recv().await?;
    Some((slot, job))
}

/// Hands jobs to idle workers one at a time, in the order they were forwarded.
struct Pairer {
    jobs: mpsc::Receiver<Job>,
    idle: IdleWorkers,
    shutdown: watch::Receiver<bool>,
}

impl Pairer {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                () = wait_for_shutdown(&mut self.shutdown) => break,
                next = self.jobs.recv() => match next {
                    Some(job) => {
                        if !self.pair(job).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        self.jobs.close();
        let mut abandoned = 0usize;
        while let Ok(job) = self.jobs.try_recv() {
            abandon(job, "no idle worker before shutdown");
            abandoned += 1;
        }
        if abandoned > 0 {
            warn!(abandoned, "jobs awaiting a worker abandoned on shutdown");
        }
    }

    /// Wait for the next idle worker and deliver `job` to it. Returns `false`
    /// when shutdown arrived first.
    async fn pair(&mut self, job: Job) -> bool {
        tokio::select! {
            biased;
            () = wait_for_shutdown(&mut self.shutdown) => {
                abandon(job, "no idle worker before shutdown");
                false
            }
            handle = self.idle.acquire() => match handle {
                Some(handle) => {
                    let worker = handle.worker();
                    match handle.hand_off(job).await {
                        Ok(()) => debug!(worker, "job handed off"),
                        Err(job) => abandon(job, "worker stopped before hand-off"),
                    }
                    true
                }
                None => {
                    abandon(job, "idle registry closed");
                    false
                }
            },
        }
    }
}

fn abandon(job: Job, reason: &'static str) {
    debug!(job = %job.id, reason, "job abandoned");
    metrics::jobs_abandoned().add(1, &[]);
    drop(job);
}
