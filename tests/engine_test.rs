//! Integration tests for the dispatch engine.
//!
//! All executors here are in-process fakes; nothing touches the network.

use queryd::engine::{DispatchConfig, Dispatcher, DispatcherState, JobHandle};
use queryd::error::{Error, Result};
use queryd::executor::Executor;
use queryd::model::{Method, QueryId, QueryRecord, QueryRequest};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn request(tag: &str) -> QueryRequest {
    QueryRequest::new(Method::Get, format!("http://test.invalid/{tag}"))
}

fn record_for(request: &QueryRequest) -> QueryRecord {
    QueryRecord {
        id: QueryId::new(),
        status: "200 OK".to_string(),
        status_code: 200,
        headers: Default::default(),
        length: request.url.len() as u64,
        created_at: chrono::Utc::now(),
    }
}

fn dispatcher<E: Executor>(workers: usize, capacity: usize, executor: Arc<E>) -> Dispatcher<E> {
    Dispatcher::new(DispatchConfig::new(workers, capacity).unwrap(), executor)
}

async fn wait(handle: JobHandle) -> Result<QueryRecord> {
    timeout(WAIT, handle.wait()).await.expect("job never completed")
}

// ---------------------------------------------------------------------------
// Fake executors
// ---------------------------------------------------------------------------

/// Sleeps, tracks concurrency, optionally fails.
#[derive(Default)]
struct CountingExecutor {
    delay: Duration,
    fail: bool,
    running: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl CountingExecutor {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

impl Executor for CountingExecutor {
    async fn execute(&self, request: &QueryRequest) -> Result<QueryRecord> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail {
            Err(Error::RequestBuild("always fails".to_string()))
        } else {
            Ok(record_for(request))
        }
    }
}

/// Blocks each execution until the test releases a permit. Reports starts
/// and finishes by URL.
struct GatedExecutor {
    gate: Semaphore,
    started: mpsc::UnboundedSender<String>,
    finished: Mutex<Vec<String>>,
}

impl GatedExecutor {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (started, rx) = mpsc::unbounded_channel();
        let executor = Arc::new(Self {
            gate: Semaphore::new(0),
            started,
            finished: Mutex::new(Vec::new()),
        });
        (executor, rx)
    }

    fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }
}

impl Executor for GatedExecutor {
    async fn execute(&self, request: &QueryRequest) -> Result<QueryRecord> {
        let _ = self.started.send(request.url.clone());
        self.gate
            .acquire()
            .await
            .map_err(|e| Error::Other(e.to_string()))?
            .forget();
        self.finished.lock().unwrap().push(request.url.clone());
        Ok(record_for(request))
    }
}

/// Panics on URLs ending in "/boom".
struct PanickyExecutor;

impl Executor for PanickyExecutor {
    async fn execute(&self, request: &QueryRequest) -> Result<QueryRecord> {
        if request.url.ends_with("/boom") {
            panic!("executor blew up");
        }
        Ok(record_for(request))
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_job_completes_exactly_once() {
    let executor = Arc::new(CountingExecutor::new(Duration::from_millis(2)));
    let mut dispatcher = dispatcher(4, 8, Arc::clone(&executor));
    dispatcher.start().unwrap();

    let mut callers = Vec::new();
    for i in 0..50 {
        let submitter = dispatcher.submitter();
        callers.push(tokio::spawn(async move {
            let handle = submitter.submit(request(&i.to_string())).await?;
            wait(handle).await
        }));
    }

    for caller in callers {
        let record = caller.await.unwrap().unwrap();
        assert_eq!(record.status_code, 200);
    }
    assert_eq!(executor.calls.load(Ordering::SeqCst), 50);

    dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn failing_executor_still_completes_every_job() {
    let executor = Arc::new(CountingExecutor::failing());
    let mut dispatcher = dispatcher(2, 4, Arc::clone(&executor));
    dispatcher.start().unwrap();

    let mut handles = Vec::new();
    for i in 0..10 {
        handles.push(dispatcher.submitter().submit(request(&i.to_string())).await.unwrap());
    }

    for handle in handles {
        let err = wait(handle).await.unwrap_err();
        assert!(matches!(err, Error::RequestBuild(_)), "got {err:?}");
    }
    assert_eq!(executor.calls.load(Ordering::SeqCst), 10);

    dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn panicking_executor_fails_the_job_and_keeps_the_worker() {
    let mut dispatcher = dispatcher(1, 2, Arc::new(PanickyExecutor));
    dispatcher.start().unwrap();
    let submitter = dispatcher.submitter();

    let err = wait(submitter.submit(request("boom")).await.unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Other(_)), "got {err:?}");

    // The lone worker must still be serving.
    let ok = wait(submitter.submit(request("fine")).await.unwrap()).await;
    assert!(ok.is_ok());

    dispatcher.stop().await.unwrap();
}

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrency_never_exceeds_worker_count() {
    let executor = Arc::new(CountingExecutor::new(Duration::from_millis(10)));
    let mut dispatcher = dispatcher(3, 16, Arc::clone(&executor));
    dispatcher.start().unwrap();

    let mut handles = Vec::new();
    for i in 0..30 {
        handles.push(dispatcher.submitter().submit(request(&i.to_string())).await.unwrap());
    }
    for handle in handles {
        wait(handle).await.unwrap();
    }

    let peak = executor.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak} exceeded 3 workers");
    assert!(peak >= 1);

    dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn submit_blocks_once_queue_holds_capacity_jobs() {
    let executor = Arc::new(CountingExecutor::new(Duration::ZERO));
    // Not started yet, so nothing is consumed.
    let mut dispatcher = dispatcher(1, 2, Arc::clone(&executor));
    let submitter = dispatcher.submitter();

    let first = submitter.submit(request("1")).await.unwrap();
    let second = submitter.submit(request("2")).await.unwrap();
    assert_eq!(submitter.available(), 0);

    let blocked = timeout(Duration::from_millis(50), submitter.submit(request("3"))).await;
    assert!(blocked.is_err(), "third submit should wait for space");
    assert!(matches!(
        submitter.try_submit(request("3")),
        Err(Error::QueueFull)
    ));

    dispatcher.start().unwrap();

    let third = timeout(WAIT, submitter.submit(request("3")))
        .await
        .expect("submit should unblock once the dispatcher consumes")
        .unwrap();

    for handle in [first, second, third] {
        wait(handle).await.unwrap();
    }
    dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn first_job_finishes_before_the_ones_queued_behind_it() {
    let (executor, mut started) = GatedExecutor::new();
    let mut dispatcher = dispatcher(1, 2, Arc::clone(&executor));
    dispatcher.start().unwrap();
    let submitter = dispatcher.submitter();

    let j1 = submitter.submit(request("j1")).await.unwrap();
    assert_eq!(started.recv().await.unwrap(), "http://test.invalid/j1");

    let (s2, s3) = (submitter.clone(), submitter.clone());
    let (j2, j3) = tokio::join!(
        async move { s2.submit(request("j2")).await.unwrap() },
        async move { s3.submit(request("j3")).await.unwrap() },
    );

    executor.release(3);
    for handle in [j1, j2, j3] {
        wait(handle).await.unwrap();
    }

    let finished = executor.finished();
    assert_eq!(finished.len(), 3);
    assert_eq!(finished[0], "http://test.invalid/j1");
    assert!(finished[1..].contains(&"http://test.invalid/j2".to_string()));
    assert!(finished[1..].contains(&"http://test.invalid/j3".to_string()));

    dispatcher.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn jobs_reach_a_single_worker_in_queue_order() {
    for round in 0..100 {
        let (executor, _started) = GatedExecutor::new();
        let mut dispatcher = dispatcher(1, 2, Arc::clone(&executor));
        let submitter = dispatcher.submitter();

        let j1 = submitter.submit(request("j1")).await.unwrap();
        let j2 = submitter.submit(request("j2")).await.unwrap();
        dispatcher.start().unwrap();
        let j3 = timeout(WAIT, submitter.submit(request("j3")))
            .await
            .unwrap()
            .unwrap();

        executor.release(3);
        for handle in [j1, j2, j3] {
            wait(handle).await.unwrap();
        }

        assert_eq!(
            executor.finished(),
            vec![
                "http://test.invalid/j1",
                "http://test.invalid/j2",
                "http://test.invalid/j3"
            ],
            "round {round}"
        );
        dispatcher.stop().await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_bound_holds_across_threads() {
    let executor = Arc::new(CountingExecutor::new(Duration::from_millis(5)));
    let mut dispatcher = dispatcher(3, 4, Arc::clone(&executor));
    dispatcher.start().unwrap();

    let mut callers = Vec::new();
    for i in 0..40 {
        let submitter = dispatcher.submitter();
        callers.push(tokio::spawn(async move {
            let handle = submitter.submit(request(&i.to_string())).await?;
            wait(handle).await
        }));
    }
    for caller in callers {
        caller.await.unwrap().unwrap();
    }

    let peak = executor.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak} exceeded 3 workers");
    assert_eq!(executor.calls.load(Ordering::SeqCst), 40);

    dispatcher.stop().await.unwrap();
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_drains_in_flight_job_and_abandons_queued_ones() {
    let (executor, mut started) = GatedExecutor::new();
    let mut dispatcher = dispatcher(1, 2, Arc::clone(&executor));
    dispatcher.start().unwrap();
    let dispatcher = Arc::new(dispatcher);
    let submitter = dispatcher.submitter();

    let in_flight = submitter.submit(request("busy")).await.unwrap();
    assert_eq!(started.recv().await.unwrap(), "http://test.invalid/busy");
    let queued_a = submitter.submit(request("a")).await.unwrap();
    let queued_b = submitter.submit(request("b")).await.unwrap();

    let stopper = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.stop().await })
    };

    let mut state = dispatcher.subscribe_state();
    timeout(WAIT, state.wait_for(|s| *s == DispatcherState::Draining))
        .await
        .unwrap()
        .unwrap();

    // Still draining: the only worker is mid-job.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!stopper.is_finished());

    executor.release(1);
    let record = wait(in_flight).await.unwrap();
    assert_eq!(record.status_code, 200);

    timeout(WAIT, stopper).await.unwrap().unwrap().unwrap();
    assert_eq!(dispatcher.state(), DispatcherState::Stopped);

    assert!(matches!(wait(queued_a).await, Err(Error::Abandoned)));
    assert!(matches!(wait(queued_b).await, Err(Error::Abandoned)));
    assert_eq!(executor.finished(), vec!["http://test.invalid/busy".to_string()]);
}

#[tokio::test]
async fn stop_with_no_jobs_terminates_cleanly() {
    let executor = Arc::new(CountingExecutor::new(Duration::ZERO));
    let mut dispatcher = dispatcher(4, 4, Arc::clone(&executor));
    assert_eq!(dispatcher.state(), DispatcherState::NotRunning);

    dispatcher.start().unwrap();
    assert_eq!(dispatcher.state(), DispatcherState::Running);

    timeout(WAIT, dispatcher.stop()).await.unwrap().unwrap();
    assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn submit_after_stop_is_rejected() {
    let mut dispatcher = dispatcher(1, 1, Arc::new(CountingExecutor::new(Duration::ZERO)));
    dispatcher.start().unwrap();
    let submitter = dispatcher.submitter();
    dispatcher.stop().await.unwrap();

    assert!(submitter.is_closed());
    assert!(matches!(
        submitter.submit(request("late")).await,
        Err(Error::EngineClosed)
    ));
    assert!(matches!(
        submitter.try_submit(request("late")),
        Err(Error::EngineClosed)
    ));
}

// ---------------------------------------------------------------------------
// Lifecycle misuse
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_before_start_is_an_error() {
    let dispatcher = dispatcher(1, 1, Arc::new(CountingExecutor::new(Duration::ZERO)));
    assert!(matches!(dispatcher.stop().await, Err(Error::NotRunning)));
}

#[tokio::test]
async fn second_stop_is_rejected() {
    let mut dispatcher = dispatcher(2, 2, Arc::new(CountingExecutor::new(Duration::ZERO)));
    dispatcher.start().unwrap();
    dispatcher.stop().await.unwrap();
    assert!(matches!(dispatcher.stop().await, Err(Error::AlreadyStopping)));
}

#[tokio::test]
async fn second_start_is_rejected() {
    let mut dispatcher = dispatcher(1, 1, Arc::new(CountingExecutor::new(Duration::ZERO)));
    dispatcher.start().unwrap();
    assert!(matches!(dispatcher.start(), Err(Error::AlreadyStarted)));
    dispatcher.stop().await.unwrap();
}

#[test]
fn zero_sizes_are_rejected() {
    assert!(matches!(DispatchConfig::new(0, 1), Err(Error::Config(_))));
    assert!(matches!(DispatchConfig::new(1, 0), Err(Error::Config(_))));
    assert!(DispatchConfig::new(1, 1).is_ok());
}
