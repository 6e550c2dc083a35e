//! Dispatch engine: bounded submission queue, idle registry, fixed worker
//! pool, and the dispatcher that pairs them and owns shutdown.
//!
//! ```text
//! caller ─submit─▶ queue ─▶ dispatcher ─▶ idle registry ─▶ worker ─▶ executor
//!   ▲                                                          │
//!   └──────────────────────── completion ◀─────────────────────┘
//! ```

pub mod dispatcher;
pub mod job;
mod pool;
pub mod queue;
pub mod worker;

pub use dispatcher::{DispatchConfig, Dispatcher, DispatcherState};
pub use job::{Job, JobHandle, JobId, JobOutcome};
pub use queue::Submitter;
pub use worker::WorkerState;

use tokio::sync::watch;

/// Resolve once the shutdown broadcast has been sent (or its sender dropped).
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
