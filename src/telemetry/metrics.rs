//! Metric instrument factories for queryd.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"queryd"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for queryd instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("queryd")
}

/// Counter: submission attempts.
/// Labels: `result` ("ok" | "full" | "closed").
pub fn jobs_submitted() -> Counter<u64> {
    meter()
        .u64_counter("queryd.jobs.submitted")
        .with_description("Number of jobs offered to the submission queue")
        .build()
}

/// Counter: jobs whose completion fired.
/// Labels: `outcome` ("success" | "failure").
pub fn jobs_completed() -> Counter<u64> {
    meter()
        .u64_counter("queryd.jobs.completed")
        .with_description("Number of jobs executed by a worker")
        .build()
}

/// Counter: jobs dropped during shutdown drain.
pub fn jobs_abandoned() -> Counter<u64> {
    meter()
        .u64_counter("queryd.jobs.abandoned")
        .with_description("Number of jobs abandoned at shutdown")
        .build()
}

/// Histogram: executor run time in milliseconds.
/// Labels: `outcome`.
pub fn job_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("queryd.job.duration_ms")
        .with_description("Job execution duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: query store operations (insert, get, list, delete).
/// Labels: `operation`.
pub fn store_operations() -> Counter<u64> {
    meter()
        .u64_counter("queryd.queries.store_operations")
        .with_description("Number of query store operations")
        .build()
}
