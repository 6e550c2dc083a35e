//! Job execution span helpers.

use crate::engine::JobId;
use std::fmt::Display;
use tracing::Span;

/// Start a span for one job's execution on a worker.
///
/// The `job.state` field is declared empty and can be updated via
/// [`record_state_transition`].
pub fn start_job_span(job_id: &JobId, method: &str, url: &str, worker: usize) -> Span {
    tracing::info_span!(
        "job.execute",
        "job.id" = %job_id,
        "job.worker" = worker,
        "http.request.method" = method,
        "url.full" = url,
        "job.state" = tracing::field::Empty,
    )
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, from: impl Display, to: impl Display) {
    span.record("job.state", tracing::field::display(&to));
    span.in_scope(|| {
        tracing::info!(from = %from, to = %to, "state_transition");
    });
}
