//! The collaborator that actually performs a job.
//!
//! The engine treats an executor as an opaque, concurrency-safe function:
//! it never inspects or retries an error, only hands it to the submitter.

pub mod http;

pub use http::HttpExecutor;

use crate::error::Result;
use crate::model::{QueryRecord, QueryRequest};
use std::future::Future;

/// Performs one request. Shared by every worker at once.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, request: &QueryRequest) -> impl Future<Output = Result<QueryRecord>> + Send;
}
