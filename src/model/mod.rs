//! Core data model.
//!
//! A query is one outbound HTTP request described by a caller, and the
//! record of what came back when the engine executed it.

pub mod query;

pub use query::{Method, QueryFilter, QueryId, QueryRecord, QueryRequest};
