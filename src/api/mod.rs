//! Inbound HTTP surface.
//!
//! Accepts query descriptions, feeds them to the dispatch engine, and serves
//! the stored results.

pub mod filter;
pub mod handlers;
pub mod response;

use crate::db::Db;
use crate::engine::{DispatcherState, Submitter};
use axum::Router;
use axum::routing::get;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

/// Shared handler state.
pub struct AppState {
    pub submitter: Submitter,
    pub db: Arc<Db>,
    /// Reported as `base` in paginated listings.
    pub base_url: String,
    pub dispatcher: watch::Receiver<DispatcherState>,
}

/// Build the application router. `http_log` adds per-request tracing.
pub fn build_router(state: Arc<AppState>, http_log: bool) -> Router {
    let api = Router::new()
        .route(
            "/queries",
            get(handlers::list_queries).post(handlers::create_query),
        )
        .route(
            "/queries/{id}",
            get(handlers::get_query).delete(handlers::delete_query),
        );

    let app = Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .with_state(state);

    if http_log {
        app.layer(TraceLayer::new_for_http())
    } else {
        app
    }
}
