//! Query endpoints and health.

use crate::engine::DispatcherState;
use crate::error::Error;
use crate::model::query::HeaderMap;
use crate::model::{Method, QueryId, QueryRecord, QueryRequest};
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

use super::AppState;
use super::filter::{ListFilter, ListParams, Paginated};
use super::response::{self, ApiError, Envelope, FieldError};

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

/// Body of `POST /api/queries`. Validated into a [`QueryRequest`].
#[derive(Debug, Default, Deserialize)]
pub struct CreateQuery {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub body: Option<serde_json::Map<String, serde_json::Value>>,
}

impl CreateQuery {
    pub fn validate(self) -> Result<QueryRequest, Vec<FieldError>> {
        let mut errors = Vec::new();

        if !is_http_url(&self.url) {
            errors.push(FieldError::field("url", "invalid value"));
        }
        let method = self.method.parse::<Method>().unwrap_or_else(|_| {
            errors.push(FieldError::field("method", "invalid value"));
            Method::Get
        });

        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(QueryRequest {
            method,
            url: self.url.trim().to_string(),
            headers: self.headers,
            body: self.body,
        })
    }
}

fn is_http_url(raw: &str) -> bool {
    url::Url::parse(raw.trim())
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
        .unwrap_or(false)
}

/// Submit a query and wait for its result.
pub async fn create_query(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateQuery>, JsonRejection>,
) -> ApiResult<QueryRecord> {
    let Json(body) = body.map_err(|e| {
        warn!(error = %e, "rejected query body");
        ApiError::new(StatusCode::BAD_REQUEST, response::BINDING_JSON)
    })?;
    let request = body.validate().map_err(ApiError::invalid)?;

    let handle = state
        .submitter
        .submit(request)
        .await
        .map_err(|e| outcome_error(&e))?;

    match handle.wait().await {
        Ok(record) => Ok(Json(Envelope::success(record))),
        Err(e) => Err(outcome_error(&e)),
    }
}

/// Translate a job failure into what the submitter sees.
pub fn outcome_error(error: &Error) -> ApiError {
    match error {
        Error::RequestBuild(_) => {
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, response::REQUEST_CREATION)
        }
        Error::Send(_) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, response::SEND_REQUEST),
        Error::Database(_) => {
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, response::STORING_RESULT)
        }
        Error::Abandoned | Error::EngineClosed | Error::QueueFull => {
            ApiError::new(StatusCode::SERVICE_UNAVAILABLE, response::SHUTTING_DOWN)
        }
        other => {
            error!(error = %other, "unexpected job failure");
            ApiError::internal()
        }
    }
}

/// Page through stored results.
pub async fn list_queries(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Paginated> {
    let filter = ListFilter::parse(&params).map_err(ApiError::invalid)?;

    let rows = state.db.list_queries(&filter.query).await.map_err(|e| {
        error!(error = %e, "listing queries failed");
        ApiError::internal()
    })?;

    Ok(Json(Envelope::success(filter.into_page(rows, &state.base_url))))
}

pub async fn get_query(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<QueryRecord> {
    let id: QueryId = id.parse().map_err(|_| ApiError::not_found())?;

    match state.db.get_query(id).await {
        Ok(record) => Ok(Json(Envelope::success(record))),
        Err(Error::NotFound(_)) => Err(ApiError::not_found()),
        Err(e) => {
            error!(error = %e, %id, "fetching query failed");
            Err(ApiError::internal())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub id: QueryId,
}

pub async fn delete_query(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Deleted> {
    let id: QueryId = id.parse().map_err(|_| ApiError::not_found())?;

    match state.db.delete_query(id).await {
        Ok(()) => Ok(Json(Envelope::success(Deleted { id }))),
        Err(Error::NotFound(_)) => Err(ApiError::not_found()),
        Err(e) => {
            error!(error = %e, %id, "deleting query failed");
            Err(ApiError::internal())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub dispatcher: DispatcherState,
    pub queue_available: usize,
    pub queue_capacity: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let dispatcher = *state.dispatcher.borrow();
    Json(HealthResponse {
        status: if dispatcher == DispatcherState::Running {
            "ok"
        } else {
            "unavailable"
        },
        version: env!("CARGO_PKG_VERSION"),
        dispatcher,
        queue_available: state.submitter.available(),
        queue_capacity: state.submitter.capacity(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(method: &str, url: &str) -> CreateQuery {
        CreateQuery {
            method: method.to_string(),
            url: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn blank_method_defaults_to_get() {
        let req = create("  ", "https://example.com/x").validate().unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.url, "https://example.com/x");
    }

    #[test]
    fn method_and_url_errors_are_both_reported() {
        let errors = create("connect", "ftp://example.com").validate().unwrap_err();
        let fields: Vec<_> = errors.iter().filter_map(|e| e.field.as_deref()).collect();
        assert_eq!(fields, vec!["url", "method"]);
    }

    #[test]
    fn execution_errors_map_to_distinct_messages() {
        let build = outcome_error(&Error::RequestBuild("x".into()));
        assert_eq!(build.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(build.errors[0].message, response::REQUEST_CREATION);

        let abandoned = outcome_error(&Error::Abandoned);
        assert_eq!(abandoned.status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
