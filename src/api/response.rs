//! Response envelope shared by every endpoint.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub const BINDING_JSON: &str = "binding JSON error";
pub const REQUEST_CREATION: &str = "something went wrong during creation request";
pub const SEND_REQUEST: &str = "something went wrong during sending request";
pub const STORING_RESULT: &str = "something went wrong during storing request's result";
pub const QUERY_NOT_FOUND: &str = "requested query not found";
pub const SHUTTING_DOWN: &str = "server is shutting down";
pub const INTERNAL: &str = "internal error";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl FieldError {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<T>,
    pub ts: String,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(payload: T) -> Self {
        Self {
            success: true,
            errors: Vec::new(),
            payload: Some(payload),
            ts: timestamp(),
        }
    }
}

impl Envelope<()> {
    pub fn failure(errors: Vec<FieldError>) -> Self {
        Self {
            success: false,
            errors,
            payload: None,
            ts: timestamp(),
        }
    }
}

fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// A failed request: status plus the envelope's error list.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub errors: Vec<FieldError>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: &str) -> Self {
        Self {
            status,
            errors: vec![FieldError::message(message)],
        }
    }

    pub fn invalid(errors: Vec<FieldError>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            errors,
        }
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, QUERY_NOT_FOUND)
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(Envelope::failure(self.errors))).into_response()
    }
}
