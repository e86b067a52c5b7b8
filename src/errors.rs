use crate::services::object_store::ObjectStoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<ObjectStoreError> for AppError {
    fn from(err: ObjectStoreError) -> Self {
        let status = match &err {
            ObjectStoreError::InvalidName { .. } => StatusCode::BAD_REQUEST,
            ObjectStoreError::NotFound(_) => StatusCode::NOT_FOUND,
            ObjectStoreError::Conflict(_) => StatusCode::CONFLICT,
            ObjectStoreError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ObjectStoreError::DanglingRecord { .. }
            | ObjectStoreError::Index(_)
            | ObjectStoreError::Io(_)
            | ObjectStoreError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            // Details stay in the log; clients get a generic message.
            tracing::error!("request failed: {}", err);
            AppError::internal("Internal Server Error")
        } else {
            tracing::debug!("request rejected: {}", err);
            AppError::new(status, err.to_string())
        }
    }
}
