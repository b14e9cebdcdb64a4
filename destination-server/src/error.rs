//! API error type with IntoResponse
//!
//! Errors become `{"error": "..."}` bodies with a status derived from the
//! database error kind. The reason is also recorded on the request span.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use destination_db::{DbError, ErrorKind};

use crate::router::reject;

/// Handler error with automatic HTTP status mapping
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found (404)
    NotFound { resource: &'static str, id: String },

    /// Request canceled before the database answered (503)
    Canceled,

    /// Database deadline or network timeout (504)
    Timeout,

    /// Anything else (500, logged)
    Database(DbError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Canceled => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::NotFound { resource, id } if id.is_empty() => {
                reject(status, &format!("{resource} not found"))
            }
            Self::NotFound { resource, id } => {
                reject(status, &format!("{resource} '{id}' not found"))
            }
            Self::Canceled => reject(status, "request canceled"),
            Self::Timeout => {
                tracing::warn!("database call timed out");
                reject(status, "upstream timeout")
            }
            Self::Database(e) => {
                // Log the actual error, return generic message
                tracing::error!(error = %e, kind = %e.kind(), "database error");
                reject(status, "an internal error occurred")
            }
        }
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e.kind() {
            ErrorKind::NotFound => Self::NotFound {
                resource: "record",
                id: String::new(),
            },
            ErrorKind::Canceled => Self::Canceled,
            ErrorKind::DeadlineExceeded | ErrorKind::NetworkTimeout => Self::Timeout,
            ErrorKind::Other => Self::Database(e),
        }
    }
}
