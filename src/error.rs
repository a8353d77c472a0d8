//! Error types for meterwrite

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::fmt;

/// Result type alias for meterwrite operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for meterwrite
#[derive(Debug)]
pub enum Error {
    /// Malformed compressed or serialized request body
    Decode(String),
    /// Invalid request parameters or a missing tenant label
    Validation(String),
    /// No tenant could be resolved for the request
    Auth(String),
    /// Wrong HTTP verb for the endpoint
    MethodNotAllowed,
    /// Database driver errors
    Database(sqlx::Error),
    /// Storage backend errors not raised by the driver
    Storage(String),
    /// Serialization errors
    Serialization(String),
    /// Configuration errors
    Config(String),
    /// IO errors
    Io(std::io::Error),
    /// Internal error
    Internal(String),
}

impl Error {
    /// HTTP status the error maps to when it reaches a handler boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Decode(_) | Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Error::Database(_)
            | Error::Storage(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable kind, used as a telemetry attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Decode(_) => "decode",
            Error::Validation(_) => "validation",
            Error::Auth(_) => "auth",
            Error::MethodNotAllowed => "method",
            Error::Database(_) | Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Internal(_) => "internal",
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Decode(msg) => write!(f, "Decode error: {}", msg),
            Error::Validation(msg) => write!(f, "Validation error: {}", msg),
            Error::Auth(msg) => write!(f, "Failed to determine organization ID: {}", msg),
            Error::MethodNotAllowed => write!(f, "Method not allowed"),
            Error::Database(e) => write!(f, "Database error: {}", e),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Database(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<arrow::error::ArrowError> for Error {
    fn from(e: arrow::error::ArrowError) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// [`Error::kind`] of a failed request, carried in the response extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorKind(pub &'static str);

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Storage details stay in the logs.
        let message = match &self {
            Error::Database(_) | Error::Storage(_) => "Storage error".to_string(),
            other => other.to_string(),
        };
        let mut response = (status, Json(serde_json::json!({ "error": message }))).into_response();
        response.extensions_mut().insert(ErrorKind(self.kind()));
        response
    }
}
