//! Error types for every layer of the service.
//!
//! # Design
//! Each layer owns its enum. `StoreError` never carries a "not found" variant:
//! a missing row is a successful `None` / zero-row result. `ApiError` is the
//! only type that knows about HTTP; it renders the `{"message": ...}` envelope
//! and keeps internal detail out of 5xx bodies.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorMessage;

/// Configuration could not be read from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: impl Into<String>, value: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            key: key.into(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// The tracing subscriber could not be installed.
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("invalid log level: {0}")]
    Level(#[from] tracing_subscriber::filter::ParseError),
    #[error("logger already initialized: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Failures of the database client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to postgres: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("failed to create todo table: {0}")]
    CreateTable(#[source] sqlx::Error),
    #[error("failed to check table {table}: {source}")]
    TableCheck {
        table: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("missing required table {table} on postgres: host={host} dbname={db_name}")]
    MissingTable {
        table: String,
        host: String,
        db_name: String,
    },
    #[error("connection pool already closed")]
    AlreadyClosed,
}

/// Failures of a todo store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("insert did not produce a row")]
    NotInserted,
}

/// Lifecycle-level failures of the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("http server stopped unexpectedly: {0}")]
    Serve(#[source] std::io::Error),
    #[error("http server stopped without a shutdown request")]
    StoppedUnexpectedly,
    #[error("server already started or stopped")]
    AlreadyStarted,
}

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(&'static str),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message.to_string()),
        };
        (status, Json(ErrorMessage { message })).into_response()
    }
}
