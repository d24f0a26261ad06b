//! Client error types.

use crate::settings::ConfigError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] evstore_protocol::ProtocolError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connect timeout to {0}")]
    ConnectTimeout(String),

    #[error(
        "wrong expected version on '{stream}': expected {expected}, current {}",
        version_or_unknown(.current)
    )]
    WrongExpectedVersion {
        stream: String,
        expected: i64,
        current: Option<i64>,
    },

    #[error("stream '{stream}' has been deleted")]
    StreamDeleted { stream: String },

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("invalid transaction")]
    InvalidTransaction,

    #[error("retry limit reached after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("operation timed out")]
    OperationTimedOut,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("endpoint discovery failed: {0}")]
    Discovery(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::ConnectionClosed
                | ClientError::ConnectTimeout(_)
                | ClientError::OperationTimedOut
                | ClientError::RetriesExhausted { .. }
        )
    }
}

fn version_or_unknown(version: &Option<i64>) -> String {
    match version {
        Some(version) => version.to_string(),
        None => "unknown".to_string(),
    }
}
