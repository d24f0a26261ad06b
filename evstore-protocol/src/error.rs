//! Protocol error types and server result codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur while framing or parsing packages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: u32 },

    #[error("unknown command tag: {0:#04x}")]
    UnknownCommand(u8),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("invalid UTF-8 in credentials")]
    InvalidUtf8,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether the connection that produced this error must be closed.
    ///
    /// An unknown command only poisons its own frame, which the decoder has
    /// already consumed, so the stream stays in sync.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(self, ProtocolError::UnknownCommand(_))
    }
}

/// Result code carried by write-class completion messages.
///
/// These codes are part of the protocol contract and must remain stable
/// across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationResult {
    Success,
    PrepareTimeout,
    CommitTimeout,
    ForwardTimeout,
    WrongExpectedVersion,
    StreamDeleted,
    InvalidTransaction,
    AccessDenied,
}

impl OperationResult {
    /// Returns whether the server classified this outcome as transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OperationResult::PrepareTimeout
                | OperationResult::CommitTimeout
                | OperationResult::ForwardTimeout
        )
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationResult::Success => write!(f, "Success"),
            OperationResult::PrepareTimeout => write!(f, "PrepareTimeout"),
            OperationResult::CommitTimeout => write!(f, "CommitTimeout"),
            OperationResult::ForwardTimeout => write!(f, "ForwardTimeout"),
            OperationResult::WrongExpectedVersion => write!(f, "WrongExpectedVersion"),
            OperationResult::StreamDeleted => write!(f, "StreamDeleted"),
            OperationResult::InvalidTransaction => write!(f, "InvalidTransaction"),
            OperationResult::AccessDenied => write!(f, "AccessDenied"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_result_retryable() {
        assert!(OperationResult::PrepareTimeout.is_retryable());
        assert!(OperationResult::CommitTimeout.is_retryable());
        assert!(OperationResult::ForwardTimeout.is_retryable());

        assert!(!OperationResult::Success.is_retryable());
        assert!(!OperationResult::WrongExpectedVersion.is_retryable());
        assert!(!OperationResult::StreamDeleted.is_retryable());
        assert!(!OperationResult::InvalidTransaction.is_retryable());
        assert!(!OperationResult::AccessDenied.is_retryable());
    }

    #[test]
    fn test_operation_result_serialization() {
        let json = serde_json::to_string(&OperationResult::PrepareTimeout).unwrap();
        assert_eq!(json, "\"PrepareTimeout\"");

        let parsed: OperationResult = serde_json::from_str("\"WrongExpectedVersion\"").unwrap();
        assert_eq!(parsed, OperationResult::WrongExpectedVersion);
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::FrameTooLarge {
            size: 100,
            max: 50,
        };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::UnknownCommand(0xAB);
        assert!(err.to_string().contains("0xab"));

        let err = ProtocolError::MalformedFrame("truncated login".to_string());
        assert!(err.to_string().contains("truncated login"));

        let err = ProtocolError::InvalidUtf8;
        assert!(err.to_string().contains("UTF-8"));
    }

    #[test]
    fn test_connection_fatal() {
        assert!(!ProtocolError::UnknownCommand(0x55).is_connection_fatal());
        assert!(ProtocolError::FrameTooLarge { size: 1, max: 0 }.is_connection_fatal());
        assert!(ProtocolError::MalformedFrame(String::new()).is_connection_fatal());
    }
}
