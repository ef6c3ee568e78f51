use thiserror::Error;

use super::stream::StreamId;

/// QUIC transport error codes surfaced to the connection layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum TransportErrorCode {
    NoError = 0x0,
    InternalError = 0x1,
    StreamLimitError = 0x4,
    StreamStateError = 0x5,
}

impl TransportErrorCode {
    pub fn value(self) -> u64 {
        self as u64
    }
}

#[derive(Error, Debug, Clone)]
pub enum QuicError {
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String), // String instead of std::io::Error for Clone

    #[error("Connection closed")]
    ConnectionClosed,
}

impl From<std::io::Error> for QuicError {
    fn from(err: std::io::Error) -> Self {
        QuicError::Io(err.to_string())
    }
}

impl From<config::ConfigError> for QuicError {
    fn from(err: config::ConfigError) -> Self {
        QuicError::Config(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Too many open streams (limit {limit})")]
    TooManyOpenStreams { limit: usize },

    #[error("attempted to remove non-existing stream: {0}")]
    NotFound(StreamId),

    #[error("a stream with ID {0} already exists")]
    AlreadyExists(StreamId),

    #[error("BUG: {0}")]
    InvariantViolation(String),
}

/// Error recovery action suggestions
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Close the connection with a transport error
    CloseConnection { error_code: u64, reason: String },
    /// Reset the stream
    ResetStream { stream_id: u64, error_code: u64 },
    /// Ignore the error and continue
    Ignore,
}

impl QuicError {
    /// Transport error code the connection should close with, if any
    pub fn transport_error_code(&self) -> Option<TransportErrorCode> {
        match self {
            QuicError::Stream(StreamError::TooManyOpenStreams { .. }) => {
                Some(TransportErrorCode::StreamLimitError)
            }
            QuicError::Stream(StreamError::InvariantViolation(_)) => {
                Some(TransportErrorCode::InternalError)
            }
            QuicError::Stream(StreamError::NotFound(_)) | QuicError::Stream(StreamError::AlreadyExists(_)) => {
                Some(TransportErrorCode::StreamStateError)
            }
            _ => None,
        }
    }

    /// Get suggested recovery action for this error
    pub fn recovery_action(&self) -> RecoveryAction {
        match self {
            QuicError::Stream(StreamError::TooManyOpenStreams { limit }) => RecoveryAction::CloseConnection {
                error_code: TransportErrorCode::StreamLimitError.value(),
                reason: format!("peer exceeded {} open streams", limit),
            },
            QuicError::Stream(StreamError::InvariantViolation(reason)) => RecoveryAction::CloseConnection {
                error_code: TransportErrorCode::InternalError.value(),
                reason: reason.clone(),
            },
            QuicError::Stream(StreamError::AlreadyExists(id)) => RecoveryAction::ResetStream {
                stream_id: id.value(),
                error_code: TransportErrorCode::StreamStateError.value(),
            },
            _ => RecoveryAction::Ignore,
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            QuicError::Io(_) => true,
            QuicError::Stream(StreamError::NotFound(_)) => true,
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            QuicError::Stream(StreamError::InvariantViolation(_)) => ErrorSeverity::Critical,
            QuicError::ConnectionClosed => ErrorSeverity::Critical,
            QuicError::Stream(StreamError::TooManyOpenStreams { .. }) => ErrorSeverity::High,
            QuicError::Stream(_) => ErrorSeverity::Medium,
            QuicError::Config(_) => ErrorSeverity::Medium,
            _ => ErrorSeverity::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

pub type Result<T> = std::result::Result<T, QuicError>;
