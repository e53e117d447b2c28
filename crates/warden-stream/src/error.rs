// ABOUTME: Error types for warden-stream
// ABOUTME: StreamError covers connection, session, protocol and config failures; Rejection covers refused submissions

use thiserror::Error;

/// Errors that can occur in warden-stream operations
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Session issue failed: {0}")]
    SessionIssue(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Submission rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("Session controller has shut down")]
    ControllerClosed,
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Protocol(err.to_string())
    }
}

impl From<url::ParseError> for StreamError {
    fn from(err: url::ParseError) -> Self {
        StreamError::InvalidEndpoint(err.to_string())
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        StreamError::SessionIssue(err.to_string())
    }
}

/// Why a user submission was refused instead of being sent.
///
/// The caller keeps the typed text when it gets one of these back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("a previous request is still running, please wait")]
    Busy,

    #[error("connection lost, reconnecting")]
    NotConnected,

    #[error("session is still being validated")]
    Validating,

    #[error("nothing to send")]
    Empty,
}

pub type Result<T> = std::result::Result<T, StreamError>;
