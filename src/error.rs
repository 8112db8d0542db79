//! Error types for the chat front-end.
//!
//! [`ChatError`] is the per-request error surfaced to the browser. Startup
//! problems are reported as [`ConfigError`] and halt the process.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Fatal configuration problems detected at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required secret is absent or empty.
    #[error("Missing required secret: {0}")]
    MissingSecret(&'static str),

    /// Command line arguments could not be parsed.
    #[error("Invalid command line: {0}")]
    Cli(String),

    /// The assistant base URL is not a valid URL.
    #[error("Invalid assistant base URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A configuration source failed to load or deserialize.
    #[error(transparent)]
    Source(#[from] config::ConfigError),
}

/// A failed call to the assistant or moderation service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed: {message}")]
pub struct RemoteServiceError {
    /// The remote operation that failed (e.g. `create thread`).
    pub operation: &'static str,
    /// HTTP status returned by the service, if a response arrived.
    pub status: Option<u16>,
    /// Error message from the service or the transport.
    pub message: String,
}

impl RemoteServiceError {
    pub fn new(operation: &'static str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            operation,
            status,
            message: message.into(),
        }
    }

    /// Wrap a transport-level failure (connect, timeout, body read).
    pub fn transport(operation: &'static str, err: &reqwest::Error) -> Self {
        Self::new(operation, err.status().map(|s| s.as_u16()), err.to_string())
    }
}

/// Errors surfaced while handling one chat request.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The outgoing user text was flagged before any run started.
    #[error("Your message was flagged. Please try again.")]
    ModerationRejected,

    #[error(transparent)]
    Remote(#[from] RemoteServiceError),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Another request already holds the session (a reply is streaming).
    #[error("A reply is already streaming for this session")]
    RunInProgress,

    /// The stream endpoint was hit without a submitted message.
    #[error("No message is waiting for a reply")]
    NothingToRun,

    #[error("Message must not be empty")]
    EmptyMessage,

    /// The file was not produced in this session.
    #[error("File not found: {0}")]
    FileNotFound(String),
}

/// Result type alias for chat operations.
pub type Result<T, E = ChatError> = std::result::Result<T, E>;

impl ChatError {
    /// Short machine-readable name, used by the browser to pick a toast style.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::ModerationRejected => "moderation_rejected",
            Self::Remote(_) => "remote_service",
            Self::SessionNotFound(_) => "session_not_found",
            Self::RunInProgress => "run_in_progress",
            Self::NothingToRun => "nothing_to_run",
            Self::EmptyMessage => "empty_message",
            Self::FileNotFound(_) => "file_not_found",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ModerationRejected => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Remote(_) => StatusCode::BAD_GATEWAY,
            Self::SessionNotFound(_) | Self::FileNotFound(_) => StatusCode::NOT_FOUND,
            Self::RunInProgress | Self::NothingToRun => StatusCode::CONFLICT,
            Self::EmptyMessage => StatusCode::BAD_REQUEST,
        }
    }
}

/// The session mutex is only contended while a reply streams.
impl From<tokio::sync::TryLockError> for ChatError {
    fn from(_: tokio::sync::TryLockError) -> Self {
        Self::RunInProgress
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}
