//! Remote assistant and moderation services.
//!
//! The chat flow only talks to the remote side through the
//! [`AssistantService`] and [`Moderation`] traits, so tests can drive it with
//! scripted event sequences and no network.
//!
//! # Implementations
//!
//! - [`OpenAiClient`]: Assistants v2 API (`/v1/threads`, `/v1/moderations`,
//!   `/v1/files`)

pub mod openai;

pub use openai::{OpenAiClient, decode_run_stream};

use std::pin::Pin;

use axum::body::Bytes;
use futures::Stream;

use crate::error::RemoteServiceError;
use crate::events::RunEvent;
use crate::transcript::Role;

/// Ordered, non-restartable stream of events from one run.
pub type RunEventStream =
    Pin<Box<dyn Stream<Item = Result<RunEvent, RemoteServiceError>> + Send>>;

/// A file produced by the assistant (e.g. a plot from the code interpreter).
#[derive(Debug, Clone)]
pub struct FileContent {
    pub content_type: String,
    pub bytes: Bytes,
}

/// Threads, messages and streamed runs on the remote assistant.
#[async_trait::async_trait]
pub trait AssistantService: Send + Sync {
    /// Create an empty conversation thread and return its id.
    async fn create_thread(&self) -> Result<String, RemoteServiceError>;

    async fn delete_thread(&self, thread_id: &str) -> Result<(), RemoteServiceError>;

    /// Add a message to the thread.
    async fn post_message(
        &self,
        thread_id: &str,
        role: Role,
        text: &str,
    ) -> Result<(), RemoteServiceError>;

    /// Start a run of `assistant_id` on the thread in streaming mode.
    async fn start_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<RunEventStream, RemoteServiceError>;

    /// Ask the service to stop a run that is still in progress.
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), RemoteServiceError>;

    /// Download a file generated during a run.
    async fn file_content(&self, file_id: &str) -> Result<FileContent, RemoteServiceError>;
}

/// Pre-submission content classifier.
#[async_trait::async_trait]
pub trait Moderation: Send + Sync {
    /// Returns `true` if `text` is flagged.
    async fn check(&self, text: &str) -> Result<bool, RemoteServiceError>;
}
