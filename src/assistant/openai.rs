//! `OpenAI` Assistants v2 client.
//!
//! Implements [`AssistantService`] and [`Moderation`] over HTTPS. Run streams
//! are Server-Sent Events; [`decode_run_stream`] turns the raw byte stream into
//! [`RunEvent`]s.

use std::fmt::Display;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::{Method, RequestBuilder, Response, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::{AssistantService, FileContent, Moderation, RunEventStream};
use crate::config::AssistantSettings;
use crate::error::{ConfigError, RemoteServiceError};
use crate::events::RunEvent;
use crate::transcript::Role;

/// HTTP client for the assistant and moderation endpoints.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    request_timeout: Duration,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url.as_str())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Deserialize)]
struct ThreadObject {
    id: String,
}

#[derive(Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationResult>,
}

#[derive(Deserialize)]
struct ModerationResult {
    flagged: bool,
}

impl OpenAiClient {
    /// Create a client from the assistant settings.
    pub fn new(settings: &AssistantSettings) -> Result<Self, ConfigError> {
        // A trailing slash makes `Url::join` append instead of replacing the
        // last path segment of a proxied base URL.
        let base_url = Url::parse(&format!("{}/", settings.base_url.trim_end_matches('/')))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            api_key: settings.api_key.clone(),
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
        })
    }

    fn url(&self, path: &str) -> Url {
        self.base_url
            .join(path)
            .unwrap_or_else(|_| self.base_url.clone())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send(operation: &'static str, rb: RequestBuilder) -> Result<Response, RemoteServiceError> {
        let resp = rb
            .send()
            .await
            .map_err(|e| RemoteServiceError::transport(operation, &e))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(RemoteServiceError::new(
            operation,
            Some(status.as_u16()),
            api_error_message(&body, status.canonical_reason().unwrap_or("request failed")),
        ))
    }

    async fn send_json<T: DeserializeOwned>(
        operation: &'static str,
        rb: RequestBuilder,
    ) -> Result<T, RemoteServiceError> {
        Self::send(operation, rb)
            .await?
            .json()
            .await
            .map_err(|e| RemoteServiceError::transport(operation, &e))
    }
}

#[async_trait::async_trait]
impl AssistantService for OpenAiClient {
    async fn create_thread(&self) -> Result<String, RemoteServiceError> {
        let rb = self
            .request(Method::POST, "v1/threads")
            .timeout(self.request_timeout)
            .json(&serde_json::json!({}));
        let thread: ThreadObject = Self::send_json("create thread", rb).await?;
        Ok(thread.id)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), RemoteServiceError> {
        let id = checked_id("delete thread", thread_id)?;
        let rb = self
            .request(Method::DELETE, &format!("v1/threads/{id}"))
            .timeout(self.request_timeout);
        Self::send("delete thread", rb).await?;
        Ok(())
    }

    async fn post_message(
        &self,
        thread_id: &str,
        role: Role,
        text: &str,
    ) -> Result<(), RemoteServiceError> {
        let id = checked_id("post message", thread_id)?;
        let rb = self
            .request(Method::POST, &format!("v1/threads/{id}/messages"))
            .timeout(self.request_timeout)
            .json(&serde_json::json!({
                "role": role.as_str(),
                "content": text,
            }));
        Self::send("post message", rb).await?;
        Ok(())
    }

    async fn start_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<RunEventStream, RemoteServiceError> {
        let id = checked_id("start run", thread_id)?;
        // No overall timeout: the response body is the whole run.
        let rb = self
            .request(Method::POST, &format!("v1/threads/{id}/runs"))
            .header(header::ACCEPT, "text/event-stream")
            .json(&serde_json::json!({
                "assistant_id": assistant_id,
                "stream": true,
            }));
        let resp = Self::send("start run", rb).await?;
        Ok(decode_run_stream(resp.bytes_stream()))
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), RemoteServiceError> {
        let thread = checked_id("cancel run", thread_id)?;
        let run = checked_id("cancel run", run_id)?;
        let rb = self
            .request(Method::POST, &format!("v1/threads/{thread}/runs/{run}/cancel"))
            .timeout(self.request_timeout);
        Self::send("cancel run", rb).await?;
        Ok(())
    }

    async fn file_content(&self, file_id: &str) -> Result<FileContent, RemoteServiceError> {
        let id = checked_id("download file", file_id)?;
        let rb = self
            .request(Method::GET, &format!("v1/files/{id}/content"))
            .timeout(self.request_timeout);
        let resp = Self::send("download file", rb).await?;

        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RemoteServiceError::transport("download file", &e))?;

        Ok(FileContent {
            content_type,
            bytes,
        })
    }
}

#[async_trait::async_trait]
impl Moderation for OpenAiClient {
    async fn check(&self, text: &str) -> Result<bool, RemoteServiceError> {
        let rb = self
            .http
            .post(self.url("v1/moderations"))
            .bearer_auth(&self.api_key)
            .timeout(self.request_timeout)
            .json(&serde_json::json!({ "input": text }));
        let resp: ModerationResponse = Self::send_json("moderation", rb).await?;
        Ok(resp.results.first().is_some_and(|r| r.flagged))
    }
}

/// Decode an SSE byte stream into run events.
///
/// Frame boundaries may fall anywhere inside the chunks. A transport error
/// ends the stream with a [`RemoteServiceError`].
pub fn decode_run_stream<S, B, E>(bytes: S) -> RunEventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let events = bytes.eventsource().map(|frame| match frame {
        Ok(frame) => Ok(RunEvent::decode(&frame.event, &frame.data)),
        Err(e) => Err(RemoteServiceError::new("stream run", None, e.to_string())),
    });
    Box::pin(events)
}

/// Remote ids are interpolated into URL paths; only accept the id alphabet.
fn checked_id<'a>(operation: &'static str, id: &'a str) -> Result<&'a str, RemoteServiceError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(id)
    } else {
        Err(RemoteServiceError::new(operation, None, format!("invalid id: {id:?}")))
    }
}

/// Pull `error.message` out of an API error body, falling back to the body.
fn api_error_message(body: &str, fallback: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                fallback.to_string()
            } else {
                body.trim().to_string()
            }
        })
}
