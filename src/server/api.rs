//! JSON and SSE handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use super::AppState;
use super::sse::{build_sse_response, single_error_sse};
use crate::error::{ChatError, Result};
use crate::transcript::Transcript;

/// Request body for chat API.
#[derive(Debug, Deserialize)]
pub(super) struct ChatRequest {
    session_id: String,
    message: String,
}

/// Response from chat API.
#[derive(Debug, Serialize)]
pub(super) struct ChatResponse {
    session_id: String,
    /// URL for the SSE reply stream.
    stream_url: String,
    /// Rendered user turn.
    user_html: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct StreamQuery {
    session_id: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct FileQuery {
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct CancelResponse {
    cancelled: bool,
}

pub(super) async fn healthz() -> &'static str {
    "ok"
}

/// POST /api/chat - Moderate and post a message, then hand out the stream URL.
pub(super) async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    tracing::info!(session_id = %req.session_id, "Received chat request");

    let submission = state.chat.submit(&req.session_id, &req.message).await?;

    Ok(Json(ChatResponse {
        stream_url: format!("/api/chat/stream?session_id={}", req.session_id),
        session_id: req.session_id,
        user_html: submission.user_html,
    }))
}

/// GET /api/chat/stream - Stream the reply to the last submitted message.
pub(super) async fn chat_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Response {
    match state.chat.stream_reply(&query.session_id) {
        Ok(events) => build_sse_response(events).into_response(),
        Err(e) => {
            tracing::warn!(session_id = %query.session_id, error = %e, "Reply stream refused");
            single_error_sse(e.to_string()).into_response()
        }
    }
}

/// POST /api/sessions/{id}/cancel
pub(super) async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>> {
    let cancelled = state.chat.cancel(&id)?;
    Ok(Json(CancelResponse { cancelled }))
}

/// GET /api/sessions/{id}/transcript
pub(super) async fn transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Transcript>> {
    Ok(Json(state.chat.transcript(&id)?))
}

/// DELETE /api/sessions/{id}
pub(super) async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.chat.close_session(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/files/{file_id}?session_id= - Proxy an image generated during a
/// run of that session.
pub(super) async fn file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Query(query): Query<FileQuery>,
) -> Result<Response> {
    let Some(session_id) = query.session_id else {
        return Err(ChatError::FileNotFound(file_id));
    };
    let file = state.chat.file(&session_id, &file_id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, file.content_type),
            (header::CACHE_CONTROL, "private, max-age=3600".to_string()),
        ],
        file.bytes,
    )
        .into_response())
}
