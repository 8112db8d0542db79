use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

use super::AppState;
use crate::render::{escape_html, html_shell, page};

/// GET / - Start a conversation and render the chat page.
pub(super) async fn index(State(state): State<AppState>) -> Response {
    let ui = &state.config.ui;

    let opened = state
        .chat
        .open_session()
        .await
        .and_then(|handle| state.chat.transcript(handle.id()).map(|t| (handle, t)));

    match opened {
        Ok((handle, transcript)) => Html(page(
            &ui.title,
            handle.id(),
            &transcript,
            &ui.input_placeholder,
        ))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to open session");
            let content = format!(
                r#"<main class="chat"><p class="error">Could not start a conversation: {}</p></main>"#,
                escape_html(&e.to_string())
            );
            (e.status_code(), Html(html_shell(&ui.title, &content))).into_response()
        }
    }
}

/// Fallback for unknown paths.
pub(super) async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found")
}
