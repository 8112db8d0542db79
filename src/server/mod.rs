//! Axum HTTP server.
//!
//! Routes:
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | `GET` | `/` | new session, rendered page |
//! | `POST` | `/api/chat` | submit a message |
//! | `GET` | `/api/chat/stream` | SSE reply stream |
//! | `POST` | `/api/sessions/{id}/cancel` | stop the streaming reply |
//! | `GET` | `/api/sessions/{id}/transcript` | transcript JSON |
//! | `DELETE` | `/api/sessions/{id}` | end the session |
//! | `GET` | `/api/files/{file_id}?session_id=` | proxy for images generated in the session |
//! | `GET` | `/healthz` | liveness |

mod api;
mod pages;
mod sse;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::chat::ChatService;
use crate::config::{AppConfig, SessionConfig};

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    pub config: Arc<AppConfig>,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let timeout_duration = Duration::from_secs(state.config.server.request_timeout_secs);

    // Everything except the reply stream is bounded in time.
    let bounded = Router::new()
        .route("/", get(pages::index))
        .route("/healthz", get(api::healthz))
        .route("/api/chat", post(api::chat))
        .route("/api/sessions/{id}", axum::routing::delete(api::delete_session))
        .route("/api/sessions/{id}/cancel", post(api::cancel))
        .route("/api/sessions/{id}/transcript", get(api::transcript))
        .route("/api/files/{file_id}", get(api::file))
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| {
                let duration = timeout_duration;
                async move {
                    match tokio::time::timeout(duration, next.run(req)).await {
                        Ok(res) => res,
                        Err(_) => {
                            (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response()
                        }
                    }
                }
            },
        ));

    Router::new()
        .route("/api/chat/stream", get(api::chat_stream))
        .merge(bounded)
        .nest_service("/static", ServeDir::new("static"))
        .fallback(pages::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn start_server(config: Arc<AppConfig>, chat: Arc<ChatService>) -> anyhow::Result<()> {
    spawn_reaper(Arc::clone(&chat), &config.session);

    let state = AppState {
        chat,
        config: Arc::clone(&config),
    };
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

/// Periodically drop idle sessions and their remote threads.
fn spawn_reaper(chat: Arc<ChatService>, config: &SessionConfig) {
    let idle_timeout = Duration::from_secs(config.idle_timeout_secs);
    let every = Duration::from_secs(config.reap_interval_secs.max(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            chat.reap_expired(idle_timeout).await;
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
