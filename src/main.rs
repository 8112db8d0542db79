//! Snowboard Guru server
//!
//! Entry point: load configuration, initialize logging, serve.

use std::sync::Arc;

use dotenvy::dotenv;
use mimalloc::MiMalloc;
use tracing::info;

use guru_chat::assistant::{AssistantService, OpenAiClient};
use guru_chat::chat::ChatService;
use guru_chat::config::AppConfig;
use guru_chat::{server, telemetry};

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let config = match AppConfig::load() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    telemetry::init(&config.telemetry);

    info!(
        name: "assistant.config.loaded",
        base_url = %config.assistant.base_url,
        assistant_id = %config.assistant.assistant_id,
        "Assistant configuration loaded"
    );

    let client = Arc::new(OpenAiClient::new(&config.assistant)?);
    let chat = Arc::new(ChatService::new(
        Arc::clone(&client) as Arc<dyn AssistantService>,
        client,
        config.assistant.assistant_id.clone(),
        config.ui.greeting.clone(),
    ));

    server::start_server(config, chat).await
}
