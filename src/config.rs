use std::collections::HashMap;
use std::env;
use std::path::Path;

use clap::Parser;
use config::{Config, Environment, File, Value};
use serde::Deserialize;

use crate::error::ConfigError;

const API_KEY_VAR: &str = "OPENAI_API_KEY";
const ASSISTANT_ID_VAR: &str = "OPENAI_ASSISTANT_ID";

const DEFAULT_GREETING: &str = "Hi! I'm here to assist you in finding the perfect snowboard gear. \
Can you provide details about your gender, riding style, experience, or budget, then we can get started?";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path (YAML or TOML)
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Secrets file holding OPENAI_API_KEY and OPENAI_ASSISTANT_ID
    #[arg(long, env = "SECRETS_FILE")]
    pub secrets: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "HOST")]
    pub host: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub assistant: AssistantSettings,
    pub session: SessionConfig,
    pub ui: UiConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Upper bound for every route except the reply stream.
    pub request_timeout_secs: u64,
}

/// Remote assistant credentials and endpoint.
#[derive(Deserialize, Clone)]
pub struct AssistantSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub assistant_id: String,
    pub base_url: String,
    /// Timeout for non-streaming requests.
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for AssistantSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantSettings")
            .field("api_key", &"<redacted>")
            .field("assistant_id", &self.assistant_id)
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Sessions idle longer than this are removed.
    pub idle_timeout_secs: u64,
    pub reap_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UiConfig {
    pub title: String,
    pub greeting: String,
    pub input_placeholder: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    /// Emit JSON log lines instead of the compact format.
    pub json: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(env::args())
    }

    /// Build the configuration.
    ///
    /// Precedence, lowest first: defaults, config file, `GURU_` environment,
    /// secrets file, `OPENAI_*` environment, command line.
    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args).map_err(|e| ConfigError::Cli(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.request_timeout_secs", 120)?
            .set_default("assistant.base_url", "https://api.openai.com")?
            .set_default("assistant.request_timeout_secs", 60)?
            .set_default("session.idle_timeout_secs", 30 * 60)?
            .set_default("session.reap_interval_secs", 60)?
            .set_default("ui.title", "🏂 Snowboard Guru")?
            .set_default("ui.greeting", DEFAULT_GREETING)?
            .set_default("ui.input_placeholder", "Ask me anything about snowboarding!")?
            .set_default("telemetry.json", false)?;

        // Config file: explicit path must exist, cwd fallbacks are optional.
        if let Some(path) = &cli.config {
            builder = builder.add_source(File::with_name(path));
        } else {
            for candidate in ["config.yaml", "config.toml"] {
                if Path::new(candidate).exists() {
                    builder = builder.add_source(File::with_name(candidate));
                    break;
                }
            }
        }

        // E.g. GURU_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("GURU")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let secrets = load_secrets(cli.secrets.as_deref())?;
        for (var, key) in [
            (API_KEY_VAR, "assistant.api_key"),
            (ASSISTANT_ID_VAR, "assistant.assistant_id"),
        ] {
            if let Some(value) = lookup_secret(&secrets, var) {
                builder = builder.set_override(key, value)?;
            }
            if let Ok(value) = env::var(var)
                && !value.trim().is_empty()
            {
                builder = builder.set_override(key, value)?;
            }
        }

        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.assistant.api_key.trim().is_empty() {
            return Err(ConfigError::MissingSecret(API_KEY_VAR));
        }
        if self.assistant.assistant_id.trim().is_empty() {
            return Err(ConfigError::MissingSecret(ASSISTANT_ID_VAR));
        }
        url::Url::parse(&self.assistant.base_url)?;
        Ok(())
    }
}

/// Read the top-level keys of the secrets file. Sections and other keys are
/// left alone.
///
/// An explicit path must exist; the default `./secrets.toml` is optional.
fn load_secrets(path: Option<&str>) -> Result<HashMap<String, Value>, ConfigError> {
    let source = match path {
        Some(path) => File::with_name(path),
        None => File::with_name("secrets.toml").required(false),
    };
    let secrets = Config::builder()
        .add_source(source)
        .build()?
        .try_deserialize::<HashMap<String, Value>>()?;
    Ok(secrets)
}

fn lookup_secret(secrets: &HashMap<String, Value>, name: &str) -> Option<String> {
    secrets
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, value)| value.clone().into_string().ok())
        .filter(|value| !value.trim().is_empty())
}
