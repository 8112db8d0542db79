use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::TelemetryConfig;

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info,guru_chat=debug,tower_http=info";

/// Initialize logging.
///
/// Configures:
/// - `tracing-subscriber::fmt`, compact by default or JSON lines when
///   `telemetry.json` is set.
/// - `EnvFilter` for dynamic log levels (`RUST_LOG`).
pub fn init(config: &TelemetryConfig) {
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let compact_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .compact()
    });
    let json_layer = config
        .json
        .then(|| tracing_subscriber::fmt::layer().with_target(true).json());

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(compact_layer)
        .with(json_layer)
        .init();
}
