//! `pulse-server`: rate-limited HTTP front with the shared cache layer.

use axum::Router;
use tracing_subscriber::{EnvFilter, fmt};

use pulse_core::config::AppConfig;
use pulse_core::config::logging::LogFormat;
use pulse_core::error::AppError;

#[tokio::main]
async fn main() {
    let config = load_configuration().unwrap_or_else(|e| {
        eprintln!("pulse-server: {e}");
        std::process::exit(1);
    });

    init_logging(&config);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        cache = %config.cache.provider,
        "Starting pulse-server"
    );

    if let Err(e) = pulse_api::run_server(config, Router::new()).await {
        tracing::error!(error = %e, "pulse-server stopped with an error");
        std::process::exit(1);
    }
}

/// Load configuration from `config/default.toml`, the `PULSE_ENV` overlay
/// and `PULSE__*` environment variables.
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("PULSE_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = fmt().with_env_filter(filter).with_target(true);

    match config.logging.format {
        LogFormat::Json => builder.json().with_current_span(false).init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}
