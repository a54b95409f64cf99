use collector_core::Collector;
use river_lib::config::ConfigLoader;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Map the `LOG_LEVEL` environment variable onto a tracing filter.
/// `FATAL` and `PANIC` exist for compatibility with older deployments and
/// collapse onto `error`.
fn init_logging() {
    let level = std::env::var("LOG_LEVEL").unwrap_or_default();
    let directive = match level.to_uppercase().as_str() {
        "DEBUG" => "debug",
        "WARN" => "warn",
        "ERROR" | "FATAL" | "PANIC" => "error",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directive))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    // Startup misconfiguration is the only non-zero exit: load and
    // validate before anything is spawned.
    let config = ConfigLoader::load()?;

    info!(
        polling = config.polling_enabled,
        rf_subscribe = config.rf_subscribe_enabled,
        rest = config.rest_enabled,
        "riverd starting"
    );

    Collector::new(config)?.run().await
}
