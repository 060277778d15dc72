//! Analyst Gateway - Main entry point.

use analyst_common::config::Config;
use analyst_common::logging::init_logging_with_exclusions;
use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (file, then environment overrides)
    let config = Config::load_with_env()?;

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("Analyst Gateway v{}", env!("CARGO_PKG_VERSION"));

    analyst_gateway::start_server(config).await
}
