use faxbot_mcp::config::{parse_config, ConfigError};
use faxbot_mcp::support::telemetry::init_telemetry;

#[tokio::main]
async fn main() {
    let config = match parse_config() {
        Ok(config) => config,
        Err(ConfigError::Cli(err)) => err.exit(),
        Err(err) => {
            eprintln!("[faxbot-mcp] Error: {err}");
            std::process::exit(1);
        }
    };

    init_telemetry(config.log_level, config.transport);
    tracing::info!("Starting faxbot-mcp {}...", env!("CARGO_PKG_VERSION"));
    for line in config.summary_lines() {
        tracing::info!("  - {line}");
    }

    if let Err(err) = faxbot_mcp::run(config).await {
        tracing::error!("Fatal error: {err}");
        std::process::exit(1);
    }
}
