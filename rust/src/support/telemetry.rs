use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

use crate::config::{LogLevel, Transport};

/// Install the global subscriber. Output goes to stderr: stdout carries
/// protocol frames on the line transport.
pub fn init_telemetry(level: LogLevel, transport: Transport) {
    let default_directive = match level {
        LogLevel::None => return,
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(level == LogLevel::Debug)
        .try_init();
    if installed.is_ok() {
        tracing::debug!(transport = transport.as_str(), "Telemetry initialized");
    }
}
