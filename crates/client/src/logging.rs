//! Logging setup

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::config::LogConfig;

/// Map a configured level name to a tracing level; unknown names fall back to info
pub fn parse_level(level: &str) -> Level {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install a global fmt subscriber for applications embedding the client
///
/// Fails if a global subscriber is already set.
pub fn init(config: &LogConfig) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&config.level))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
}
