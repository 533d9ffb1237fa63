//! Logging initialization

use tracing::Level;

use crate::{
    error::{ConfigError, Result},
    types::LoggingSettings,
};

/// Parse a level name, case-insensitively
pub fn parse_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(ConfigError::Validation(format!(
            "unknown log level {other:?}"
        ))),
    }
}

/// Install the global fmt subscriber.
///
/// Returns `false` when a subscriber was already installed, which leaves the
/// existing one in place.
pub fn init_logging(settings: &LoggingSettings) -> Result<bool> {
    let level = parse_level(&settings.level)?;
    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(settings.with_target)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();
    Ok(installed)
}
