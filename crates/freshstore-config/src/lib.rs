//! Freshstore configuration
//!
//! Loads per-store TTLs and the durable backend location from a TOML file and
//! `FRESHSTORE_*` environment variables, and sets up logging.

pub mod error;
pub mod logging;
pub mod manager;
pub mod types;

pub use error::{ConfigError, Result};
pub use logging::{init_logging, parse_level};
pub use manager::{SettingsLoader, ENV_PREFIX};
pub use types::{CacheSettings, LoggingSettings, SettingsManager, StoreSettings, DEFAULT_TTL_SECS};
