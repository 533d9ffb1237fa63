//! Settings loader backed by a TOML file and environment variables

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use tracing::debug;

use crate::{
    error::Result,
    types::{CacheSettings, SettingsManager},
};

/// Default environment prefix, e.g. `FRESHSTORE_DEFAULT_TTL_SECS` or
/// `FRESHSTORE_STORES__PRICES__TTL_SECS`
pub const ENV_PREFIX: &str = "FRESHSTORE";

/// Loads [`CacheSettings`] from an optional file overlaid by the environment
pub struct SettingsLoader {
    config_path: PathBuf,
    env_prefix: String,
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self::with_path(Self::default_config_path())
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("freshstore")
            .join("cache.toml")
    }
}

impl SettingsManager for SettingsLoader {
    fn load(&self) -> Result<CacheSettings> {
        let builder = Config::builder()
            .add_source(File::from(self.config_path.clone()).required(false))
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: CacheSettings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        debug!(
            path = %self.config_path.display(),
            stores = settings.stores.len(),
            "Loaded cache settings"
        );
        Ok(settings)
    }

    fn save(&self, settings: &CacheSettings) -> Result<()> {
        let toml = toml::to_string(settings)?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.config_path, toml)?;
        Ok(())
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ConfigError, types::StoreSettings};
    use std::time::Duration;
    use tempfile::TempDir;

    // A prefix no real environment sets keeps these tests hermetic.
    const TEST_PREFIX: &str = "FRESHSTORE_UNIT_TEST_UNSET";

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let loader = SettingsLoader::with_path(temp_dir.path().join("absent.toml"))
            .with_env_prefix(TEST_PREFIX);

        let settings = loader.load().unwrap();
        assert_eq!(settings, CacheSettings::default());
    }

    #[test]
    fn test_load_file_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.toml");
        std::fs::write(
            &path,
            r#"
default_ttl_secs = 120

[stores.prices]
ttl_secs = 15

[stores.kyc-tier]
ttl_secs = 86400
durable = true

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let settings = SettingsLoader::with_path(&path)
            .with_env_prefix(TEST_PREFIX)
            .load()
            .unwrap();

        assert_eq!(settings.ttl_for("prices"), Duration::from_secs(15));
        assert_eq!(settings.ttl_for("kyc-tier"), Duration::from_secs(86400));
        assert_eq!(settings.ttl_for("news"), Duration::from_secs(120));
        assert!(settings.is_durable("kyc-tier"));
        assert!(!settings.is_durable("prices"));
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn test_mixed_case_store_table_is_not_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.toml");
        std::fs::write(&path, "[stores.KycTier]\nttl_secs = 86400\ndurable = true\n").unwrap();

        let settings = SettingsLoader::with_path(&path)
            .with_env_prefix(TEST_PREFIX)
            .load()
            .unwrap();

        assert_eq!(settings.ttl_for("kyctier"), Duration::from_secs(86400));
        assert_eq!(settings.ttl_for("KycTier"), Duration::from_secs(86400));
        assert!(settings.is_durable("KycTier"));
        assert!(freshstore_cache::validate_store_id("KycTier").is_err());
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.toml");
        std::fs::write(&path, "default_ttl_secs = 0\n").unwrap();

        let result = SettingsLoader::with_path(&path)
            .with_env_prefix(TEST_PREFIX)
            .load();
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("cache.toml");
        let loader = SettingsLoader::with_path(&path).with_env_prefix(TEST_PREFIX);

        let mut settings = CacheSettings::default();
        settings.durable_root = Some(temp_dir.path().join("entries"));
        settings.stores.insert(
            "balances".to_string(),
            StoreSettings {
                ttl_secs: Some(60),
                durable: true,
            },
        );

        loader.save(&settings).unwrap();
        assert_eq!(loader.load().unwrap(), settings);
    }
}
