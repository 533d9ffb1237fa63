//! Settings types

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use freshstore_cache::{validate_store_id, Codec, DiskBackend, StoreBuilder, StoreKey};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default TTL applied to stores without an override
pub const DEFAULT_TTL_SECS: u64 = 300;

/// Top-level cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// TTL in seconds for stores without an override
    pub default_ttl_secs: u64,
    /// Root directory of the shared durable backend
    pub durable_root: Option<PathBuf>,
    /// Per-store overrides keyed by store id
    pub stores: BTreeMap<String, StoreSettings>,
    /// Logging setup
    pub logging: LoggingSettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_TTL_SECS,
            durable_root: None,
            stores: BTreeMap::new(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Overrides for one store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub ttl_secs: Option<u64>,
    /// Persist through the durable backend instead of memory
    pub durable: bool,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// One of trace, debug, info, warn, error
    pub level: String,
    /// Include the event target in log lines
    pub with_target: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: false,
        }
    }
}

impl CacheSettings {
    /// TTL for a store, falling back to the default
    pub fn ttl_for(&self, store_id: &str) -> Duration {
        let secs = self
            .store(store_id)
            .and_then(|store| store.ttl_secs)
            .unwrap_or(self.default_ttl_secs);
        Duration::from_secs(secs)
    }

    pub fn is_durable(&self, store_id: &str) -> bool {
        self.store(store_id).is_some_and(|store| store.durable)
    }

    // Table keys arrive lowercased from the loader.
    fn store(&self, store_id: &str) -> Option<&StoreSettings> {
        self.stores
            .get(store_id)
            .or_else(|| self.stores.get(&store_id.to_ascii_lowercase()))
    }

    /// Durable root, or `<data dir>/freshstore` when unset
    pub fn durable_root_or_default(&self) -> PathBuf {
        self.durable_root.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("freshstore")
        })
    }

    pub fn disk_backend(&self) -> DiskBackend {
        DiskBackend::new(self.durable_root_or_default())
    }

    /// Apply the TTL and backend settings for the builder's store
    pub fn configure<K, V, C>(
        &self,
        builder: StoreBuilder<K, V>,
        backend: &DiskBackend,
        codec: C,
    ) -> StoreBuilder<K, V>
    where
        K: StoreKey,
        V: Clone + Send + Sync + 'static,
        C: Codec<V> + 'static,
    {
        let store_id = builder.store_id().to_string();
        let builder = builder.ttl(self.ttl_for(&store_id));
        if self.is_durable(&store_id) {
            builder.durable(backend, codec)
        } else {
            builder.in_memory()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "default_ttl_secs must be greater than 0".to_string(),
            ));
        }

        for (store_id, store) in &self.stores {
            validate_store_id(store_id)
                .map_err(|e| ConfigError::Validation(e.to_string()))?;
            if store.ttl_secs == Some(0) {
                return Err(ConfigError::Validation(format!(
                    "ttl_secs for store {store_id:?} must be greater than 0"
                )));
            }
        }

        crate::logging::parse_level(&self.logging.level)?;
        Ok(())
    }
}

/// Load, save, and validate cache settings
pub trait SettingsManager {
    fn load(&self) -> Result<CacheSettings>;

    fn save(&self, settings: &CacheSettings) -> Result<()>;

    fn validate(&self, settings: &CacheSettings) -> Result<()> {
        settings.validate()
    }
}
