//! Coordinated wipe of every registered store (logout, account switch)

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::{CacheError, Result};

/// Anything whose persisted data can be erased in one call
#[async_trait]
pub trait Flushable: Send + Sync {
    fn store_id(&self) -> &str;

    async fn wipe(&self) -> Result<()>;
}

/// Outcome of [`WipeCoordinator::flush_all`]
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Store ids wiped successfully
    pub wiped: Vec<String>,
    /// Store ids whose wipe failed, with the failure
    pub failed: Vec<(String, CacheError)>,
}

impl FlushReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Registry of stores wiped together
#[derive(Default)]
pub struct WipeCoordinator {
    stores: RwLock<Vec<Arc<dyn Flushable>>>,
}

impl WipeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a store; its id must not already be registered
    pub fn register(&self, store: Arc<dyn Flushable>) -> Result<()> {
        let mut stores = self.stores.write();
        if stores.iter().any(|s| s.store_id() == store.store_id()) {
            return Err(CacheError::policy(format!(
                "store {:?} is already registered for wipe",
                store.store_id()
            )));
        }
        stores.push(store);
        Ok(())
    }

    /// Ids of registered stores, in registration order
    pub fn registered(&self) -> Vec<String> {
        self.stores
            .read()
            .iter()
            .map(|s| s.store_id().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stores.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.read().is_empty()
    }

    /// Wipe every registered store.
    ///
    /// A failing store does not stop the others; failures are collected in the
    /// report.
    pub async fn flush_all(&self) -> FlushReport {
        let stores: Vec<Arc<dyn Flushable>> = self.stores.read().clone();
        let mut report = FlushReport::default();

        for store in stores {
            let id = store.store_id().to_string();
            match store.wipe().await {
                Ok(()) => report.wiped.push(id),
                Err(e) => {
                    warn!(store_id = %id, error = %e, "Failed to wipe store");
                    report.failed.push((id, e));
                }
            }
        }

        info!(
            wiped = report.wiped.len(),
            failed = report.failed.len(),
            "Flushed all stores"
        );
        report
    }
}
