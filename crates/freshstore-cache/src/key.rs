//! Store keys and store identifiers

use std::{fmt, hash::Hash};

use serde::Serialize;

use crate::{CacheError, Result};

/// A key usable both for in-flight de-duplication (`Hash + Eq`) and for
/// addressing durable storage (`storage_key`).
///
/// Implemented for every serializable key type; singleton stores use `()`.
pub trait StoreKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Stable textual form used to address persisted entries
    fn storage_key(&self) -> String;
}

impl<T> StoreKey for T
where
    T: Serialize + Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    fn storage_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

const MAX_STORE_ID_LEN: usize = 128;

/// Check that a store identifier can partition a shared backing store.
///
/// Accepts lowercase ASCII letters, digits, `-`, `_` and `.`, not starting
/// with `.`. Ids name directories on case-insensitive filesystems and are
/// lowercased by the settings loader, so uppercase is rejected.
pub fn validate_store_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_STORE_ID_LEN
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidStoreId { id: id.to_string() })
    }
}
