//! Cache entries and their freshness stamps

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted value together with the moment it was fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    /// The cached value
    pub value: V,
    /// When the value was last fetched successfully
    pub last_fetched_at: DateTime<Utc>,
    /// Forces the next read to refetch regardless of age
    pub stale: bool,
}

impl<V> CacheEntry<V> {
    /// Create a fresh (non-stale) entry
    pub fn new(value: V, last_fetched_at: DateTime<Utc>) -> Self {
        Self {
            value,
            last_fetched_at,
            stale: false,
        }
    }

    /// The metadata the freshness policy evaluates
    pub fn stamp(&self) -> EntryStamp {
        EntryStamp {
            last_fetched_at: self.last_fetched_at,
            stale: self.stale,
        }
    }

    /// Return the same entry with the stale marker set
    pub fn marked_stale(mut self) -> Self {
        self.stale = true;
        self
    }
}

/// Value-free view of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStamp {
    pub last_fetched_at: DateTime<Utc>,
    pub stale: bool,
}

impl EntryStamp {
    /// Age of the entry at `now`; zero if `now` precedes the fetch
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_fetched_at).to_std().unwrap_or(Duration::ZERO)
    }
}
