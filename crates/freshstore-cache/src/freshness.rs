//! Freshness policies deciding whether a read must fetch

use std::{sync::Arc, time::Duration};

use crate::{
    clock::Clock,
    entry::EntryStamp,
    policy::{RefreshRule, RequestPolicy},
};

/// Decides, for an existing entry and a request policy, whether to fetch
pub trait FreshnessPolicy: Send + Sync {
    /// `entry` is `None` when nothing is cached for the key
    fn should_fetch(&self, entry: Option<&EntryStamp>, policy: &RequestPolicy) -> bool;

    /// Get policy name for debugging
    fn name(&self) -> &str;
}

/// Time-to-live based freshness, parameterized per store by a default TTL
#[derive(Debug, Clone)]
pub struct TtlFreshness {
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TtlFreshness {
    pub fn new(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { default_ttl, clock }
    }

    pub fn with_seconds(seconds: u64, clock: Arc<dyn Clock>) -> Self {
        Self::new(Duration::from_secs(seconds), clock)
    }

    pub fn with_minutes(minutes: u64, clock: Arc<dyn Clock>) -> Self {
        Self::new(Duration::from_secs(minutes.saturating_mul(60)), clock)
    }

    pub fn with_hours(hours: u64, clock: Arc<dyn Clock>) -> Self {
        Self::new(Duration::from_secs(hours.saturating_mul(3600)), clock)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

impl FreshnessPolicy for TtlFreshness {
    fn should_fetch(&self, entry: Option<&EntryStamp>, policy: &RequestPolicy) -> bool {
        // Rule order matters: a stale marker beats every cached rule.
        let Some(entry) = entry else {
            return true;
        };
        let rule = match policy {
            RequestPolicy::Fresh => return true,
            RequestPolicy::Cached(rule) => rule,
        };
        if entry.stale {
            return true;
        }

        match rule {
            RefreshRule::ForceRefresh => true,
            RefreshRule::RefreshIfOlderThan(max_age) => entry.age(self.clock.now()) > *max_age,
            RefreshRule::RefreshIfStale => entry.age(self.clock.now()) > self.default_ttl,
            RefreshRule::NeverRefresh => false,
        }
    }

    fn name(&self) -> &str {
        "ttl"
    }
}
