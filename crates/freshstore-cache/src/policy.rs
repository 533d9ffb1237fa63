//! Caller-supplied request policies

use std::time::Duration;

/// How old a cached value may be before a `Cached` request refetches it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshRule {
    /// Refetch once the entry is older than the store's default TTL
    RefreshIfStale,
    /// Refetch once the entry is older than the given age
    RefreshIfOlderThan(Duration),
    /// Serve what is cached, then always refetch
    ForceRefresh,
    /// Serve what is cached; refetch only if the entry is missing or marked stale
    NeverRefresh,
}

/// Caller intent for a single `stream()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPolicy {
    /// Always fetch; cached data is never emitted
    Fresh,
    /// Use the cache according to a refresh rule
    Cached(RefreshRule),
}

impl RequestPolicy {
    /// The usual `Cached(RefreshIfStale)` policy
    pub const fn cached() -> Self {
        RequestPolicy::Cached(RefreshRule::RefreshIfStale)
    }

    /// Pull-to-refresh helper: a forced refresh becomes `Fresh`, otherwise
    /// the cache is trusted for up to `ttl`.
    pub fn from_refresh(force_refresh: bool, ttl: Duration) -> Self {
        if force_refresh {
            RequestPolicy::Fresh
        } else {
            RequestPolicy::Cached(RefreshRule::RefreshIfOlderThan(ttl))
        }
    }

    /// Attach a key, producing a request for a keyed store
    pub fn with_key<K>(self, key: K) -> KeyedRequest<K> {
        KeyedRequest { policy: self, key }
    }

    /// Whether an existing entry is shown to the caller before a refetch
    /// completes.
    ///
    /// `Fresh` never shows cached data and `RefreshIfStale` only shows data it
    /// considers fresh; the remaining rules accept whatever is cached.
    pub(crate) fn serves_cached_while_refreshing(&self) -> bool {
        matches!(
            self,
            RequestPolicy::Cached(
                RefreshRule::ForceRefresh
                    | RefreshRule::RefreshIfOlderThan(_)
                    | RefreshRule::NeverRefresh
            )
        )
    }
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self::cached()
    }
}

/// A policy bound to the key it applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedRequest<K> {
    pub policy: RequestPolicy,
    pub key: K,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_refresh() {
        let ttl = Duration::from_secs(60);
        assert_eq!(RequestPolicy::from_refresh(true, ttl), RequestPolicy::Fresh);
        assert_eq!(
            RequestPolicy::from_refresh(false, ttl),
            RequestPolicy::Cached(RefreshRule::RefreshIfOlderThan(ttl))
        );
    }

    #[test]
    fn test_with_key() {
        let request = RequestPolicy::Fresh.with_key("BTC");
        assert_eq!(request.key, "BTC");
        assert_eq!(request.policy, RequestPolicy::Fresh);
    }

    #[test]
    fn test_serves_cached_while_refreshing() {
        assert!(!RequestPolicy::Fresh.serves_cached_while_refreshing());
        assert!(!RequestPolicy::cached().serves_cached_while_refreshing());
        assert!(RequestPolicy::Cached(RefreshRule::ForceRefresh).serves_cached_while_refreshing());
        assert!(RequestPolicy::Cached(RefreshRule::NeverRefresh).serves_cached_while_refreshing());
    }
}
