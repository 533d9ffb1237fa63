//! Store activity counters

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Instant, SystemTime},
};

use serde::{Deserialize, Serialize};

/// Point-in-time view of a store's counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Reads started through `stream()`
    pub reads: u64,
    /// Reads answered from the cache without fetching
    pub hits: u64,
    /// Reads that found nothing cached
    pub cold_misses: u64,
    /// Fetches actually started
    pub fetches: u64,
    /// Fetches that completed with a failure
    pub fetch_failures: u64,
    /// Reads that attached to a fetch already in flight
    pub coalesced: u64,
    /// Fetches abandoned because every subscriber went away
    pub cancelled_flights: u64,
    /// Entries marked stale by invalidation or a reset notification
    pub invalidations: u64,
    /// Times the store was wiped
    pub wipes: u64,
    /// Persistence reads or writes that failed and were absorbed
    pub persistence_errors: u64,
    /// Mean duration of completed fetches (milliseconds)
    pub avg_fetch_time_ms: f64,
    /// When the snapshot was taken
    pub taken_at: Option<SystemTime>,
}

impl StoreStats {
    /// Share of reads served without fetching, as a percentage
    pub fn hit_rate(&self) -> f64 {
        if self.reads == 0 {
            0.0
        } else {
            (self.hits as f64 / self.reads as f64) * 100.0
        }
    }

    /// Share of reads that did not start their own fetch, as a percentage
    pub fn fetch_savings(&self) -> f64 {
        if self.reads == 0 {
            0.0
        } else {
            ((self.hits + self.coalesced) as f64 / self.reads as f64) * 100.0
        }
    }
}

/// Lock-free counters shared by a store and its in-flight fetches
#[derive(Debug, Default)]
pub struct StoreMetrics {
    reads: AtomicU64,
    hits: AtomicU64,
    cold_misses: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    coalesced: AtomicU64,
    cancelled_flights: AtomicU64,
    invalidations: AtomicU64,
    wipes: AtomicU64,
    persistence_errors: AtomicU64,
    completed_fetches: AtomicU64,
    total_fetch_time_us: AtomicU64,
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cold_miss(&self) {
        self.cold_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_started(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished fetch with its duration
    pub fn record_fetch_finished(&self, timer: &OperationTimer, success: bool) {
        if !success {
            self.fetch_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.completed_fetches.fetch_add(1, Ordering::Relaxed);
        self.total_fetch_time_us
            .fetch_add(timer.elapsed_us(), Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled_flight(&self) {
        self.cancelled_flights.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidations(&self, count: usize) {
        self.invalidations
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_wipe(&self) {
        self.wipes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_error(&self) {
        self.persistence_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> StoreStats {
        let completed = self.completed_fetches.load(Ordering::Relaxed);
        let total_us = self.total_fetch_time_us.load(Ordering::Relaxed);
        let avg_fetch_time_ms = if completed > 0 {
            total_us as f64 / completed as f64 / 1000.0
        } else {
            0.0
        };

        StoreStats {
            reads: self.reads.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            cold_misses: self.cold_misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            cancelled_flights: self.cancelled_flights.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            wipes: self.wipes.load(Ordering::Relaxed),
            persistence_errors: self.persistence_errors.load(Ordering::Relaxed),
            avg_fetch_time_ms,
            taken_at: Some(SystemTime::now()),
        }
    }

    /// Get a formatted summary of store metrics
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Store Metrics:\n  Reads: {}\n  Hits: {}\n  Hit Rate: {:.2}%\n  Fetches: {} ({} failed, {} cancelled)\n  Coalesced: {}\n  Invalidations: {}\n  Wipes: {}\n  Persistence Errors: {}\n  Avg Fetch: {:.2}ms",
            stats.reads,
            stats.hits,
            stats.hit_rate(),
            stats.fetches,
            stats.fetch_failures,
            stats.cancelled_flights,
            stats.coalesced,
            stats.invalidations,
            stats.wipes,
            stats.persistence_errors,
            stats.avg_fetch_time_ms
        )
    }
}

/// Operation timing helper
#[derive(Debug)]
pub struct OperationTimer {
    start_time: Instant,
}

impl OperationTimer {
    /// Start timing an operation
    pub fn start() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64() * 1000.0
    }

    fn elapsed_us(&self) -> u64 {
        u64::try_from(self.start_time.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_stats_rates() {
        let stats = StoreStats {
            reads: 10,
            hits: 6,
            coalesced: 2,
            ..StoreStats::default()
        };

        assert_eq!(stats.hit_rate(), 60.0);
        assert_eq!(stats.fetch_savings(), 80.0);
        assert_eq!(StoreStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_fetch_outcomes_recorded() {
        let metrics = StoreMetrics::new();
        let timer = OperationTimer::start();
        metrics.record_fetch_started();
        metrics.record_fetch_finished(&timer, false);
        metrics.record_fetch_started();
        metrics.record_fetch_finished(&timer, true);

        let stats = metrics.snapshot();
        assert_eq!(stats.fetches, 2);
        assert_eq!(stats.fetch_failures, 1);
        assert!(stats.avg_fetch_time_ms >= 0.0);
    }

    #[test]
    fn test_summary_mentions_counters() {
        let metrics = StoreMetrics::new();
        metrics.record_read();
        metrics.record_hit();
        metrics.record_invalidations(3);

        let summary = metrics.summary();
        assert!(summary.contains("Reads: 1"));
        assert!(summary.contains("Invalidations: 3"));
    }
}
