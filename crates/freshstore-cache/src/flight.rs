//! In-flight fetch registry
//!
//! At most one fetch runs per key. Readers that arrive while it runs attach to
//! the same [`Shared`] future and observe its single outcome. Each attached
//! reader holds a [`FlightTicket`]; when the last ticket for a running fetch is
//! dropped the fetch future is dropped with it, which cancels the fetch.
//! [`FlightRegistry::abort_all`] cancels every running fetch at once, so no
//! earlier fetch outlives a wipe.

use std::{
    collections::HashMap,
    mem,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use futures::future::{abortable, AbortHandle, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    error::{FetchError, FetchErrorKind},
    fetcher::Outcome,
    key::StoreKey,
    metrics::StoreMetrics,
};

pub(crate) type SharedFetch<V> = Shared<BoxFuture<'static, Outcome<V>>>;

struct Slot<V: Clone> {
    id: u64,
    fetch: SharedFetch<V>,
    abort: AbortHandle,
    subscribers: usize,
}

pub(crate) struct FlightRegistry<K, V: Clone> {
    slots: Mutex<HashMap<K, Slot<V>>>,
    next_id: AtomicU64,
    metrics: Arc<StoreMetrics>,
}

impl<K, V> FlightRegistry<K, V>
where
    K: StoreKey,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(metrics: Arc<StoreMetrics>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            metrics,
        }
    }

    /// Attach to the running fetch for `key`, or start one with `start`.
    ///
    /// `start` receives the flight id that must later be passed to
    /// [`complete`](Self::complete). Returns the ticket and whether an existing
    /// flight was joined.
    pub(crate) fn join_or_start<S>(self: &Arc<Self>, key: &K, start: S) -> (FlightTicket<K, V>, bool)
    where
        S: FnOnce(u64) -> BoxFuture<'static, Outcome<V>>,
    {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(key) {
            slot.subscribers += 1;
            let ticket = self.ticket(key, slot.id, slot.fetch.clone());
            return (ticket, true);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (fetch, abort) = abortable(start(id));
        let fetch = fetch
            .map(|outcome| {
                outcome.unwrap_or_else(|_| {
                    Outcome::Failure(FetchError::new(FetchErrorKind::Cancelled, "fetch cancelled by wipe"))
                })
            })
            .boxed()
            .shared();
        slots.insert(
            key.clone(),
            Slot {
                id,
                fetch: fetch.clone(),
                abort,
                subscribers: 1,
            },
        );
        (self.ticket(key, id, fetch), false)
    }

    fn ticket(self: &Arc<Self>, key: &K, id: u64, fetch: SharedFetch<V>) -> FlightTicket<K, V> {
        FlightTicket {
            registry: Arc::clone(self),
            key: key.clone(),
            id,
            fetch,
        }
    }

    /// Retire a finished flight so later readers start a new one.
    ///
    /// Ignored if the slot now belongs to a different flight.
    pub(crate) fn complete(&self, key: &K, id: u64) -> bool {
        let removed = {
            let mut slots = self.slots.lock();
            match slots.get(key) {
                Some(slot) if slot.id == id => slots.remove(key),
                _ => None,
            }
        };
        removed.is_some()
    }

    /// Cancel every running flight, returning how many were cancelled.
    ///
    /// Attached readers receive a [`FetchErrorKind::Cancelled`] failure. The
    /// fetch futures have been dropped by the time this returns, so a reader
    /// arriving afterwards never overlaps an earlier fetch for its key.
    pub(crate) async fn abort_all(&self) -> usize {
        let removed = mem::take(&mut *self.slots.lock());
        let count = removed.len();
        for slot in removed.values() {
            slot.abort.abort();
        }
        for (_, slot) in removed {
            // An aborted flight resolves on its next poll, dropping the fetch.
            let _ = slot.fetch.await;
        }
        count
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.slots.lock().len()
    }

    fn release(&self, key: &K, id: u64) {
        let removed = {
            let mut slots = self.slots.lock();
            match slots.get_mut(key) {
                Some(slot) if slot.id == id => {
                    slot.subscribers = slot.subscribers.saturating_sub(1);
                    if slot.subscribers == 0 {
                        slots.remove(key)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        if removed.is_some() {
            self.metrics.record_cancelled_flight();
            debug!(key = ?key, flight = id, "Cancelled fetch with no remaining subscribers");
        }
    }
}

/// A reader's claim on an in-flight fetch
pub(crate) struct FlightTicket<K: StoreKey, V: Clone + Send + Sync + 'static> {
    registry: Arc<FlightRegistry<K, V>>,
    key: K,
    id: u64,
    fetch: SharedFetch<V>,
}

impl<K, V> FlightTicket<K, V>
where
    K: StoreKey,
    V: Clone + Send + Sync + 'static,
{
    /// Wait for the flight's outcome
    pub(crate) async fn outcome(self) -> Outcome<V> {
        self.fetch.clone().await
    }
}

impl<K, V> Drop for FlightTicket<K, V>
where
    K: StoreKey,
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.registry.release(&self.key, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn registry() -> Arc<FlightRegistry<String, u32>> {
        Arc::new(FlightRegistry::new(Arc::new(StoreMetrics::new())))
    }

    #[tokio::test]
    async fn test_second_reader_joins_running_flight() {
        let registry = registry();
        let starts = Arc::new(AtomicUsize::new(0));
        let key = "BTC".to_string();

        let start = |_id: u64| {
            starts.fetch_add(1, Ordering::SeqCst);
            async { Outcome::Success(42) }.boxed()
        };
        let (first, joined_first) = registry.join_or_start(&key, start);
        let (second, joined_second) = registry.join_or_start(&key, |_id| {
            starts.fetch_add(1, Ordering::SeqCst);
            async { Outcome::Success(0) }.boxed()
        });

        assert!(!joined_first);
        assert!(joined_second);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(first.outcome().await, Outcome::Success(42));
        assert_eq!(second.outcome().await, Outcome::Success(42));
    }

    #[tokio::test]
    async fn test_last_ticket_drop_cancels_flight() {
        let metrics = Arc::new(StoreMetrics::new());
        let registry = Arc::new(FlightRegistry::<String, u32>::new(Arc::clone(&metrics)));
        let key = "ETH".to_string();

        let (first, _) = registry.join_or_start(&key, |_| futures::future::pending().boxed());
        let (second, _) = registry.join_or_start(&key, |_| futures::future::pending().boxed());
        assert_eq!(registry.in_flight(), 1);

        drop(first);
        assert_eq!(registry.in_flight(), 1);
        drop(second);
        assert_eq!(registry.in_flight(), 0);
        assert_eq!(metrics.snapshot().cancelled_flights, 1);
    }

    #[tokio::test]
    async fn test_complete_ignores_superseded_flight() {
        let registry = registry();
        let key = "SOL".to_string();

        let (first, _) = registry.join_or_start(&key, |_| async { Outcome::Success(1) }.boxed());
        let first_id = first.id;
        drop(first);

        let (second, joined) = registry.join_or_start(&key, |_| async { Outcome::Success(2) }.boxed());
        assert!(!joined);
        assert!(!registry.complete(&key, first_id));
        assert_eq!(registry.in_flight(), 1);

        let second_id = second.id;
        assert_eq!(second.outcome().await, Outcome::Success(2));
        assert!(registry.complete(&key, second_id));
        assert_eq!(registry.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_abort_all_cancels_and_drops_running_fetches() {
        let registry = registry();
        let key = "ADA".to_string();
        let dropped = Arc::new(AtomicUsize::new(0));

        struct CountDrop(Arc<AtomicUsize>);
        impl Drop for CountDrop {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let guard = CountDrop(Arc::clone(&dropped));
        let (ticket, _) = registry.join_or_start(&key, move |_| {
            async move {
                let _guard = guard;
                futures::future::pending::<Outcome<u32>>().await
            }
            .boxed()
        });

        assert_eq!(registry.abort_all().await, 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(registry.in_flight(), 0);

        match ticket.outcome().await {
            Outcome::Failure(error) => assert_eq!(error.kind(), FetchErrorKind::Cancelled),
            other => panic!("expected cancellation, got {other:?}"),
        }

        let (next, joined) = registry.join_or_start(&key, |_| async { Outcome::Success(7) }.boxed());
        assert!(!joined);
        assert_eq!(next.outcome().await, Outcome::Success(7));
    }
}
