//! The caching engine: keyed and singleton stores

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use async_stream::stream;
use async_trait::async_trait;
use futures::{future::BoxFuture, FutureExt, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    codec::Codec,
    entry::CacheEntry,
    error::{FetchError, FetchErrorKind},
    events::{NotificationBus, ResetConfiguration, ResetListener},
    fetcher::{Fetcher, Outcome},
    flight::{FlightRegistry, FlightTicket},
    freshness::{FreshnessPolicy, TtlFreshness},
    key::{validate_store_id, StoreKey},
    metrics::{OperationTimer, StoreMetrics, StoreStats},
    policy::{KeyedRequest, RequestPolicy},
    state::{ReadState, ReadStream},
    storage::{DiskBackend, MemoryPersister, Persister},
    wipe::{Flushable, WipeCoordinator},
    CacheError, Result,
};

/// Default TTL when the builder is not given one
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct StoreInner<K: StoreKey, V: Clone + Send + Sync + 'static> {
    store_id: String,
    fetcher: Arc<dyn Fetcher<K, V>>,
    persister: Arc<dyn Persister<K, V>>,
    freshness: Arc<dyn FreshnessPolicy>,
    clock: Arc<dyn Clock>,
    flights: Arc<FlightRegistry<K, V>>,
    metrics: Arc<StoreMetrics>,
    reset: Option<ResetListener>,
    /// Serializes check-then-act: reading the entry, deciding, and joining or
    /// starting a flight happen as one step, as does persisting a result.
    /// Persister reads run under it, so reads within one store are
    /// serialized across keys; separate stores never contend.
    decision_lock: Mutex<()>,
    /// Bumped by `wipe()`; results of flights started under an older epoch
    /// are never persisted.
    epoch: AtomicU64,
}

enum Plan<K: StoreKey, V: Clone + Send + Sync + 'static> {
    Serve(V),
    Fetch {
        cached: Option<V>,
        ticket: FlightTicket<K, V>,
    },
}

impl<K, V> StoreInner<K, V>
where
    K: StoreKey,
    V: Clone + Send + Sync + 'static,
{
    async fn plan(self: &Arc<Self>, key: &K, policy: RequestPolicy) -> Plan<K, V> {
        let _decision = self.decision_lock.lock().await;
        self.apply_pending_resets().await;

        let entry = self.read_entry(key).await;
        let stamp = entry.as_ref().map(CacheEntry::stamp);
        let must_fetch = entry.is_none() || self.freshness.should_fetch(stamp.as_ref(), &policy);

        if entry.is_none() {
            self.metrics.record_cold_miss();
        }

        let entry = match entry {
            Some(entry) if !must_fetch => {
                self.metrics.record_hit();
                debug!(store_id = %self.store_id, key = ?key, "Cache hit");
                return Plan::Serve(entry.value);
            }
            entry => entry,
        };

        let cached = entry
            .filter(|_| policy.serves_cached_while_refreshing())
            .map(|entry| entry.value);

        let (ticket, joined) = self
            .flights
            .join_or_start(key, |id| self.flight(key.clone(), id));
        if joined {
            self.metrics.record_coalesced();
            debug!(store_id = %self.store_id, key = ?key, "Joined in-flight fetch");
        } else {
            self.metrics.record_fetch_started();
            debug!(store_id = %self.store_id, key = ?key, "Starting fetch");
        }

        Plan::Fetch { cached, ticket }
    }

    /// Build the shared future for one flight.
    ///
    /// Holds the store weakly so a pending fetch does not keep it alive.
    fn flight(self: &Arc<Self>, key: K, id: u64) -> BoxFuture<'static, Outcome<V>> {
        let store = Arc::downgrade(self);
        let fetcher = Arc::clone(&self.fetcher);
        let epoch = self.epoch.load(Ordering::SeqCst);

        async move {
            let timer = OperationTimer::start();
            let outcome = fetcher.fetch(&key).await;
            if let Some(store) = Weak::upgrade(&store) {
                store.settle(&key, id, epoch, &outcome, &timer).await;
            }
            outcome
        }
        .boxed()
    }

    async fn settle(&self, key: &K, id: u64, epoch: u64, outcome: &Outcome<V>, timer: &OperationTimer) {
        self.metrics
            .record_fetch_finished(timer, outcome.is_success());
        let _decision = self.decision_lock.lock().await;

        match outcome {
            Outcome::Success(value) if self.epoch.load(Ordering::SeqCst) == epoch => {
                let now = self.clock.now();
                let fetched_at = match self.persister.read(key).await {
                    Ok(Some(previous)) => now.max(previous.last_fetched_at),
                    _ => now,
                };
                self.write_entry(key, CacheEntry::new(value.clone(), fetched_at))
                    .await;
            }
            Outcome::Success(_) => {
                debug!(store_id = %self.store_id, key = ?key, "Discarding result of fetch started before wipe");
            }
            Outcome::Failure(error) => {
                debug!(store_id = %self.store_id, key = ?key, error = %error, "Fetch failed");
            }
        }

        self.flights.complete(key, id);
    }

    async fn read_entry(&self, key: &K) -> Option<CacheEntry<V>> {
        match self.persister.read(key).await {
            Ok(entry) => entry,
            Err(e) => {
                self.metrics.record_persistence_error();
                warn!(
                    store_id = %self.store_id,
                    key = ?key,
                    backend = self.persister.kind(),
                    error = %e,
                    "Cache read failed, treating as miss"
                );
                None
            }
        }
    }

    async fn write_entry(&self, key: &K, entry: CacheEntry<V>) {
        if let Err(e) = self.persister.write(key, entry).await {
            self.metrics.record_persistence_error();
            warn!(
                store_id = %self.store_id,
                key = ?key,
                backend = self.persister.kind(),
                error = %e,
                "Cache write failed, result not persisted"
            );
        }
    }

    async fn apply_pending_resets(&self) {
        let Some(listener) = &self.reset else {
            return;
        };
        if !listener.take_pending() {
            return;
        }

        match self.persister.mark_all_stale().await {
            Ok(count) => {
                self.metrics.record_invalidations(count);
                debug!(store_id = %self.store_id, entries = count, "Reset store on notification");
            }
            Err(e) => {
                self.metrics.record_persistence_error();
                warn!(store_id = %self.store_id, error = %e, "Failed to reset store on notification");
            }
        }
    }

    async fn invalidate(&self, key: &K) {
        let _decision = self.decision_lock.lock().await;
        self.apply_pending_resets().await;

        match self.persister.mark_stale(key).await {
            Ok(true) => {
                self.metrics.record_invalidations(1);
                debug!(store_id = %self.store_id, key = ?key, "Invalidated entry");
            }
            Ok(false) => {}
            Err(e) => {
                self.metrics.record_persistence_error();
                warn!(store_id = %self.store_id, key = ?key, error = %e, "Failed to invalidate entry");
            }
        }
    }

    async fn invalidate_all(&self) {
        let _decision = self.decision_lock.lock().await;
        self.apply_pending_resets().await;

        match self.persister.mark_all_stale().await {
            Ok(count) => self.metrics.record_invalidations(count),
            Err(e) => {
                self.metrics.record_persistence_error();
                warn!(store_id = %self.store_id, error = %e, "Failed to invalidate store");
            }
        }
    }

    async fn wipe(&self) -> Result<()> {
        let _decision = self.decision_lock.lock().await;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let dropped = self.flights.abort_all().await;
        self.metrics.record_wipe();

        match self.persister.wipe().await {
            Ok(()) => {
                info!(store_id = %self.store_id, dropped_flights = dropped, "Wiped store");
                Ok(())
            }
            Err(e) => {
                self.metrics.record_persistence_error();
                warn!(store_id = %self.store_id, error = %e, "Failed to wipe store");
                Err(e)
            }
        }
    }
}

/// A store addressed by key.
///
/// Cloning is cheap and every clone shares the same in-flight registry and
/// persistence.
pub struct KeyedStore<K: StoreKey, V: Clone + Send + Sync + 'static> {
    inner: Arc<StoreInner<K, V>>,
}

impl<K, V> Clone for KeyedStore<K, V>
where
    K: StoreKey,
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> fmt::Debug for KeyedStore<K, V>
where
    K: StoreKey,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedStore")
            .field("store_id", &self.inner.store_id)
            .field("backend", &self.inner.persister.kind())
            .field("freshness", &self.inner.freshness.name())
            .finish()
    }
}

impl<K, V> KeyedStore<K, V>
where
    K: StoreKey,
    V: Clone + Send + Sync + 'static,
{
    pub fn builder(store_id: impl Into<String>) -> StoreBuilder<K, V> {
        StoreBuilder::new(store_id)
    }

    pub fn store_id(&self) -> &str {
        &self.inner.store_id
    }

    pub fn stats(&self) -> StoreStats {
        self.inner.metrics.snapshot()
    }

    /// Number of fetches currently running
    pub fn in_flight(&self) -> usize {
        self.inner.flights.in_flight()
    }

    /// Read `key` under `policy`.
    ///
    /// The stream is lazy: nothing is read or fetched until it is polled.
    /// Dropping it detaches from any shared fetch.
    pub fn stream(&self, policy: RequestPolicy, key: K) -> ReadStream<V> {
        let inner = Arc::clone(&self.inner);

        Box::pin(stream! {
            inner.metrics.record_read();
            match inner.plan(&key, policy).await {
                Plan::Serve(value) => {
                    yield ReadState::Data { value, from_cache: true };
                }
                Plan::Fetch { cached, ticket } => {
                    if let Some(value) = cached {
                        yield ReadState::Data { value, from_cache: true };
                    }
                    yield ReadState::Loading;
                    match ticket.outcome().await {
                        Outcome::Success(value) => {
                            yield ReadState::Data { value, from_cache: false };
                        }
                        Outcome::Failure(error) => {
                            yield ReadState::Error(error);
                        }
                    }
                }
            }
        })
    }

    pub fn request(&self, request: KeyedRequest<K>) -> ReadStream<V> {
        self.stream(request.policy, request.key)
    }

    /// Drive a read to completion and return its final value
    pub async fn get(&self, policy: RequestPolicy, key: K) -> std::result::Result<V, FetchError> {
        let mut states = self.stream(policy, key);
        let mut latest = None;
        while let Some(state) = states.next().await {
            match state {
                ReadState::Data { value, .. } => latest = Some(value),
                ReadState::Error(error) => return Err(error),
                ReadState::Loading => {}
            }
        }
        latest.ok_or_else(|| FetchError::new(FetchErrorKind::Other, "read ended without data"))
    }

    /// Mark the entry for `key` stale; the value stays readable
    pub async fn invalidate(&self, key: &K) {
        self.inner.invalidate(key).await
    }

    /// Mark every entry stale
    pub async fn invalidate_all(&self) {
        self.inner.invalidate_all().await
    }

    /// Physically remove every entry and forget running fetches
    pub async fn wipe(&self) -> Result<()> {
        self.inner.wipe().await
    }

    /// The persisted entry for `key`, without fetching.
    ///
    /// A persistence failure reads as `None`.
    pub async fn cached(&self, key: &K) -> Option<CacheEntry<V>> {
        self.inner.read_entry(key).await
    }
}

#[async_trait]
impl<K, V> Flushable for KeyedStore<K, V>
where
    K: StoreKey,
    V: Clone + Send + Sync + 'static,
{
    fn store_id(&self) -> &str {
        &self.inner.store_id
    }

    async fn wipe(&self) -> Result<()> {
        self.inner.wipe().await
    }
}

/// A store holding a single value
pub struct Store<V: Clone + Send + Sync + 'static> {
    keyed: KeyedStore<(), V>,
}

impl<V> Clone for Store<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            keyed: self.keyed.clone(),
        }
    }
}

impl<V> fmt::Debug for Store<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Store").field(&self.keyed).finish()
    }
}

impl<V> Store<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn builder(store_id: impl Into<String>) -> StoreBuilder<(), V> {
        StoreBuilder::new(store_id)
    }

    pub fn store_id(&self) -> &str {
        self.keyed.store_id()
    }

    pub fn stats(&self) -> StoreStats {
        self.keyed.stats()
    }

    pub fn in_flight(&self) -> usize {
        self.keyed.in_flight()
    }

    pub fn stream(&self, policy: RequestPolicy) -> ReadStream<V> {
        self.keyed.stream(policy, ())
    }

    pub async fn get(&self, policy: RequestPolicy) -> std::result::Result<V, FetchError> {
        self.keyed.get(policy, ()).await
    }

    pub async fn invalidate(&self) {
        self.keyed.invalidate(&()).await
    }

    pub async fn wipe(&self) -> Result<()> {
        self.keyed.wipe().await
    }

    pub async fn cached(&self) -> Option<CacheEntry<V>> {
        self.keyed.cached(&()).await
    }
}

#[async_trait]
impl<V> Flushable for Store<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn store_id(&self) -> &str {
        self.keyed.store_id()
    }

    async fn wipe(&self) -> Result<()> {
        self.keyed.wipe().await
    }
}

type OpenPersister<K, V> = Box<dyn FnOnce(&str) -> Result<Arc<dyn Persister<K, V>>> + Send>;

enum PersisterChoice<K, V> {
    Memory,
    Provided(Arc<dyn Persister<K, V>>),
    Deferred(OpenPersister<K, V>),
}

/// Builder for [`KeyedStore`] and [`Store`]
pub struct StoreBuilder<K, V> {
    store_id: String,
    fetcher: Option<Arc<dyn Fetcher<K, V>>>,
    persister: PersisterChoice<K, V>,
    ttl: Duration,
    freshness: Option<Arc<dyn FreshnessPolicy>>,
    clock: Arc<dyn Clock>,
    reset: Option<(NotificationBus, ResetConfiguration)>,
    coordinator: Option<Arc<WipeCoordinator>>,
}

impl<K, V> StoreBuilder<K, V>
where
    K: StoreKey,
    V: Clone + Send + Sync + 'static,
{
    /// Start a builder; `store_id` must be unique among stores sharing a backend
    pub fn new(store_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            fetcher: None,
            persister: PersisterChoice::Memory,
            ttl: DEFAULT_TTL,
            freshness: None,
            clock: Arc::new(SystemClock),
            reset: None,
            coordinator: None,
        }
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn fetcher(self, fetcher: impl Fetcher<K, V> + 'static) -> Self {
        self.fetcher_arc(Arc::new(fetcher))
    }

    pub fn fetcher_arc(mut self, fetcher: Arc<dyn Fetcher<K, V>>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Use a caller-supplied persister
    pub fn persister(mut self, persister: Arc<dyn Persister<K, V>>) -> Self {
        self.persister = PersisterChoice::Provided(persister);
        self
    }

    /// Keep entries in process memory (the default)
    pub fn in_memory(mut self) -> Self {
        self.persister = PersisterChoice::Memory;
        self
    }

    /// Persist through the store's partition of a shared [`DiskBackend`]
    pub fn durable<C>(mut self, backend: &DiskBackend, codec: C) -> Self
    where
        C: Codec<V> + 'static,
    {
        let backend = backend.clone();
        self.persister = PersisterChoice::Deferred(Box::new(move |store_id| {
            let persister = backend.persister::<K, V, C>(store_id, codec)?;
            Ok(Arc::new(persister) as Arc<dyn Persister<K, V>>)
        }));
        self
    }

    /// Default TTL for `Cached(RefreshIfStale)`; ignored when a custom
    /// freshness policy is supplied
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn freshness(mut self, freshness: Arc<dyn FreshnessPolicy>) -> Self {
        self.freshness = Some(freshness);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Mark every entry stale when one of the configured events is posted
    pub fn reset_on(mut self, bus: &NotificationBus, config: ResetConfiguration) -> Self {
        self.reset = Some((bus.clone(), config));
        self
    }

    /// Register the built store for coordinated wipes
    pub fn register_with(mut self, coordinator: &Arc<WipeCoordinator>) -> Self {
        self.coordinator = Some(Arc::clone(coordinator));
        self
    }

    pub fn build(self) -> Result<KeyedStore<K, V>> {
        validate_store_id(&self.store_id)?;
        let fetcher = self.fetcher.ok_or_else(|| {
            CacheError::policy(format!("store {:?} was built without a fetcher", self.store_id))
        })?;

        let persister = match self.persister {
            PersisterChoice::Memory => Arc::new(MemoryPersister::<K, V>::new()) as Arc<dyn Persister<K, V>>,
            PersisterChoice::Provided(persister) => persister,
            PersisterChoice::Deferred(open) => open(&self.store_id)?,
        };
        let freshness = self.freshness.unwrap_or_else(|| {
            Arc::new(TtlFreshness::new(self.ttl, Arc::clone(&self.clock))) as Arc<dyn FreshnessPolicy>
        });
        let metrics = Arc::new(StoreMetrics::new());
        let reset = self
            .reset
            .map(|(bus, config)| ResetListener::new(&bus, config));

        let store = KeyedStore {
            inner: Arc::new(StoreInner {
                flights: Arc::new(FlightRegistry::new(Arc::clone(&metrics))),
                store_id: self.store_id,
                fetcher,
                persister,
                freshness,
                clock: self.clock,
                metrics,
                reset,
                decision_lock: Mutex::new(()),
                epoch: AtomicU64::new(0),
            }),
        };

        if let Some(coordinator) = self.coordinator {
            coordinator.register(Arc::new(store.clone()))?;
        }

        debug!(
            store_id = %store.inner.store_id,
            backend = store.inner.persister.kind(),
            freshness = store.inner.freshness.name(),
            "Built store"
        );
        Ok(store)
    }
}

impl<V> StoreBuilder<(), V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn build_singleton(self) -> Result<Store<V>> {
        Ok(Store {
            keyed: self.build()?,
        })
    }
}
