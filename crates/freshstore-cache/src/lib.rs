//! # Freshstore Cache
//!
//! Freshness-aware caching engine that sits between application code and slow
//! or unreliable remote data sources.
//!
//! ## Features
//!
//! - **Request policies**: callers choose how fresh data must be per read
//! - **Single-flight**: concurrent reads of one key share a single fetch
//! - **Pluggable persistence**: in-memory or durable, partitioned by store id
//! - **Stale markers**: invalidation keeps the last good value readable
//! - **Coordinated wipe**: erase every registered store on sign-out
//! - **Notification resets**: posted events mark whole stores stale
//!
//! ```no_run
//! use freshstore_cache::{KeyedStore, RequestPolicy, SingleFetcher};
//!
//! # async fn demo() -> freshstore_cache::Result<()> {
//! let prices = KeyedStore::<String, f64>::builder("prices")
//!     .fetcher(SingleFetcher::new(|_asset: &String| Ok::<_, std::io::Error>(64_000.0)))
//!     .build()?;
//!
//! let btc = prices.get(RequestPolicy::cached(), "BTC".to_string()).await;
//! # let _ = btc;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod codec;
pub mod entry;
pub mod error;
pub mod events;
pub mod fetcher;
mod flight;
pub mod freshness;
pub mod key;
pub mod metrics;
pub mod policy;
pub mod state;
pub mod storage;
pub mod store;
pub mod wipe;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{Codec, GzipJsonCodec, JsonCodec};
pub use entry::{CacheEntry, EntryStamp};
pub use error::{CacheError, FetchError, FetchErrorKind, Result};
pub use events::{NotificationBus, NotificationEvent, ResetConfiguration};
pub use fetcher::{
    AsyncFetcher, BatchFetcher, ClientFetcher, Fetcher, NetworkClient, Outcome, SingleFetcher,
    TransportError,
};
pub use freshness::{FreshnessPolicy, TtlFreshness};
pub use key::{validate_store_id, StoreKey};
pub use metrics::{StoreMetrics, StoreStats};
pub use policy::{KeyedRequest, RefreshRule, RequestPolicy};
pub use state::{ReadState, ReadStream, ReadStreamExt};
pub use storage::{DiskBackend, DiskPersister, MemoryPersister, Persister};
pub use store::{KeyedStore, Store, StoreBuilder, DEFAULT_TTL};
pub use wipe::{Flushable, FlushReport, WipeCoordinator};
