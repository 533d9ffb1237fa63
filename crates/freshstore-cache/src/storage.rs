//! Persistence backends for cached entries

use std::{
    collections::HashMap,
    io::ErrorKind,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    codec::Codec,
    entry::CacheEntry,
    key::{validate_store_id, StoreKey},
    CacheError, Result,
};

/// Storage for the entries of one store.
///
/// Every method reports failures instead of panicking; the engine decides how
/// to degrade. Implementations must not share entries between stores.
#[async_trait]
pub trait Persister<K, V>: Send + Sync {
    /// Read the entry for a key, `None` if absent
    async fn read(&self, key: &K) -> Result<Option<CacheEntry<V>>>;

    /// Insert or replace the entry for a key
    async fn write(&self, key: &K, entry: CacheEntry<V>) -> Result<()>;

    /// Set the stale marker on one entry, keeping its value.
    ///
    /// Returns whether an entry existed.
    async fn mark_stale(&self, key: &K) -> Result<bool>;

    /// Set the stale marker on every entry, returning how many were marked
    async fn mark_all_stale(&self) -> Result<usize>;

    /// Remove every entry
    async fn wipe(&self) -> Result<()>;

    /// Backend name for logs
    fn kind(&self) -> &'static str;
}

/// Process-local persister; contents do not survive a restart
pub struct MemoryPersister<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> MemoryPersister<K, V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl<K, V> Default for MemoryPersister<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> Persister<K, V> for MemoryPersister<K, V>
where
    K: StoreKey,
    V: Clone + Send + Sync + 'static,
{
    async fn read(&self, key: &K) -> Result<Option<CacheEntry<V>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn write(&self, key: &K, entry: CacheEntry<V>) -> Result<()> {
        self.entries.write().await.insert(key.clone(), entry);
        Ok(())
    }

    async fn mark_stale(&self, key: &K) -> Result<bool> {
        let mut entries = self.entries.write().await;
        Ok(match entries.get_mut(key) {
            Some(entry) => {
                entry.stale = true;
                true
            }
            None => false,
        })
    }

    async fn mark_all_stale(&self) -> Result<usize> {
        let mut entries = self.entries.write().await;
        for entry in entries.values_mut() {
            entry.stale = true;
        }
        Ok(entries.len())
    }

    async fn wipe(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

const ENVELOPE_VERSION: u32 = 1;
const ENTRY_EXTENSION: &str = "entry";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// On-disk record of one entry
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    key: String,
    fetched_at: DateTime<Utc>,
    stale: bool,
    codec: String,
    payload: String,
}

/// A directory shared by many stores.
///
/// Each store gets its own subdirectory named by its store id, so wiping one
/// store never touches another's files.
#[derive(Debug, Clone)]
pub struct DiskBackend {
    root: Arc<PathBuf>,
}

impl DiskBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open the partition for one store
    pub fn persister<K, V, C>(&self, store_id: &str, codec: C) -> Result<DiskPersister<K, V, C>>
    where
        C: Codec<V>,
    {
        validate_store_id(store_id)?;
        Ok(DiskPersister {
            store_id: store_id.to_string(),
            dir: self.root.join(store_id),
            codec,
            _marker: PhantomData,
        })
    }
}

/// Durable persister writing one file per key.
///
/// Files are named by the SHA-256 of the key's storage form and replaced
/// atomically, so a crash mid-write leaves either the old entry or the new one.
pub struct DiskPersister<K, V, C> {
    store_id: String,
    dir: PathBuf,
    codec: C,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, C> DiskPersister<K, V, C>
where
    K: StoreKey,
    C: Codec<V>,
{
    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, storage_key: &str) -> PathBuf {
        let digest = Sha256::digest(storage_key.as_bytes());
        self.dir
            .join(format!("{}.{}", hex::encode(digest), ENTRY_EXTENSION))
    }

    fn read_error(&self, message: impl ToString) -> CacheError {
        CacheError::PersistenceRead {
            store_id: self.store_id.clone(),
            message: message.to_string(),
        }
    }

    fn write_error(&self, message: impl ToString) -> CacheError {
        CacheError::PersistenceWrite {
            store_id: self.store_id.clone(),
            message: message.to_string(),
        }
    }

    async fn load_envelope(&self, path: &Path) -> Result<Option<Envelope>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.read_error(e)),
        };
        let envelope: Envelope = serde_json::from_slice(&bytes).map_err(CacheError::codec)?;
        Ok(Some(envelope))
    }

    async fn store_envelope(&self, path: &Path, envelope: &Envelope) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| self.write_error(e))?;

        let bytes = serde_json::to_vec(envelope)?;
        let temp = self.dir.join(format!(
            ".{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        if let Err(e) = tokio::fs::write(&temp, &bytes).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(self.write_error(e));
        }
        if let Err(e) = tokio::fs::rename(&temp, path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(self.write_error(e));
        }
        Ok(())
    }
}

#[async_trait]
impl<K, V, C> Persister<K, V> for DiskPersister<K, V, C>
where
    K: StoreKey,
    V: Send + Sync + 'static,
    C: Codec<V> + 'static,
{
    async fn read(&self, key: &K) -> Result<Option<CacheEntry<V>>> {
        let storage_key = key.storage_key();
        let path = self.entry_path(&storage_key);
        let Some(envelope) = self.load_envelope(&path).await? else {
            return Ok(None);
        };

        if envelope.version != ENVELOPE_VERSION
            || envelope.key != storage_key
            || envelope.codec != self.codec.name()
        {
            debug!(
                store_id = %self.store_id,
                version = envelope.version,
                codec = %envelope.codec,
                "Ignoring incompatible entry"
            );
            return Ok(None);
        }

        let payload = STANDARD
            .decode(envelope.payload.as_bytes())
            .map_err(CacheError::codec)?;
        let value = self.codec.decode(&payload)?;

        Ok(Some(CacheEntry {
            value,
            last_fetched_at: envelope.fetched_at,
            stale: envelope.stale,
        }))
    }

    async fn write(&self, key: &K, entry: CacheEntry<V>) -> Result<()> {
        let storage_key = key.storage_key();
        let payload = self.codec.encode(&entry.value)?;
        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            key: storage_key,
            fetched_at: entry.last_fetched_at,
            stale: entry.stale,
            codec: self.codec.name().to_string(),
            payload: STANDARD.encode(payload),
        };
        let path = self.entry_path(&envelope.key);
        self.store_envelope(&path, &envelope).await
    }

    async fn mark_stale(&self, key: &K) -> Result<bool> {
        let path = self.entry_path(&key.storage_key());
        match self.load_envelope(&path).await? {
            Some(mut envelope) => {
                envelope.stale = true;
                self.store_envelope(&path, &envelope).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_stale(&self) -> Result<usize> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(self.read_error(e)),
        };

        let mut marked = 0;
        while let Some(item) = dir.next_entry().await.map_err(|e| self.read_error(e))? {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            // Unreadable files are left alone; reads already treat them as misses.
            let Ok(Some(mut envelope)) = self.load_envelope(&path).await else {
                continue;
            };
            if !envelope.stale {
                envelope.stale = true;
                self.store_envelope(&path, &envelope).await?;
            }
            marked += 1;
        }
        Ok(marked)
    }

    async fn wipe(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.write_error(e)),
        }
    }

    fn kind(&self) -> &'static str {
        "disk"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{GzipJsonCodec, JsonCodec};
    use chrono::TimeZone;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_memory_persister_basic_operations() {
        let persister = MemoryPersister::<String, u32>::new();
        let key = "BTC".to_string();

        assert!(persister.read(&key).await.unwrap().is_none());
        persister.write(&key, CacheEntry::new(7, at(0))).await.unwrap();
        assert_eq!(persister.read(&key).await.unwrap().unwrap().value, 7);
        assert_eq!(persister.len().await, 1);

        persister.wipe().await.unwrap();
        assert!(persister.is_empty().await);
    }

    #[tokio::test]
    async fn test_memory_mark_stale_keeps_value() {
        let persister = MemoryPersister::<String, u32>::new();
        let key = "ETH".to_string();
        persister.write(&key, CacheEntry::new(3, at(0))).await.unwrap();

        assert!(persister.mark_stale(&key).await.unwrap());
        assert!(!persister.mark_stale(&"DOGE".to_string()).await.unwrap());

        let entry = persister.read(&key).await.unwrap().unwrap();
        assert!(entry.stale);
        assert_eq!(entry.value, 3);
    }

    #[tokio::test]
    async fn test_disk_persister_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let backend = DiskBackend::new(temp_dir.path());
        let key = "BTC".to_string();

        let persister = backend
            .persister::<String, Vec<u64>, _>("balances", JsonCodec::new())
            .unwrap();
        persister
            .write(&key, CacheEntry::new(vec![1, 2, 3], at(10)))
            .await
            .unwrap();
        drop(persister);

        let reopened = backend
            .persister::<String, Vec<u64>, _>("balances", JsonCodec::new())
            .unwrap();
        let entry = reopened.read(&key).await.unwrap().unwrap();
        assert_eq!(entry.value, vec![1, 2, 3]);
        assert_eq!(entry.last_fetched_at, at(10));
        assert!(!entry.stale);
    }

    #[tokio::test]
    async fn test_disk_stores_are_isolated() {
        let temp_dir = TempDir::new().unwrap();
        let backend = DiskBackend::new(temp_dir.path());
        let key = "BTC".to_string();

        let prices = backend
            .persister::<String, u32, _>("prices", JsonCodec::new())
            .unwrap();
        let balances = backend
            .persister::<String, u32, _>("balances", JsonCodec::new())
            .unwrap();

        prices.write(&key, CacheEntry::new(1, at(0))).await.unwrap();
        balances.write(&key, CacheEntry::new(2, at(0))).await.unwrap();

        prices.wipe().await.unwrap();
        assert!(prices.read(&key).await.unwrap().is_none());
        assert_eq!(balances.read(&key).await.unwrap().unwrap().value, 2);
    }

    #[tokio::test]
    async fn test_disk_mark_all_stale() {
        let temp_dir = TempDir::new().unwrap();
        let persister = DiskBackend::new(temp_dir.path())
            .persister::<String, u32, _>("prices", GzipJsonCodec::new())
            .unwrap();

        for (i, asset) in ["BTC", "ETH", "SOL"].iter().enumerate() {
            persister
                .write(&asset.to_string(), CacheEntry::new(i as u32, at(0)))
                .await
                .unwrap();
        }

        assert_eq!(persister.mark_all_stale().await.unwrap(), 3);
        let entry = persister.read(&"ETH".to_string()).await.unwrap().unwrap();
        assert!(entry.stale);
        assert_eq!(entry.value, 1);
    }

    #[tokio::test]
    async fn test_disk_corrupt_entry_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let persister = DiskBackend::new(temp_dir.path())
            .persister::<String, u32, _>("prices", JsonCodec::new())
            .unwrap();
        let key = "BTC".to_string();
        persister.write(&key, CacheEntry::new(1, at(0))).await.unwrap();

        let path = persister.entry_path(&key.storage_key());
        std::fs::write(&path, b"garbage").unwrap();

        assert!(persister.read(&key).await.is_err());
    }

    #[tokio::test]
    async fn test_disk_codec_mismatch_is_miss() {
        let temp_dir = TempDir::new().unwrap();
        let backend = DiskBackend::new(temp_dir.path());
        let key = "BTC".to_string();

        backend
            .persister::<String, u32, _>("prices", JsonCodec::new())
            .unwrap()
            .write(&key, CacheEntry::new(1, at(0)))
            .await
            .unwrap();

        let gzip = backend
            .persister::<String, u32, _>("prices", GzipJsonCodec::new())
            .unwrap();
        assert!(gzip.read(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wipe_missing_directory_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let persister = DiskBackend::new(temp_dir.path())
            .persister::<String, u32, _>("never-written", JsonCodec::new())
            .unwrap();
        persister.wipe().await.unwrap();
        assert_eq!(persister.mark_all_stale().await.unwrap(), 0);
    }

    type Sample = (String, Vec<u32>, Option<bool>);

    async fn round_trip<P: Persister<String, Sample>>(
        persister: &P,
        key: &String,
        entry: &CacheEntry<Sample>,
    ) -> Option<CacheEntry<Sample>> {
        persister.write(key, entry.clone()).await.unwrap();
        persister.read(key).await.unwrap()
    }

    proptest! {
        #[test]
        fn prop_write_then_read_returns_equal_entry(
            key in "\\PC{0,24}",
            value in (".{0,32}", proptest::collection::vec(any::<u32>(), 0..8), any::<Option<bool>>()),
            secs in 0i64..4_000_000_000,
            nanos in 0u32..1_000_000_000,
            stale in any::<bool>(),
        ) {
            let entry = CacheEntry {
                value,
                last_fetched_at: Utc.timestamp_opt(secs, nanos).unwrap(),
                stale,
            };
            let temp_dir = TempDir::new().unwrap();
            let backend = DiskBackend::new(temp_dir.path());
            let memory = MemoryPersister::<String, Sample>::new();
            let json = backend.persister::<String, Sample, _>("json", JsonCodec::new()).unwrap();
            let gzip = backend.persister::<String, Sample, _>("gzip", GzipJsonCodec::new()).unwrap();

            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            runtime.block_on(async {
                assert_eq!(round_trip(&memory, &key, &entry).await, Some(entry.clone()));
                assert_eq!(round_trip(&json, &key, &entry).await, Some(entry.clone()));
                assert_eq!(round_trip(&gzip, &key, &entry).await, Some(entry.clone()));
            });
        }
    }

    #[test]
    fn test_backend_rejects_bad_store_id() {
        let backend = DiskBackend::new("/tmp/unused");
        let result = backend.persister::<String, u32, _>("../escape", JsonCodec::new());
        assert!(matches!(result, Err(CacheError::InvalidStoreId { .. })));
    }
}
