//! Value codecs for the durable backend

use std::{
    io::{Read, Write},
    marker::PhantomData,
};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{de::DeserializeOwned, Serialize};

use crate::{CacheError, Result};

/// Serializes values for durable persistence.
///
/// A decode failure is treated by the engine as a cache miss.
pub trait Codec<V>: Send + Sync {
    /// Recorded alongside each entry; entries written by another codec are misses
    fn name(&self) -> &'static str;

    fn encode(&self, value: &V) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<V>;
}

/// Plain JSON
pub struct JsonCodec<V> {
    _value: PhantomData<fn() -> V>,
}

impl<V> JsonCodec<V> {
    pub fn new() -> Self {
        Self {
            _value: PhantomData,
        }
    }
}

impl<V> Default for JsonCodec<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Codec<V> for JsonCodec<V>
where
    V: Serialize + DeserializeOwned,
{
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &V) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(CacheError::codec)
    }

    fn decode(&self, bytes: &[u8]) -> Result<V> {
        serde_json::from_slice(bytes).map_err(CacheError::codec)
    }
}

/// Gzip-compressed JSON, for large payloads such as transaction histories
pub struct GzipJsonCodec<V> {
    level: Compression,
    _value: PhantomData<fn() -> V>,
}

impl<V> GzipJsonCodec<V> {
    pub fn new() -> Self {
        Self::with_level(Compression::default())
    }

    pub fn with_level(level: Compression) -> Self {
        Self {
            level,
            _value: PhantomData,
        }
    }
}

impl<V> Default for GzipJsonCodec<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Codec<V> for GzipJsonCodec<V>
where
    V: Serialize + DeserializeOwned,
{
    fn name(&self) -> &'static str {
        "gzip+json"
    }

    fn encode(&self, value: &V) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(value).map_err(CacheError::codec)?;
        let mut encoder = GzEncoder::new(Vec::new(), self.level);
        encoder.write_all(&json).map_err(CacheError::codec)?;
        encoder.finish().map_err(CacheError::codec)
    }

    fn decode(&self, bytes: &[u8]) -> Result<V> {
        let mut json = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut json)
            .map_err(CacheError::codec)?;
        serde_json::from_slice(&json).map_err(CacheError::codec)
    }
}
