//! Fetchers: the remote side of a store
//!
//! A [`Fetcher`] performs one retrieval for a key and normalizes whatever went
//! wrong into a [`FetchError`]. The engine guarantees at most one concurrent
//! call per `(store, key)`, so implementations need no de-duplication of
//! their own.

use std::{fmt, future::Future, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::error::{FetchError, FetchErrorKind};

/// Result of one fetch attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<V> {
    Success(V),
    Failure(FetchError),
}

impl<V> Outcome<V> {
    /// Normalize a fallible result with an error mapper
    pub fn from_result<E>(result: Result<V, E>, map_err: impl FnOnce(E) -> FetchError) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(error) => Outcome::Failure(map_err(error)),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn into_result(self) -> Result<V, FetchError> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(error) => Err(error),
        }
    }
}

impl<V> From<Result<V, FetchError>> for Outcome<V> {
    fn from(result: Result<V, FetchError>) -> Self {
        Outcome::from_result(result, |e| e)
    }
}

/// Remote retrieval for a key
#[async_trait]
pub trait Fetcher<K, V>: Send + Sync {
    async fn fetch(&self, key: &K) -> Outcome<V>;
}

/// Default mapper type used by the convenience constructors
pub type DefaultErrorMapper<E> = fn(E) -> FetchError;

/// Wraps a synchronous single-shot call
pub struct SingleFetcher<F, M, E> {
    call: F,
    map_err: M,
    _error: PhantomData<fn() -> E>,
}

impl<F, E> SingleFetcher<F, DefaultErrorMapper<E>, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new<K, V>(call: F) -> Self
    where
        F: Fn(&K) -> Result<V, E>,
    {
        Self {
            call,
            map_err: FetchError::other::<E>,
            _error: PhantomData,
        }
    }
}

impl<F, M, E> SingleFetcher<F, M, E> {
    /// Replace the error mapper
    pub fn with_error_mapper<M2>(self, map_err: M2) -> SingleFetcher<F, M2, E>
    where
        M2: Fn(E) -> FetchError + Send + Sync,
    {
        SingleFetcher {
            call: self.call,
            map_err,
            _error: PhantomData,
        }
    }
}

#[async_trait]
impl<K, V, E, F, M> Fetcher<K, V> for SingleFetcher<F, M, E>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
    E: Send + 'static,
    F: Fn(&K) -> Result<V, E> + Send + Sync,
    M: Fn(E) -> FetchError + Send + Sync,
{
    async fn fetch(&self, key: &K) -> Outcome<V> {
        Outcome::from_result((self.call)(key), &self.map_err)
    }
}

/// Wraps an asynchronous call taking the key by value
pub struct AsyncFetcher<F, M, E> {
    call: F,
    map_err: M,
    _error: PhantomData<fn() -> E>,
}

impl<F, E> AsyncFetcher<F, DefaultErrorMapper<E>, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new<K, V, Fut>(call: F) -> Self
    where
        F: Fn(K) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        Self {
            call,
            map_err: FetchError::other::<E>,
            _error: PhantomData,
        }
    }
}

impl<F, M, E> AsyncFetcher<F, M, E> {
    /// Replace the error mapper
    pub fn with_error_mapper<M2>(self, map_err: M2) -> AsyncFetcher<F, M2, E>
    where
        M2: Fn(E) -> FetchError + Send + Sync,
    {
        AsyncFetcher {
            call: self.call,
            map_err,
            _error: PhantomData,
        }
    }
}

#[async_trait]
impl<K, V, E, F, Fut, M> Fetcher<K, V> for AsyncFetcher<F, M, E>
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    E: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V, E>> + Send,
    M: Fn(E) -> FetchError + Send + Sync,
{
    async fn fetch(&self, key: &K) -> Outcome<V> {
        let result = (self.call)(key.clone()).await;
        Outcome::from_result(result, &self.map_err)
    }
}

/// Wraps a batch call whose response covers many keys.
///
/// The whole collection is fetched and `select` extracts the value for the
/// requested key; a missing key is a `NotFound` failure.
pub struct BatchFetcher<F, S, M, C, E> {
    call: F,
    select: S,
    map_err: M,
    _marker: PhantomData<fn() -> (C, E)>,
}

impl<F, S, C, E> BatchFetcher<F, S, DefaultErrorMapper<E>, C, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new<K, V, Fut>(call: F, select: S) -> Self
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<C, E>>,
        S: Fn(C, &K) -> Option<V>,
    {
        Self {
            call,
            select,
            map_err: FetchError::other::<E>,
            _marker: PhantomData,
        }
    }
}

impl<F, S, M, C, E> BatchFetcher<F, S, M, C, E> {
    /// Replace the error mapper
    pub fn with_error_mapper<M2>(self, map_err: M2) -> BatchFetcher<F, S, M2, C, E>
    where
        M2: Fn(E) -> FetchError + Send + Sync,
    {
        BatchFetcher {
            call: self.call,
            select: self.select,
            map_err,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<K, V, C, E, F, Fut, S, M> Fetcher<K, V> for BatchFetcher<F, S, M, C, E>
where
    K: fmt::Debug + Send + Sync + 'static,
    V: Send + 'static,
    C: Send + 'static,
    E: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<C, E>> + Send,
    S: Fn(C, &K) -> Option<V> + Send + Sync,
    M: Fn(E) -> FetchError + Send + Sync,
{
    async fn fetch(&self, key: &K) -> Outcome<V> {
        match (self.call)().await {
            Ok(collection) => match (self.select)(collection, key) {
                Some(value) => Outcome::Success(value),
                None => Outcome::Failure(FetchError::not_found(format!("{key:?}"))),
            },
            Err(error) => Outcome::Failure((self.map_err)(error)),
        }
    }
}

/// Transport failures reported by a [`NetworkClient`]
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },
}

impl From<TransportError> for FetchError {
    fn from(error: TransportError) -> Self {
        let kind = match &error {
            TransportError::Connect(_) | TransportError::Timeout => FetchErrorKind::Network,
            TransportError::Status { status, .. } => FetchErrorKind::Http(*status),
        };
        FetchError::from_source(kind, error)
    }
}

/// Supplies raw response bodies for request paths
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn get(&self, path: &str) -> Result<Vec<u8>, TransportError>;
}

/// Fetches by building a request path from the key and decoding a JSON body
pub struct ClientFetcher<C: ?Sized, P, V> {
    client: Arc<C>,
    path: P,
    _value: PhantomData<fn() -> V>,
}

impl<C: ?Sized, P, V> ClientFetcher<C, P, V> {
    pub fn new(client: Arc<C>, path: P) -> Self {
        Self {
            client,
            path,
            _value: PhantomData,
        }
    }
}

#[async_trait]
impl<K, V, C, P> Fetcher<K, V> for ClientFetcher<C, P, V>
where
    K: Send + Sync + 'static,
    V: DeserializeOwned + Send + 'static,
    C: NetworkClient + ?Sized,
    P: Fn(&K) -> String + Send + Sync,
{
    async fn fetch(&self, key: &K) -> Outcome<V> {
        let path = (self.path)(key);
        match self.client.get(&path).await {
            Ok(body) => Outcome::from_result(serde_json::from_slice::<V>(&body), |e| {
                FetchError::from_source(FetchErrorKind::Decode, e)
            }),
            Err(error) => Outcome::Failure(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, Error)]
    #[error("upstream said no")]
    struct Upstream;

    #[tokio::test]
    async fn test_single_fetcher_success_and_default_mapper() {
        let fetcher = SingleFetcher::new(|key: &u32| {
            if *key == 0 {
                Err(Upstream)
            } else {
                Ok(key * 10)
            }
        });

        assert_eq!(fetcher.fetch(&4).await, Outcome::Success(40));
        match fetcher.fetch(&0).await {
            Outcome::Failure(error) => {
                assert_eq!(error.kind(), FetchErrorKind::Other);
                assert_eq!(error.message(), "upstream said no");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_custom_error_mapper() {
        let fetcher = AsyncFetcher::new(|_key: String| async { Err::<u8, _>(Upstream) })
            .with_error_mapper(|e: Upstream| FetchError::from_source(FetchErrorKind::Http(503), e));

        let outcome: Outcome<u8> = fetcher.fetch(&"ETH".to_string()).await;
        match outcome {
            Outcome::Failure(error) => assert_eq!(error.kind(), FetchErrorKind::Http(503)),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_batch_fetcher_selects_key() {
        let fetcher = BatchFetcher::new(
            || async {
                let mut rates = HashMap::new();
                rates.insert("BTC".to_string(), 42_000u64);
                rates.insert("ETH".to_string(), 2_500u64);
                Ok::<_, Upstream>(rates)
            },
            |mut rates: HashMap<String, u64>, key: &String| rates.remove(key),
        );

        assert_eq!(fetcher.fetch(&"ETH".to_string()).await, Outcome::Success(2_500));
        match fetcher.fetch(&"DOGE".to_string()).await {
            Outcome::Failure(error) => assert_eq!(error.kind(), FetchErrorKind::NotFound),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    struct FakeClient {
        responses: HashMap<String, Result<Vec<u8>, TransportError>>,
    }

    #[async_trait]
    impl NetworkClient for FakeClient {
        async fn get(&self, path: &str) -> Result<Vec<u8>, TransportError> {
            self.responses
                .get(path)
                .cloned()
                .unwrap_or_else(|| Err(TransportError::Status { status: 404, body: String::new() }))
        }
    }

    #[tokio::test]
    async fn test_client_fetcher_maps_transport_errors() {
        let mut responses = HashMap::new();
        responses.insert("/tiers/alice".to_string(), Ok(br#"{"tier":2}"#.to_vec()));
        responses.insert("/tiers/bob".to_string(), Err(TransportError::Timeout));
        responses.insert("/tiers/carol".to_string(), Ok(b"not json".to_vec()));
        let client = Arc::new(FakeClient { responses });

        let fetcher = ClientFetcher::new(client, |user: &String| format!("/tiers/{user}"));

        let ok: Outcome<serde_json::Value> = fetcher.fetch(&"alice".to_string()).await;
        assert_eq!(ok, Outcome::Success(serde_json::json!({"tier": 2})));

        let mut kinds = Vec::new();
        for user in ["bob", "carol", "dave"] {
            let outcome: Outcome<serde_json::Value> = fetcher.fetch(&user.to_string()).await;
            match outcome {
                Outcome::Failure(error) => kinds.push(error.kind()),
                Outcome::Success(value) => panic!("expected failure, got {value}"),
            }
        }

        assert_eq!(
            kinds,
            vec![
                FetchErrorKind::Network,
                FetchErrorKind::Decode,
                FetchErrorKind::Http(404)
            ]
        );
    }
}
