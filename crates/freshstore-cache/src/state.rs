//! States emitted by a store read, and combinators over them

use std::pin::Pin;

use futures::{future, stream, Stream, StreamExt};

use crate::error::FetchError;

/// One observation of a read in progress
#[derive(Debug, Clone, PartialEq)]
pub enum ReadState<V> {
    /// A fetch is underway
    Loading,
    /// A value, either from the cache or from a completed fetch
    Data { value: V, from_cache: bool },
    /// The fetch failed; the cached entry, if any, is untouched
    Error(FetchError),
}

impl<V> ReadState<V> {
    pub fn is_loading(&self) -> bool {
        matches!(self, ReadState::Loading)
    }

    pub fn data(&self) -> Option<&V> {
        match self {
            ReadState::Data { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<V> {
        match self {
            ReadState::Data { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            ReadState::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Transform the value of a `Data` state, keeping its origin
    pub fn map_data<U>(self, f: impl FnOnce(V) -> U) -> ReadState<U> {
        match self {
            ReadState::Loading => ReadState::Loading,
            ReadState::Data { value, from_cache } => ReadState::Data {
                value: f(value),
                from_cache,
            },
            ReadState::Error(error) => ReadState::Error(error),
        }
    }

    pub fn map_error(self, f: impl FnOnce(FetchError) -> FetchError) -> Self {
        match self {
            ReadState::Error(error) => ReadState::Error(f(error)),
            other => other,
        }
    }
}

/// The finite stream returned by `stream()`
pub type ReadStream<V> = Pin<Box<dyn Stream<Item = ReadState<V>> + Send>>;

/// Combinators for streams of [`ReadState`]
pub trait ReadStreamExt<V: Send + 'static>: Stream<Item = ReadState<V>> + Send + Sized + 'static {
    /// Map every `Data` value; `Loading` and `Error` pass through
    fn map_data<U, F>(self, mut f: F) -> ReadStream<U>
    where
        U: Send + 'static,
        F: FnMut(V) -> U + Send + 'static,
    {
        Box::pin(self.map(move |state| state.map_data(&mut f)))
    }

    fn map_error<F>(self, mut f: F) -> ReadStream<V>
    where
        F: FnMut(FetchError) -> FetchError + Send + 'static,
    {
        Box::pin(self.map(move |state| state.map_error(&mut f)))
    }

    /// Replace each `Data` state with the states of the read it starts.
    ///
    /// Inner streams are drained in order, one after another.
    fn flat_map_data<U, F>(self, mut f: F) -> ReadStream<U>
    where
        U: Send + 'static,
        F: FnMut(V) -> ReadStream<U> + Send + 'static,
    {
        Box::pin(self.flat_map(move |state| -> ReadStream<U> {
            match state {
                ReadState::Data { value, .. } => f(value),
                ReadState::Loading => Box::pin(stream::once(future::ready(ReadState::Loading))),
                ReadState::Error(error) => {
                    Box::pin(stream::once(future::ready(ReadState::Error(error))))
                }
            }
        }))
    }

    /// Drop `Loading` states
    fn filter_not_loading(self) -> ReadStream<V> {
        Box::pin(self.filter(|state| future::ready(!state.is_loading())))
    }
}

impl<S, V> ReadStreamExt<V> for S
where
    S: Stream<Item = ReadState<V>> + Send + Sized + 'static,
    V: Send + 'static,
{
}
