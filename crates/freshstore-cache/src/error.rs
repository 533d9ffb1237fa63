//! Cache-related error types

use std::{fmt, sync::Arc};

use thiserror::Error;

/// Errors raised by the engine and its persistence layer.
///
/// These never reach stream consumers. The engine absorbs persistence faults
/// (degrading reads to a miss and writes to a no-op); only [`FetchError`]
/// travels through `ReadState::Error`.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Persistence read failed for store {store_id}: {message}")]
    PersistenceRead { store_id: String, message: String },

    #[error("Persistence write failed for store {store_id}: {message}")]
    PersistenceWrite { store_id: String, message: String },

    #[error("Codec error: {message}")]
    Codec { message: String },

    #[error("Invalid store id: {id:?}")]
    InvalidStoreId { id: String },

    #[error("Policy violation: {message}")]
    PolicyViolation { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CacheError {
    pub(crate) fn codec(message: impl fmt::Display) -> Self {
        CacheError::Codec {
            message: message.to_string(),
        }
    }

    pub(crate) fn policy(message: impl Into<String>) -> Self {
        CacheError::PolicyViolation {
            message: message.into(),
        }
    }
}

/// Re-export commonly used Result type
pub type Result<T> = std::result::Result<T, CacheError>;

/// Broad classification of a fetch failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Transport-level failure (connect, timeout, reset)
    Network,
    /// The remote answered with a non-success status
    Http(u16),
    /// The response body could not be decoded
    Decode,
    /// The requested key was absent from the response
    NotFound,
    /// The fetch was cancelled by a store wipe before it finished
    Cancelled,
    /// Anything else
    Other,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::Network => f.write_str("network error"),
            FetchErrorKind::Http(status) => write!(f, "http {status}"),
            FetchErrorKind::Decode => f.write_str("decode error"),
            FetchErrorKind::NotFound => f.write_str("not found"),
            FetchErrorKind::Cancelled => f.write_str("cancelled"),
            FetchErrorKind::Other => f.write_str("fetch failed"),
        }
    }
}

/// Failure of a single fetch attempt.
///
/// Cloneable so one in-flight result can be delivered to every attached
/// subscriber. The original cause is kept behind an `Arc` and exposed through
/// [`std::error::Error::source`].
#[derive(Clone)]
pub struct FetchError {
    kind: FetchErrorKind,
    message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl FetchError {
    /// Create an error without an underlying cause
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying cause
    pub fn from_source<E>(kind: FetchErrorKind, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind,
            message: source.to_string(),
            source: Some(Arc::new(source)),
        }
    }

    /// Default error mapper used by the fetcher constructors
    pub fn other<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::from_source(FetchErrorKind::Other, source)
    }

    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::new(FetchErrorKind::NotFound, format!("{what} not found"))
    }

    pub fn kind(&self) -> FetchErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The original cause, if one was captured
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.source.as_deref()
    }
}

impl fmt::Debug for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("has_cause", &self.source.is_some())
            .finish()
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Two fetch errors are equal when they classify and describe the same failure.
impl PartialEq for FetchError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}
