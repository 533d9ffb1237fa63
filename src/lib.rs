//! Shared fixtures for the freshstore integration tests

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use freshstore_cache::{FetchError, FetchErrorKind, Fetcher, Outcome};
use tokio::sync::Semaphore;

/// Fetcher answering `"<key>@<call>"`, counting calls.
///
/// A gated fetcher parks every call until [`release`](Self::release) adds a
/// permit. `fail_next` makes the following call fail with a network error.
#[derive(Debug)]
pub struct CountingFetcher {
    calls: AtomicUsize,
    gate: Option<Semaphore>,
    fail_next: AtomicBool,
}

impl CountingFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: None,
            fail_next: AtomicBool::new(false),
        })
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: Some(Semaphore::new(0)),
            fail_next: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Let `calls` parked fetches proceed
    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    async fn wait_for_gate(&self) -> Result<(), FetchError> {
        let Some(gate) = &self.gate else {
            return Ok(());
        };
        match gate.acquire().await {
            Ok(permit) => {
                permit.forget();
                Ok(())
            }
            Err(_) => Err(FetchError::new(FetchErrorKind::Other, "gate closed")),
        }
    }
}

#[async_trait]
impl Fetcher<String, String> for CountingFetcher {
    async fn fetch(&self, key: &String) -> Outcome<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Err(error) = self.wait_for_gate().await {
            return Outcome::Failure(error);
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Outcome::Failure(FetchError::new(
                FetchErrorKind::Network,
                format!("{key} unreachable"),
            ));
        }
        Outcome::Success(format!("{key}@{call}"))
    }
}

#[async_trait]
impl Fetcher<(), String> for CountingFetcher {
    async fn fetch(&self, _key: &()) -> Outcome<String> {
        <Self as Fetcher<String, String>>::fetch(self, &"singleton".to_string()).await
    }
}

/// Yield to the scheduler until `condition` holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::task::yield_now().await;
    }
}
