//! Push notifications that reset store freshness

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::warn;

const DEFAULT_CAPACITY: usize = 64;

/// An application event that may make cached data out of date
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationEvent {
    /// A push payload announced new server-side data
    PayloadUpdated,
    /// A transaction was observed that did not originate from this client
    NonCustodialTransaction,
    /// Application-defined event
    Custom(String),
}

/// Fan-out channel for [`NotificationEvent`]s
#[derive(Debug, Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<NotificationEvent>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event, returning how many stores were listening
    pub fn post(&self, event: NotificationEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Which events mark every entry of a store stale
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetConfiguration {
    pub on: Vec<NotificationEvent>,
}

impl ResetConfiguration {
    /// Never reset on notifications
    pub fn never() -> Self {
        Self::default()
    }

    pub fn on(events: impl IntoIterator<Item = NotificationEvent>) -> Self {
        Self {
            on: events.into_iter().collect(),
        }
    }

    pub fn matches(&self, event: &NotificationEvent) -> bool {
        self.on.contains(event)
    }
}

/// A store's subscription, drained before each read
pub(crate) struct ResetListener {
    receiver: Mutex<broadcast::Receiver<NotificationEvent>>,
    config: ResetConfiguration,
}

impl ResetListener {
    pub(crate) fn new(bus: &NotificationBus, config: ResetConfiguration) -> Self {
        Self {
            receiver: Mutex::new(bus.subscribe()),
            config,
        }
    }

    /// Drain queued events; true if any of them calls for a reset.
    ///
    /// A lagged receiver has lost events, so it resets as well.
    pub(crate) fn take_pending(&self) -> bool {
        let mut receiver = self.receiver.lock();
        let mut reset = false;
        loop {
            match receiver.try_recv() {
                Ok(event) => reset |= self.config.matches(&event),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "Notification listener lagged; resetting store");
                    reset = true;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        reset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_resets_only_on_configured_events() {
        let bus = NotificationBus::default();
        let listener = ResetListener::new(
            &bus,
            ResetConfiguration::on([NotificationEvent::NonCustodialTransaction]),
        );

        bus.post(NotificationEvent::PayloadUpdated);
        assert!(!listener.take_pending());

        bus.post(NotificationEvent::Custom("noise".into()));
        bus.post(NotificationEvent::NonCustodialTransaction);
        assert!(listener.take_pending());
        assert!(!listener.take_pending());
    }

    #[test]
    fn test_lagged_listener_resets() {
        let bus = NotificationBus::new(2);
        let listener = ResetListener::new(&bus, ResetConfiguration::never());

        for _ in 0..5 {
            bus.post(NotificationEvent::PayloadUpdated);
        }
        assert!(listener.take_pending());
    }

    #[test]
    fn test_post_without_listeners() {
        let bus = NotificationBus::default();
        assert_eq!(bus.post(NotificationEvent::PayloadUpdated), 0);
    }
}
