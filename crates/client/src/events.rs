//! Cross-tab session notifications.
//!
//! Login and logout are announced on two independent channels:
//! - a named broadcast channel ([`SessionEventBus`]), preferred;
//! - the token store itself: a write of the login-broadcast marker reads as
//!   `logged-in` and removal of the access token as `logged-out` in sibling
//!   tabs.
//!
//! Delivery is best-effort and at-least-once; there is no ordering between the
//! two channels. Failures are logged, never returned.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use gatehouse_core::SessionEvent;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::origin::TabId;
use crate::storage::{StorageEvent, StorageKey, TokenStore};

/// Capacity of the broadcast channel before slow listeners start lagging.
const BUS_CAPACITY: usize = 64;

/// A session event as carried on the broadcast channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusMessage {
    pub event: SessionEvent,
    pub source: TabId,
}

/// Errors raised by a broadcast channel implementation.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    #[error("broadcast channel '{0}' is closed")]
    Closed(String),
    #[error("broadcast channel unavailable: {0}")]
    Unavailable(String),
}

/// Same-origin publish/subscribe channel for session events.
pub trait SessionEventBus: Send + Sync {
    /// Channel name, for logs.
    fn name(&self) -> &str;

    /// Publish to every subscriber. Having no subscriber is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel cannot be used.
    fn publish(&self, message: BusMessage) -> Result<(), BusError>;

    /// Subscribe to messages published from now on.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel cannot be opened.
    fn subscribe(&self) -> Result<BoxStream<'static, BusMessage>, BusError>;
}

/// [`SessionEventBus`] over a Tokio broadcast channel.
#[derive(Debug)]
pub struct BroadcastBus {
    name: String,
    sender: broadcast::Sender<BusMessage>,
}

impl BroadcastBus {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            name: name.into(),
            sender,
        }
    }
}

impl SessionEventBus for BroadcastBus {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        if self.sender.send(message).is_err() {
            tracing::trace!(channel = %self.name, event = %message.event, "No tabs listening");
        }
        Ok(())
    }

    fn subscribe(&self) -> Result<BoxStream<'static, BusMessage>, BusError> {
        let name = self.name.clone();
        let receiver = self.sender.subscribe();
        Ok(stream::unfold(receiver, move |mut receiver| {
            let name = name.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(message) => return Some((message, receiver)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(channel = %name, skipped, "Broadcast listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        })
        .boxed())
    }
}

/// Announces this tab's logins and logouts and listens for sibling tabs'.
#[derive(Clone)]
pub struct CrossTabNotifier {
    store: TokenStore,
    bus: Option<Arc<dyn SessionEventBus>>,
}

impl std::fmt::Debug for CrossTabNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossTabNotifier")
            .field("tab", &self.store.tab())
            .field("channel", &self.bus.as_ref().map(|bus| bus.name().to_owned()))
            .finish()
    }
}

impl CrossTabNotifier {
    #[must_use]
    pub fn new(store: TokenStore, bus: Option<Arc<dyn SessionEventBus>>) -> Self {
        Self { store, bus }
    }

    /// Tell sibling tabs that this tab logged in.
    pub fn announce_login(&self) {
        let marker = chrono::Utc::now().timestamp_millis().to_string();
        if let Err(err) = self.store.set(StorageKey::LoginBroadcast, &marker) {
            tracing::warn!(error = %err, "Failed to write login broadcast marker");
        }
        self.publish(SessionEvent::LoggedIn);
    }

    /// Tell sibling tabs that this tab logged out.
    ///
    /// The access-token removal done by the caller is the storage-side signal.
    pub fn announce_logout(&self) {
        self.publish(SessionEvent::LoggedOut);
    }

    fn publish(&self, event: SessionEvent) {
        let Some(bus) = &self.bus else {
            return;
        };
        let message = BusMessage {
            event,
            source: self.store.tab(),
        };
        if let Err(err) = bus.publish(message) {
            tracing::warn!(error = %err, %event, "Failed to broadcast session event");
        }
    }

    /// Stream of session events raised by sibling tabs, from both channels.
    ///
    /// Subscriptions are taken when this is called; dropping the stream closes
    /// them.
    #[must_use]
    pub fn listen(&self) -> BoxStream<'static, SessionEvent> {
        let tab = self.store.tab();

        let from_storage = stream::unfold(self.store.changes(), |mut changes| async move {
            loop {
                let change = changes.recv().await?;
                if let Some(event) = signal_from_storage(&change) {
                    return Some((event, changes));
                }
            }
        })
        .boxed();

        let from_bus = match &self.bus {
            Some(bus) => match bus.subscribe() {
                Ok(messages) => messages
                    .filter_map(move |message| {
                        futures::future::ready((message.source != tab).then_some(message.event))
                    })
                    .boxed(),
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to open broadcast channel, using storage events only");
                    stream::empty().boxed()
                }
            },
            None => stream::empty().boxed(),
        };

        stream::select(from_storage, from_bus).boxed()
    }
}

/// Map a sibling tab's storage write to the session event it stands for.
fn signal_from_storage(change: &StorageEvent) -> Option<SessionEvent> {
    match (change.key, &change.new_value) {
        (StorageKey::LoginBroadcast, Some(_)) => Some(SessionEvent::LoggedIn),
        (StorageKey::AccessToken, None) => Some(SessionEvent::LoggedOut),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::storage::SharedStorage;

    struct UnavailableBus;

    impl SessionEventBus for UnavailableBus {
        fn name(&self) -> &str {
            "unavailable"
        }

        fn publish(&self, _message: BusMessage) -> Result<(), BusError> {
            Err(BusError::Unavailable("not supported".to_string()))
        }

        fn subscribe(&self) -> Result<BoxStream<'static, BusMessage>, BusError> {
            Err(BusError::Unavailable("not supported".to_string()))
        }
    }

    async fn next_event(events: &mut BoxStream<'static, SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_reaches_sibling_only() {
        let storage = SharedStorage::in_memory();
        let bus: Arc<dyn SessionEventBus> = Arc::new(BroadcastBus::new("auth-events"));
        let a = CrossTabNotifier::new(storage.handle(TabId::new()), Some(bus.clone()));
        let b = CrossTabNotifier::new(storage.handle(TabId::new()), Some(bus));

        let mut a_events = a.listen();
        let mut b_events = b.listen();

        a.announce_logout();
        assert_eq!(next_event(&mut b_events).await, SessionEvent::LoggedOut);

        b.announce_logout();
        assert_eq!(next_event(&mut a_events).await, SessionEvent::LoggedOut);
    }

    #[tokio::test]
    async fn test_storage_fallback_when_bus_unavailable() {
        let storage = SharedStorage::in_memory();
        let bus: Arc<dyn SessionEventBus> = Arc::new(UnavailableBus);
        let a_store = storage.handle(TabId::new());
        let a = CrossTabNotifier::new(a_store.clone(), Some(bus.clone()));
        let b = CrossTabNotifier::new(storage.handle(TabId::new()), Some(bus));
        let mut b_events = b.listen();

        // Publishing failures are swallowed
        a.announce_login();
        assert_eq!(next_event(&mut b_events).await, SessionEvent::LoggedIn);

        a_store.store_tokens("at1", "rt1").unwrap();
        a_store.clear_tokens().unwrap();
        assert_eq!(next_event(&mut b_events).await, SessionEvent::LoggedOut);
    }

    #[test]
    fn test_signal_mapping() {
        let source = TabId::new();
        let change = |key, new_value: Option<&str>| StorageEvent {
            key,
            new_value: new_value.map(str::to_owned),
            source,
        };

        assert_eq!(
            signal_from_storage(&change(StorageKey::LoginBroadcast, Some("1"))),
            Some(SessionEvent::LoggedIn)
        );
        assert_eq!(
            signal_from_storage(&change(StorageKey::AccessToken, None)),
            Some(SessionEvent::LoggedOut)
        );
        assert_eq!(signal_from_storage(&change(StorageKey::LoginBroadcast, None)), None);
        assert_eq!(signal_from_storage(&change(StorageKey::AccessToken, Some("at2"))), None);
        assert_eq!(signal_from_storage(&change(StorageKey::RefreshToken, None)), None);
    }
}
