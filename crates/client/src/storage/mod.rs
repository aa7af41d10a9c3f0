//! Durable token storage.
//!
//! # Architecture
//!
//! - [`StorageBackend`] is the persistence seam (in-memory map or JSON file)
//! - [`SharedStorage`] is one backend shared by every tab of an origin, plus a
//!   change feed
//! - [`TokenStore`] is a tab's handle: reads and writes are immediately
//!   visible to the tab itself, while sibling tabs learn about them through
//!   [`StorageChanges`]
//!
//! A tab never receives change events for its own writes.
//!
//! A backend that other processes may also write (the JSON file) is polled
//! by every open change feed, so writes made by another process show up as
//! ordinary change events too.

mod file;
mod memory;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{Interval, MissedTickBehavior};

pub use file::FileBackend;
pub use memory::MemoryBackend;

use crate::origin::TabId;

/// Capacity of the change feed before slow listeners start lagging.
const CHANGE_FEED_CAPACITY: usize = 64;

/// How often a change feed looks for writes made by another process.
const EXTERNAL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Logical keys held in the token store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKey {
    /// Short-lived bearer credential.
    AccessToken,
    /// Long-lived credential used only against the refresh endpoint.
    RefreshToken,
    /// Email remembered for login form prefill.
    SavedUsername,
    /// Timestamp written on login so sibling tabs notice it.
    LoginBroadcast,
}

impl StorageKey {
    /// Every key, in storage order.
    pub const ALL: [Self; 4] = [
        Self::AccessToken,
        Self::RefreshToken,
        Self::SavedUsername,
        Self::LoginBroadcast,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::SavedUsername => "saved_username",
            Self::LoginBroadcast => "login_broadcast",
        }
    }
}

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by a storage backend.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),
    #[error("corrupt session file: {0}")]
    Corrupt(#[source] Arc<serde_json::Error>),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(Arc::new(err))
    }
}

/// Persistence seam for the token store.
///
/// Implementations must be synchronous and make a write visible to the next
/// read immediately.
pub trait StorageBackend: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying medium cannot be read.
    fn read(&self, key: StorageKey) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, or delete the key when `value` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying medium cannot be written.
    fn write(&self, key: StorageKey, value: Option<&str>) -> Result<(), StorageError>;

    /// Whether other processes may write the same storage. Such writes are
    /// only noticed by polling.
    fn shared_across_processes(&self) -> bool {
        false
    }
}

/// A change made by one tab, delivered to every other tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: StorageKey,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
    pub source: TabId,
}

/// One storage backend shared by every tab of an origin.
#[derive(Clone)]
pub struct SharedStorage {
    inner: Arc<SharedInner>,
}

struct SharedInner {
    backend: Box<dyn StorageBackend>,
    changes: broadcast::Sender<StorageEvent>,
    /// Contents as last written or seen by this process, for telling apart
    /// writes made elsewhere. `None` until the first poll.
    known: Mutex<Option<BTreeMap<StorageKey, String>>>,
}

impl std::fmt::Debug for SharedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStorage")
            .field("listeners", &self.inner.changes.receiver_count())
            .field(
                "shared_across_processes",
                &self.inner.backend.shared_across_processes(),
            )
            .finish_non_exhaustive()
    }
}

impl SharedStorage {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            inner: Arc::new(SharedInner {
                backend: Box::new(backend),
                changes,
                known: Mutex::new(None),
            }),
        }
    }

    /// Shared storage backed by a process-local map.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::default())
    }

    /// Open a handle for one tab.
    #[must_use]
    pub fn handle(&self, tab: TabId) -> TokenStore {
        TokenStore {
            shared: self.clone(),
            tab,
        }
    }
}

impl SharedInner {
    fn write(&self, key: StorageKey, value: Option<&str>) -> Result<(), StorageError> {
        let mut known = self.known();
        self.backend.write(key, value)?;
        if let Some(known) = known.as_mut() {
            match value {
                Some(value) => {
                    known.insert(key, value.to_owned());
                }
                None => {
                    known.remove(&key);
                }
            }
        }
        Ok(())
    }

    /// Announce every key that changed since the last look without this
    /// process writing it. The first call only records a baseline.
    fn poll_external(&self) -> Result<(), StorageError> {
        let events = {
            let mut known = self.known();
            let mut current = BTreeMap::new();
            for key in StorageKey::ALL {
                if let Some(value) = self.backend.read(key)? {
                    current.insert(key, value);
                }
            }
            let events: Vec<StorageEvent> = known.as_ref().map_or_else(Vec::new, |previous| {
                StorageKey::ALL
                    .into_iter()
                    .filter(|key| previous.get(key) != current.get(key))
                    .map(|key| StorageEvent {
                        key,
                        new_value: current.get(&key).cloned(),
                        source: TabId::external(),
                    })
                    .collect()
            });
            *known = Some(current);
            events
        };

        for event in events {
            tracing::debug!(key = %event.key, "Storage changed by another process");
            let _ = self.changes.send(event);
        }
        Ok(())
    }

    fn known(&self) -> MutexGuard<'_, Option<BTreeMap<StorageKey, String>>> {
        self.known.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A tab's view of the shared token storage.
#[derive(Debug, Clone)]
pub struct TokenStore {
    shared: SharedStorage,
    tab: TabId,
}

impl TokenStore {
    /// Read a key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        self.shared.inner.backend.read(key)
    }

    /// Write a key and notify sibling tabs.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    pub fn set(&self, key: StorageKey, value: &str) -> Result<(), StorageError> {
        self.shared.inner.write(key, Some(value))?;
        self.emit(key, Some(value.to_owned()));
        Ok(())
    }

    /// Remove a key and notify sibling tabs.
    ///
    /// Removing a key that is not present is not an error and emits nothing.
    /// Removing from a corrupt store goes ahead, so a session can always be
    /// cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or written.
    pub fn remove(&self, key: StorageKey) -> Result<(), StorageError> {
        match self.shared.inner.backend.read(key) {
            Ok(None) => return Ok(()),
            Ok(Some(_)) | Err(StorageError::Corrupt(_)) => {}
            Err(err) => return Err(err),
        }
        self.shared.inner.write(key, None)?;
        self.emit(key, None);
        Ok(())
    }

    /// Persist an access/refresh token pair.
    ///
    /// The refresh token is written first and restored to its previous value
    /// if the access token cannot be written, so the pair is never left
    /// half-set. Sibling tabs see the access token change last.
    ///
    /// # Errors
    ///
    /// Returns the first backend error encountered.
    pub fn store_tokens(&self, access_token: &str, refresh_token: &str) -> Result<(), StorageError> {
        let previous_refresh = self.refresh_token()?;
        self.set(StorageKey::RefreshToken, refresh_token)?;
        if let Err(err) = self.set(StorageKey::AccessToken, access_token) {
            let rollback = match previous_refresh.as_deref() {
                Some(previous) => self.set(StorageKey::RefreshToken, previous),
                None => self.remove(StorageKey::RefreshToken),
            };
            if let Err(rollback) = rollback {
                tracing::error!(error = %rollback, "Failed to roll back refresh token");
            }
            return Err(err);
        }
        Ok(())
    }

    /// Remove both tokens.
    ///
    /// # Errors
    ///
    /// Attempts both removals and returns the first error encountered.
    pub fn clear_tokens(&self) -> Result<(), StorageError> {
        let access = self.remove(StorageKey::AccessToken);
        let refresh = self.remove(StorageKey::RefreshToken);
        access.and(refresh)
    }

    /// Current access token, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub fn access_token(&self) -> Result<Option<String>, StorageError> {
        self.get(StorageKey::AccessToken)
    }

    /// Current refresh token, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub fn refresh_token(&self) -> Result<Option<String>, StorageError> {
        self.get(StorageKey::RefreshToken)
    }

    /// The tab this handle writes as.
    #[must_use]
    pub const fn tab(&self) -> TabId {
        self.tab
    }

    /// Subscribe to changes made by other tabs, including tabs of other
    /// processes when the backend is shared across processes.
    #[must_use]
    pub fn changes(&self) -> StorageChanges {
        let inner = &self.shared.inner;
        let external = inner.backend.shared_across_processes().then(|| {
            if let Err(err) = inner.poll_external() {
                tracing::debug!(error = %err, "Failed to read storage baseline");
            }
            Arc::downgrade(inner)
        });
        StorageChanges {
            receiver: inner.changes.subscribe(),
            tab: self.tab,
            external,
            ticker: None,
        }
    }

    fn emit(&self, key: StorageKey, new_value: Option<String>) {
        // No listeners is the normal single-tab case
        let _ = self.shared.inner.changes.send(StorageEvent {
            key,
            new_value,
            source: self.tab,
        });
    }
}

/// Change feed of one tab: every write made by a sibling tab.
#[derive(Debug)]
pub struct StorageChanges {
    receiver: broadcast::Receiver<StorageEvent>,
    tab: TabId,
    /// Storage to poll for writes made by other processes.
    external: Option<Weak<SharedInner>>,
    ticker: Option<Interval>,
}

impl StorageChanges {
    /// Wait for the next change made by another tab.
    ///
    /// Returns `None` once the shared storage has been dropped.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            let received = match &self.external {
                Some(storage) => {
                    let ticker = self.ticker.get_or_insert_with(|| {
                        let mut ticker = tokio::time::interval(EXTERNAL_POLL_INTERVAL);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        ticker
                    });
                    tokio::select! {
                        received = self.receiver.recv() => received,
                        _ = ticker.tick() => {
                            let inner = storage.upgrade()?;
                            if let Err(err) = inner.poll_external() {
                                tracing::debug!(error = %err, "Failed to poll storage");
                            }
                            continue;
                        }
                    }
                }
                None => self.receiver.recv().await,
            };
            match received {
                Ok(event) if event.source == self.tab => {}
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Storage change feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
