//! Origins and tabs.
//!
//! An [`Origin`] is the unit of sharing: one token storage and one broadcast
//! channel. Every [`crate::SessionManager`] opened against the same origin
//! behaves like another browser tab of the same site.

use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use crate::events::{BroadcastBus, SessionEventBus};
use crate::storage::{FileBackend, SharedStorage};

/// Identifier of one tab within an origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabId(Uuid);

impl TabId {
    /// A fresh random tab id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Writer of changes made outside this process. Never a real tab, since
    /// tab ids are random.
    pub(crate) const fn external() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage and broadcast channel shared by a set of tabs.
#[derive(Clone)]
pub struct Origin {
    storage: SharedStorage,
    bus: Option<Arc<dyn SessionEventBus>>,
}

impl std::fmt::Debug for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Origin")
            .field("storage", &self.storage)
            .field("broadcast", &self.bus.is_some())
            .finish()
    }
}

impl Origin {
    /// Origin with the given storage and broadcast channel.
    #[must_use]
    pub fn new(storage: SharedStorage, bus: Arc<dyn SessionEventBus>) -> Self {
        Self {
            storage,
            bus: Some(bus),
        }
    }

    /// Origin without a broadcast channel; tabs sync through storage changes
    /// only.
    #[must_use]
    pub const fn without_broadcast(storage: SharedStorage) -> Self {
        Self { storage, bus: None }
    }

    /// In-memory storage plus a broadcast channel named `channel`.
    #[must_use]
    pub fn in_memory(channel: &str) -> Self {
        Self::new(SharedStorage::in_memory(), Arc::new(BroadcastBus::new(channel)))
    }

    /// File storage in `dir` plus a broadcast channel named `channel`.
    #[must_use]
    pub fn file(dir: impl AsRef<Path>, channel: &str) -> Self {
        Self::new(
            SharedStorage::new(FileBackend::new(dir)),
            Arc::new(BroadcastBus::new(channel)),
        )
    }

    #[must_use]
    pub const fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    #[must_use]
    pub fn bus(&self) -> Option<Arc<dyn SessionEventBus>> {
        self.bus.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tab_ids_are_unique() {
        assert_ne!(TabId::new(), TabId::new());
    }

    #[test]
    fn test_origin_debug_mentions_broadcast() {
        let origin = Origin::without_broadcast(SharedStorage::in_memory());
        assert!(format!("{origin:?}").contains("broadcast: false"));
    }
}
