//! Process-local storage backend.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::{StorageBackend, StorageError, StorageKey};

/// In-memory storage, shared by every tab holding the same [`super::SharedStorage`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<StorageKey, String>>,
}

impl MemoryBackend {
    /// Backend pre-populated with `entries`.
    #[must_use]
    pub fn with_entries<I, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (StorageKey, V)>,
        V: Into<String>,
    {
        Self {
            entries: RwLock::new(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, value.into()))
                    .collect(),
            ),
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(&key).cloned())
    }

    fn write(&self, key: StorageKey, value: Option<&str>) -> Result<(), StorageError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match value {
            Some(value) => {
                entries.insert(key, value.to_owned());
            }
            None => {
                entries.remove(&key);
            }
        }
        Ok(())
    }
}
