//! File-backed storage: the whole token map as one JSON document.
//!
//! Each write goes to its own temporary file in the same directory, which is
//! then renamed over `session.json`. A crash mid-write leaves the previous
//! document intact and concurrent writers never share a temporary file. The
//! temporary file is created owner-only (`0600` on Unix), so the document is
//! too.
//!
//! Other processes may write the same directory; see
//! [`StorageBackend::shared_across_processes`].

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tempfile::NamedTempFile;

use super::{StorageBackend, StorageError, StorageKey};

const FILE_NAME: &str = "session.json";

/// Durable storage in `<dir>/session.json`.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileBackend {
    /// Backend storing its document in `dir`. The directory is created on
    /// first write.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(FILE_NAME),
            lock: Mutex::new(()),
        }
    }

    /// Location of the session document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<StorageKey, String>, StorageError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, entries: &BTreeMap<StorageKey, String>) -> Result<(), StorageError> {
        let dir = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&serde_json::to_vec_pretty(entries)?)?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.remove(&key))
    }

    fn write(&self, key: StorageKey, value: Option<&str>) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut entries, reset) = match self.load() {
            Ok(entries) => (entries, false),
            // A removal starts over rather than leaving the session stuck
            Err(StorageError::Corrupt(err)) if value.is_none() => {
                tracing::warn!(error = %err, path = %self.path.display(), "Discarding corrupt session file");
                (BTreeMap::new(), true)
            }
            Err(err) => return Err(err),
        };
        match value {
            Some(value) => {
                entries.insert(key, value.to_owned());
            }
            None => {
                if entries.remove(&key).is_none() && !reset {
                    return Ok(());
                }
            }
        }
        self.save(&entries)
    }

    fn shared_across_processes(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("nested"));
        assert_eq!(backend.read(StorageKey::AccessToken).unwrap(), None);
        // Removing from an empty store does not create the file
        backend.write(StorageKey::AccessToken, None).unwrap();
        assert!(!backend.path().exists());
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        FileBackend::new(dir.path())
            .write(StorageKey::RefreshToken, Some("rt1"))
            .unwrap();

        let reopened = FileBackend::new(dir.path());
        assert_eq!(
            reopened.read(StorageKey::RefreshToken).unwrap().as_deref(),
            Some("rt1")
        );

        let document: serde_json::Value =
            serde_json::from_slice(&fs::read(reopened.path()).unwrap()).unwrap();
        assert_eq!(document["refresh_token"], "rt1");
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        fs::write(backend.path(), b"{not json").unwrap();
        assert!(matches!(
            backend.read(StorageKey::AccessToken),
            Err(StorageError::Corrupt(_))
        ));
        assert!(matches!(
            backend.write(StorageKey::AccessToken, Some("at1")),
            Err(StorageError::Corrupt(_))
        ));
    }

    #[test]
    fn test_removal_resets_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        fs::write(backend.path(), b"{not json").unwrap();

        backend.write(StorageKey::AccessToken, None).unwrap();
        assert_eq!(backend.read(StorageKey::AccessToken).unwrap(), None);
        backend.write(StorageKey::RefreshToken, Some("rt1")).unwrap();
        assert_eq!(
            backend.read(StorageKey::RefreshToken).unwrap().as_deref(),
            Some("rt1")
        );
    }

    #[test]
    fn test_concurrent_writers_leave_a_valid_document() {
        let dir = tempfile::tempdir().unwrap();
        // One backend per writer, as separate processes would have
        let writers: Vec<_> = (0..8)
            .map(|n| {
                let dir = dir.path().to_path_buf();
                std::thread::spawn(move || {
                    let backend = FileBackend::new(dir);
                    for round in 0..20 {
                        backend
                            .write(StorageKey::AccessToken, Some(&format!("at-{n}-{round}")))
                            .unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let backend = FileBackend::new(dir.path());
        assert!(backend.read(StorageKey::AccessToken).unwrap().is_some());
        // No temporary files are left behind
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        backend.write(StorageKey::AccessToken, Some("at1")).unwrap();
        let mode = fs::metadata(backend.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
