//! Per-device blob storage.
//!
//! The replica is persisted as a single named blob. Two backends exist: a
//! directory on disk (one file per key, replaced atomically) and an
//! in-memory map for tests.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

/// Device storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Get/set access to named blobs on the device.
pub trait DeviceStorage: Send + Sync {
    /// Read a blob. `Ok(None)` means the key was never written.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the blob exists but cannot be read.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write a blob, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the blob cannot be written.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;
}

/// Blobs stored as files under one directory.
#[derive(Debug, Clone)]
pub struct FileDeviceStorage {
    dir: PathBuf,
}

impl FileDeviceStorage {
    /// Use `dir` for storage. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl DeviceStorage for FileDeviceStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)?;
        atomic_write(&path, value)
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(tmp, path)?;
    Ok(())
}

/// In-memory blobs with switchable failures.
#[derive(Debug, Default)]
pub struct MemoryDeviceStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryDeviceStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `get` fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `set` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Whether `key` has ever been written.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

impl DeviceStorage for MemoryDeviceStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("reads disabled".to_string()));
        }
        Ok(self
            .blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("writes disabled".to_string()));
        }
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileDeviceStorage::new(dir.path().join("nested"));

        assert!(storage.get("snapshot").unwrap().is_none());
        storage.set("snapshot", b"{\"v\":1}").unwrap();
        storage.set("snapshot", b"{\"v\":2}").unwrap();
        assert_eq!(storage.get("snapshot").unwrap().unwrap(), b"{\"v\":2}");
        assert!(!dir.path().join("nested/snapshot.tmp").exists());
    }

    #[test]
    fn test_file_storage_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileDeviceStorage::new(dir.path());
        assert!(matches!(
            storage.set("../escape", b"x"),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_memory_storage_failure_switches() {
        let storage = MemoryDeviceStorage::new();
        storage.set("snapshot", b"data").unwrap();

        storage.set_fail_reads(true);
        assert!(storage.get("snapshot").is_err());
        storage.set_fail_reads(false);
        assert_eq!(storage.get("snapshot").unwrap().unwrap(), b"data");

        storage.set_fail_writes(true);
        assert!(storage.set("snapshot", b"other").is_err());
        assert_eq!(storage.get("snapshot").unwrap().unwrap(), b"data");
    }
}
