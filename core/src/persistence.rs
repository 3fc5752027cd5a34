//! Durable key-value storage for the session and the pending queue.
//!
//! ## File layout
//!
//! ```text
//! $SURVEY_HOME/state/
//!   session.json          Session
//!   pending-queue.json    [PendingItem]
//! ```
//!
//! Each key is written through a uniquely named temp file in the same
//! directory and renamed into place, so a reader sees either the previous
//! value or the new one. Writers take an in-process mutex and an exclusive
//! advisory lock on `.lock`, which serializes read-modify-write cycles across
//! threads and across processes sharing the directory.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicBool, Ordering};

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tempfile::NamedTempFile;

const LOCK_FILE: &str = ".lock";

/// Errors from the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Computes the next value of a key from its current one. `None` in means
/// the key is absent; `None` out removes it.
pub type UpdateFn<'a> = dyn FnMut(Option<Value>) -> Result<Option<Value>, StorageError> + 'a;

/// One JSON document per key. Writes are last-writer-wins.
pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Value>, StorageError>;

    fn save(&self, key: &str, value: &Value) -> Result<(), StorageError>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Read, transform and write `key` with no other writer in between.
    ///
    /// If `apply` fails nothing is written.
    fn update(&self, key: &str, apply: &mut UpdateFn<'_>) -> Result<(), StorageError>;
}

impl dyn KeyValueStore {
    /// Load and decode `key`, if present.
    pub fn load_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.load(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn save_as<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        self.save(key, &serde_json::to_value(value)?)
    }
}

/// File-backed store rooted at a data directory.
#[derive(Debug)]
pub struct FileStore {
    base_dir: PathBuf,
    writer: Mutex<()>,
}

/// Held for the duration of a write; the advisory lock is released when the
/// file handle drops.
struct WriteLock<'a> {
    _local: std::sync::MutexGuard<'a, ()>,
    _file: File,
}

impl FileStore {
    /// Create a store under `base_dir`, creating the directory if needed.
    pub fn with_base_dir(base_dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            writer: Mutex::new(()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.json"))
    }

    fn lock(&self) -> Result<WriteLock<'_>, StorageError> {
        let local = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.base_dir.join(LOCK_FILE))?;
        // Blocks while another writer holds the directory.
        file.lock_exclusive()?;
        Ok(WriteLock {
            _local: local,
            _file: file,
        })
    }

    fn read(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let data = match std::fs::read_to_string(self.key_path(key)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Write `value` to a fresh temp file beside the key and rename it over
    /// the key.
    fn write(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(value)?;
        let mut tmp = NamedTempFile::new_in(&self.base_dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.key_path(key)).map_err(|e| e.error)?;
        tracing::debug!(key, dir = %self.base_dir.display(), "persisted key");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.key_path(key)) {
            Ok(()) => {
                tracing::debug!(key, "removed key");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl KeyValueStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.read(key)
    }

    fn save(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let _lock = self.lock()?;
        self.write(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _lock = self.lock()?;
        self.delete(key)
    }

    fn update(&self, key: &str, apply: &mut UpdateFn<'_>) -> Result<(), StorageError> {
        let _lock = self.lock()?;
        match apply(self.read(key)?)? {
            Some(next) => self.write(key, &next),
            None => self.delete(key),
        }
    }
}

/// In-process store for tests and embedding hosts.
///
/// Writes can be made to fail with [`MemoryStore::fail_writes`] to exercise
/// storage-error paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `save`/`remove` calls fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: "writes disabled".to_string(),
            });
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn update(&self, key: &str, apply: &mut UpdateFn<'_>) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match apply(entries.get(key).cloned())? {
            Some(next) => entries.insert(key.to_string(), next),
            None => entries.remove(key),
        };
        Ok(())
    }
}
