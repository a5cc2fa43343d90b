//! In-memory storage for tests and ephemeral logs.

use crate::backend::StorageBackend;
use crate::directory::{validate_name, StorageDirectory};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

type SharedBytes = Arc<RwLock<Vec<u8>>>;

/// An in-memory byte store.
///
/// Handles opened from the same [`InMemoryDirectory`] entry share one buffer,
/// so a "reopen" observes everything appended before it. This is what lets
/// recovery be exercised without touching disk.
///
/// # Example
///
/// ```rust
/// use surelog_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: SharedBytes,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let current_size = data.len() as u64;

        if new_size > current_size {
            return Err(StorageError::truncate_past_end(new_size, current_size));
        }

        data.truncate(new_size as usize);
        Ok(())
    }
}

/// An in-memory [`StorageDirectory`].
///
/// Cloning the directory yields another handle onto the same entries.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDirectory {
    entries: Arc<RwLock<BTreeMap<String, SharedBytes>>>,
}

impl InMemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the named entry's bytes, if present.
    #[must_use]
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.entries.read().get(name).map(|bytes| bytes.read().clone())
    }

    /// Replaces the named entry's bytes, creating it if absent.
    ///
    /// Used by tests to plant damaged segments.
    pub fn put(&self, name: &str, bytes: Vec<u8>) {
        self.entries
            .write()
            .insert(name.to_string(), Arc::new(RwLock::new(bytes)));
    }
}

impl StorageDirectory for InMemoryDirectory {
    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        validate_name(name)?;
        let data = Arc::clone(self.entries.write().entry(name.to_string()).or_default());
        Ok(Box::new(InMemoryBackend { data }))
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        validate_name(name)?;
        Ok(self.entries.read().contains_key(name))
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        validate_name(from)?;
        validate_name(to)?;
        let mut entries = self.entries.write();
        if entries.contains_key(to) {
            return Err(StorageError::already_exists(to));
        }
        let data = entries
            .remove(from)
            .ok_or_else(|| StorageError::not_found(from))?;
        entries.insert(to.to_string(), data);
        Ok(())
    }

    fn remove(&self, name: &str) -> StorageResult<()> {
        validate_name(name)?;
        self.entries
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(name))
    }

    fn locate(&self, name: &str) -> String {
        format!("memory:{name}")
    }
}
