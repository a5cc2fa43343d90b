//! Storage directory trait definition.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use std::fmt;

/// A flat, named collection of [`StorageBackend`]s rooted at one location.
///
/// The write-ahead log keeps every segment of one log in a single directory.
/// Directories are shared between the writers, the rotation timer and the
/// retry worker, so implementations must be `Send + Sync`.
///
/// # Invariants
///
/// - `open` creates an empty entry when the name is absent
/// - `rename` is atomic and never overwrites an existing entry
/// - `list` returns every entry name exactly once, sorted
pub trait StorageDirectory: Send + Sync + fmt::Debug {
    /// Opens the named entry for reading and appending, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the entry cannot be opened.
    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>>;

    /// Returns whether the named entry exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be queried.
    fn exists(&self, name: &str) -> StorageResult<bool>;

    /// Lists the names of all entries, sorted lexicographically.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    fn list(&self) -> StorageResult<Vec<String>>;

    /// Atomically renames `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if `from` is absent and
    /// [`StorageError::AlreadyExists`] if `to` is present.
    fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Removes the named entry.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the entry is absent.
    fn remove(&self, name: &str) -> StorageResult<()>;

    /// Returns a human-readable location for the named entry (a path or URI).
    fn locate(&self, name: &str) -> String;
}

/// Rejects names that would escape a flat directory.
pub(crate) fn validate_name(name: &str) -> StorageResult<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(StorageError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}
