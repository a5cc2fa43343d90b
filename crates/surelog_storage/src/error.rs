//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// No entry with the given name exists in the directory.
    #[error("no such entry: {name}")]
    NotFound {
        /// The missing entry name.
        name: String,
    },

    /// A rename target already exists.
    #[error("entry already exists: {name}")]
    AlreadyExists {
        /// The conflicting entry name.
        name: String,
    },

    /// The entry name is not a plain file name.
    #[error("invalid entry name: {name:?}")]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// The directory does not exist and was not created.
    #[error("directory does not exist: {path}")]
    MissingDirectory {
        /// The directory path.
        path: String,
    },
}

impl StorageError {
    /// Creates a not-found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates an already-exists error.
    pub fn already_exists(name: impl Into<String>) -> Self {
        Self::AlreadyExists { name: name.into() }
    }

    pub(crate) fn truncate_past_end(new_size: u64, size: u64) -> Self {
        Self::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "cannot truncate to size {} which is greater than current size {}",
                new_size, size
            ),
        ))
    }
}
