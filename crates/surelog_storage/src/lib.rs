//! # surelog storage
//!
//! Storage collaborators for the surelog write-ahead log.
//!
//! Two layers are provided:
//!
//! - [`StorageBackend`]: a single **opaque, append-only byte store** (one
//!   segment file). It reads, appends, syncs and truncates bytes and knows
//!   nothing about records or headers.
//! - [`StorageDirectory`]: a flat, named collection of backends (the log
//!   directory). It opens, lists, renames and removes entries.
//!
//! surelog owns all format interpretation; the backends stay dumb.
//!
//! ## Available Implementations
//!
//! - [`FileBackend`] / [`FileDirectory`] - persistent storage via OS file APIs
//! - [`InMemoryBackend`] / [`InMemoryDirectory`] - for tests and ephemeral logs
//!
//! ## Example
//!
//! ```rust
//! use surelog_storage::{InMemoryDirectory, StorageDirectory};
//!
//! let dir = InMemoryDirectory::new();
//! let mut segment = dir.open("part.current").unwrap();
//! segment.append(b"hello world").unwrap();
//! segment.sync().unwrap();
//!
//! let reopened = dir.open("part.current").unwrap();
//! assert_eq!(reopened.read_at(0, 11).unwrap(), b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod directory;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use directory::StorageDirectory;
pub use error::{StorageError, StorageResult};
pub use file::{FileBackend, FileDirectory};
pub use memory::{InMemoryBackend, InMemoryDirectory};
