//! Crash simulation for surelog.
//!
//! This module provides utilities for testing recovery behavior: damaging
//! segment files the way a crash would, building segment files by hand,
//! and storage that fails on command.
//!
//! ## Test Strategy
//!
//! 1. **Torn tail** - A record cut short by a crash mid-append
//! 2. **Garbage tail** - Bytes that were never a record
//! 3. **Failed append** - Storage errors while a record is written
//! 4. **Failed sync** - Data written but not known to be durable
//!
//! ## Usage
//!
//! ```rust,ignore
//! use surelog_testkit::crash::{truncate_by, SegmentFile};
//!
//! SegmentFile::parcels()
//!     .begin(1, &Parcel::new(1, "north"))
//!     .write_to(&dir.join("part.current"));
//! truncate_by(&dir.join("part.current"), 3);
//! ```

use crate::fixtures::{parcel_codec, Parcel, PARCEL_DESCRIPTOR};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use surelog_core::wal::{encode_begin, encode_commit, Header};
use surelog_core::EventId;
use surelog_storage::{StorageBackend, StorageDirectory, StorageError, StorageResult};

/// Cuts the last `bytes` bytes off a file.
pub fn truncate_by(path: &Path, bytes: u64) {
    let len = file_len(path);
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .expect("Failed to open file for truncation");
    file.set_len(len.saturating_sub(bytes))
        .expect("Failed to truncate file");
}

/// Appends raw bytes to a file.
pub fn append_garbage(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .expect("Failed to open file for append");
    file.write_all(bytes).expect("Failed to append garbage");
}

/// Returns the size of a file.
pub fn file_len(path: &Path) -> u64 {
    fs::metadata(path).expect("Failed to stat file").len()
}

/// Builds segment files byte by byte.
pub struct SegmentFile {
    bytes: Vec<u8>,
}

impl SegmentFile {
    /// Starts a segment with a header naming `descriptor`.
    pub fn new(descriptor: &str) -> Self {
        let mut bytes = Vec::new();
        Header::new(descriptor)
            .encode(&mut bytes)
            .expect("Failed to encode header");
        Self { bytes }
    }

    /// Starts a segment for [`Parcel`] events.
    pub fn parcels() -> Self {
        Self::new(PARCEL_DESCRIPTOR)
    }

    /// Appends a BEGIN record.
    pub fn begin(mut self, id: u32, parcel: &Parcel) -> Self {
        encode_begin(EventId::new(id), parcel, &parcel_codec(), &mut self.bytes)
            .expect("Failed to encode BEGIN");
        self
    }

    /// Appends a COMMIT record.
    pub fn commit(mut self, id: u32) -> Self {
        encode_commit(EventId::new(id), &mut self.bytes);
        self
    }

    /// Current length in bytes.
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Returns `true` if nothing, not even a header, has been written.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns the bytes built so far.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Writes the segment to `path`, replacing any existing file.
    pub fn write_to(self, path: &Path) {
        fs::write(path, &self.bytes).expect("Failed to write segment file");
    }
}

/// Switches for the faults a [`FailingDirectory`] injects.
///
/// Shared between the directory and every backend it opened.
#[derive(Debug, Default)]
pub struct Faults {
    fail_appends: AtomicBool,
    fail_syncs: AtomicBool,
    fail_renames: AtomicBool,
    injected: AtomicUsize,
}

impl Faults {
    /// Makes appends write half their bytes and then fail.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Makes syncs fail.
    pub fn fail_syncs(&self, fail: bool) {
        self.fail_syncs.store(fail, Ordering::SeqCst);
    }

    /// Makes renames fail.
    pub fn fail_renames(&self, fail: bool) {
        self.fail_renames.store(fail, Ordering::SeqCst);
    }

    /// Turns every fault off.
    pub fn heal(&self) {
        self.fail_appends(false);
        self.fail_syncs(false);
        self.fail_renames(false);
    }

    /// Number of faults injected so far.
    pub fn injected(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    fn trip(&self, flag: &AtomicBool, what: &str) -> StorageResult<()> {
        if flag.load(Ordering::SeqCst) {
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("injected {what} failure"),
            )));
        }
        Ok(())
    }
}

/// A directory that wraps another and fails on command.
#[derive(Clone)]
pub struct FailingDirectory {
    inner: Arc<dyn StorageDirectory>,
    faults: Arc<Faults>,
}

impl FailingDirectory {
    /// Wraps `inner` with every fault switched off.
    pub fn new(inner: impl StorageDirectory + 'static) -> Self {
        Self {
            inner: Arc::new(inner),
            faults: Arc::new(Faults::default()),
        }
    }

    /// Returns the fault switches.
    pub fn faults(&self) -> Arc<Faults> {
        Arc::clone(&self.faults)
    }
}

impl fmt::Debug for FailingDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailingDirectory")
            .field("inner", &self.inner)
            .field("faults", &self.faults)
            .finish()
    }
}

impl StorageDirectory for FailingDirectory {
    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        Ok(Box::new(FailingBackend {
            inner: self.inner.open(name)?,
            faults: Arc::clone(&self.faults),
        }))
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        self.inner.exists(name)
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        self.inner.list()
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        self.faults.trip(&self.faults.fail_renames, "rename")?;
        self.inner.rename(from, to)
    }

    fn remove(&self, name: &str) -> StorageResult<()> {
        self.inner.remove(name)
    }

    fn locate(&self, name: &str) -> String {
        self.inner.locate(name)
    }
}

struct FailingBackend {
    inner: Box<dyn StorageBackend>,
    faults: Arc<Faults>,
}

impl StorageBackend for FailingBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.faults.fail_appends.load(Ordering::SeqCst) {
            self.inner.append(&data[..data.len() / 2])?;
            self.faults.trip(&self.faults.fail_appends, "append")?;
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.faults.trip(&self.faults.fail_syncs, "sync")?;
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}
