//! File-based storage for persistent logs.

use crate::backend::StorageBackend;
use crate::directory::{validate_name, StorageDirectory};
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A single file opened for reading and appending.
///
/// # Durability
///
/// - `flush()` pushes buffered data to the OS
/// - `sync()` calls `File::sync_all()` so data and size are on disk
///
/// # Example
///
/// ```no_run
/// use surelog_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("part.current")).unwrap();
/// backend.append(b"persistent data").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    size: u64,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = self.size;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.size;
        if data.is_empty() {
            return Ok(offset);
        }

        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        self.size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.get_mut().flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size)
    }

    fn sync(&mut self) -> StorageResult<()> {
        let file = self.file.get_mut();
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if new_size > self.size {
            return Err(StorageError::truncate_past_end(new_size, self.size));
        }

        let file = self.file.get_mut();
        file.set_len(new_size)?;
        file.sync_all()?;
        self.size = new_size;

        Ok(())
    }
}

/// A directory of [`FileBackend`]s on the local file system.
///
/// Renames and removals are followed by a directory fsync so that the
/// change of name survives a crash.
#[derive(Debug, Clone)]
pub struct FileDirectory {
    root: PathBuf,
}

impl FileDirectory {
    /// Opens a directory, creating it (and its parents) when
    /// `create_if_missing` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is absent and may not be created,
    /// if the path is not a directory, or on I/O failure.
    pub fn open(root: impl AsRef<Path>, create_if_missing: bool) -> StorageResult<Self> {
        let root = root.as_ref();
        if !root.exists() {
            if !create_if_missing {
                return Err(StorageError::MissingDirectory {
                    path: root.display().to_string(),
                });
            }
            fs::create_dir_all(root)?;
            debug!(dir = %root.display(), "created log directory");
        }

        if !root.is_dir() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path is not a directory: {}", root.display()),
            )));
        }

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Returns the directory root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the full path of a named entry.
    #[must_use]
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Syncs the directory so renames, creations and removals are durable.
    ///
    /// Windows NTFS journals metadata updates and does not support
    /// directory fsync, so this is a no-op there.
    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        File::open(&self.root)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl StorageDirectory for FileDirectory {
    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        validate_name(name)?;
        let path = self.path_of(name);
        let created = !path.exists();
        let backend = FileBackend::open(&path)?;
        if created {
            self.sync_directory()?;
        }
        Ok(Box::new(backend))
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        validate_name(name)?;
        Ok(self.path_of(name).is_file())
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        validate_name(from)?;
        validate_name(to)?;
        let source = self.path_of(from);
        let target = self.path_of(to);
        if !source.is_file() {
            return Err(StorageError::not_found(from));
        }
        if target.exists() {
            return Err(StorageError::already_exists(to));
        }
        fs::rename(&source, &target)?;
        self.sync_directory()
    }

    fn remove(&self, name: &str) -> StorageResult<()> {
        validate_name(name)?;
        match fs::remove_file(self.path_of(name)) {
            Ok(()) => self.sync_directory(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::not_found(name)),
            Err(e) => Err(e.into()),
        }
    }

    fn locate(&self, name: &str) -> String {
        self.path_of(name).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("part.current");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn file_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("part.current");

        let mut backend = FileBackend::open(&path).unwrap();

        let offset1 = backend.append(b"hello").unwrap();
        assert_eq!(offset1, 0);

        let offset2 = backend.append(b" world").unwrap();
        assert_eq!(offset2, 5);

        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(backend.read_all().unwrap(), b"hello world");
        assert_eq!(backend.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("part.0")).unwrap();
        backend.append(b"hello").unwrap();

        let result = backend.read_at(3, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("part.current");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"persistent data").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 15);
        assert_eq!(backend.read_at(0, 15).unwrap(), b"persistent data");
    }

    #[test]
    fn file_truncate_then_append_overwrites_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("part.current");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"hello garbage").unwrap();
        backend.truncate(5).unwrap();
        backend.append(b"!").unwrap();
        backend.sync().unwrap();

        let reopened = FileBackend::open(&path).unwrap();
        assert_eq!(reopened.read_all().unwrap(), b"hello!");
    }

    #[test]
    fn file_truncate_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("part.0")).unwrap();
        backend.append(b"abc").unwrap();
        assert!(backend.truncate(10).is_err());
    }

    #[test]
    fn directory_created_when_missing() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("nested").join("log");

        assert!(matches!(
            FileDirectory::open(&root, false),
            Err(StorageError::MissingDirectory { .. })
        ));

        let directory = FileDirectory::open(&root, true).unwrap();
        assert!(root.is_dir());
        assert!(directory.list().unwrap().is_empty());
    }

    #[test]
    fn directory_open_list_rename_remove() {
        let dir = tempdir().unwrap();
        let directory = FileDirectory::open(dir.path(), true).unwrap();

        let mut backend = directory.open("part.current").unwrap();
        backend.append(b"data").unwrap();
        backend.sync().unwrap();
        drop(backend);
        directory.open("part.0").unwrap();

        assert_eq!(directory.list().unwrap(), vec!["part.0", "part.current"]);

        directory.rename("part.current", "part.1").unwrap();
        assert!(!directory.exists("part.current").unwrap());
        assert_eq!(directory.open("part.1").unwrap().read_all().unwrap(), b"data");

        directory.remove("part.0").unwrap();
        assert_eq!(directory.list().unwrap(), vec!["part.1"]);
    }

    #[test]
    fn directory_rename_never_overwrites() {
        let dir = tempdir().unwrap();
        let directory = FileDirectory::open(dir.path(), true).unwrap();
        directory.open("part.0").unwrap();
        directory.open("part.1").unwrap();

        assert!(matches!(
            directory.rename("part.0", "part.1"),
            Err(StorageError::AlreadyExists { .. })
        ));
        assert!(matches!(
            directory.rename("part.7", "part.8"),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn directory_remove_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let directory = FileDirectory::open(dir.path(), true).unwrap();
        assert!(matches!(
            directory.remove("part.3"),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn directory_list_skips_subdirectories() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let directory = FileDirectory::open(dir.path(), true).unwrap();
        directory.open("part.current").unwrap();
        assert_eq!(directory.list().unwrap(), vec!["part.current"]);
    }

    #[test]
    fn directory_locate_is_full_path() {
        let dir = tempdir().unwrap();
        let directory = FileDirectory::open(dir.path(), true).unwrap();
        assert_eq!(
            directory.locate("part.2"),
            dir.path().join("part.2").display().to_string()
        );
    }
}
