//! Storage backends for the state document.
//!
//! A backend stores one opaque byte blob. Writes must not return until the
//! bytes survive a crash: a write that returned `Ok` is committed.
//! `write_if_unchanged` is the compare-and-swap the store commits through;
//! it must be atomic against every other writer of the same storage.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("State document is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("State document kept changing; gave up after {attempts} attempts")]
    Conflict { attempts: u32 },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Byte-level persistence for the state document
pub trait StateBackend: Send + Sync {
    /// Current contents, or `None` if nothing was ever written
    fn read(&self) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the contents and flush them to durable storage
    fn write_durable(&self, bytes: &[u8]) -> Result<(), StoreError>;

    /// Write `bytes` only if the contents still equal `expected`
    /// (`None`: nothing written yet). Returns false, writing nothing, when
    /// another writer got there first.
    fn write_if_unchanged(&self, expected: Option<&[u8]>, bytes: &[u8]) -> Result<bool, StoreError>;
}

/// Shared backends, so a caller can keep a handle to the one the store owns
impl<B: StateBackend + ?Sized> StateBackend for Arc<B> {
    fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).read()
    }

    fn write_durable(&self, bytes: &[u8]) -> Result<(), StoreError> {
        (**self).write_durable(bytes)
    }

    fn write_if_unchanged(&self, expected: Option<&[u8]>, bytes: &[u8]) -> Result<bool, StoreError> {
        (**self).write_if_unchanged(expected, bytes)
    }
}

/// Single JSON file written with write-to-temp, fsync, rename
///
/// Writers take an exclusive advisory lock on a sibling `<name>.wlock` file,
/// so stores in different processes sharing one path serialize their
/// commits. Readers never lock; the rename keeps every read whole.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    fn write_lock_path(&self) -> PathBuf {
        self.sibling(".wlock")
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    /// Block until this process holds the write lock; released on drop
    fn lock_writes(&self) -> Result<File, StoreError> {
        let path = self.write_lock_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        file.lock_exclusive().map_err(|e| StoreError::io(&path, e))?;
        Ok(file)
    }
}

impl StateBackend for FileBackend {
    fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    fn write_durable(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let _lock = self.lock_writes()?;
        write_file_durable(&self.path, &self.tmp_path(), bytes)
    }

    fn write_if_unchanged(&self, expected: Option<&[u8]>, bytes: &[u8]) -> Result<bool, StoreError> {
        let _lock = self.lock_writes()?;
        if self.read()?.as_deref() != expected {
            return Ok(false);
        }
        write_file_durable(&self.path, &self.tmp_path(), bytes)?;
        Ok(true)
    }
}

/// Write `bytes` to `tmp`, fsync, rename over `path`, fsync the directory
pub(crate) fn write_file_durable(path: &Path, tmp: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(tmp)
        .map_err(|e| StoreError::io(tmp, e))?;
    file.write_all(bytes).map_err(|e| StoreError::io(tmp, e))?;
    file.sync_all().map_err(|e| StoreError::io(tmp, e))?;
    drop(file);

    fs::rename(tmp, path).map_err(|e| StoreError::io(path, e))?;

    // Persist the rename itself. Directories cannot be opened on every
    // platform; the file contents are already durable in that case.
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// In-memory backend with write-failure injection
///
/// Testing helper, also handy for dry runs that must not touch disk.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    bytes: Mutex<Option<Vec<u8>>>,
    failing_writes: AtomicU32,
    writes: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail without changing the contents
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of successful writes
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Overwrite the raw contents, bypassing the store
    pub fn put_raw(&self, bytes: Vec<u8>) {
        *self.bytes.lock().unwrap_or_else(|e| e.into_inner()) = Some(bytes);
    }
}

impl StateBackend for MemoryBackend {
    fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.bytes.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn write_durable(&self, bytes: &[u8]) -> Result<(), StoreError> {
        self.write_if(|_| true, bytes).map(|_| ())
    }

    fn write_if_unchanged(&self, expected: Option<&[u8]>, bytes: &[u8]) -> Result<bool, StoreError> {
        self.write_if(|current| current == expected, bytes)
    }
}

impl MemoryBackend {
    fn write_if(&self, unchanged: impl FnOnce(Option<&[u8]>) -> bool, bytes: &[u8]) -> Result<bool, StoreError> {
        let failing = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        let mut stored = self.bytes.lock().unwrap_or_else(|e| e.into_inner());
        if !unchanged(stored.as_deref()) {
            return Ok(false);
        }
        *stored = Some(bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_backend_missing_file_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("state.json"));
        assert!(backend.read().unwrap().is_none());
    }

    #[test]
    fn test_file_backend_replaces_contents_and_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("nested").join("state.json"));

        backend.write_durable(b"one").unwrap();
        backend.write_durable(b"two").unwrap();

        assert_eq!(backend.read().unwrap().unwrap(), b"two");
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());
    }

    #[test]
    fn test_file_backend_refuses_stale_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let first = FileBackend::new(&path);
        let second = FileBackend::new(&path);

        assert!(first.write_if_unchanged(None, b"one").unwrap());
        assert!(second.write_if_unchanged(Some(&b"one"[..]), b"two").unwrap());

        assert!(!first.write_if_unchanged(Some(&b"one"[..]), b"three").unwrap());
        assert!(!first.write_if_unchanged(None, b"three").unwrap());
        assert_eq!(first.read().unwrap().unwrap(), b"two");
    }

    #[test]
    fn test_memory_backend_compares_before_writing() {
        let backend = MemoryBackend::new();
        assert!(backend.write_if_unchanged(None, b"one").unwrap());
        assert!(!backend.write_if_unchanged(None, b"two").unwrap());
        assert!(backend.write_if_unchanged(Some(&b"one"[..]), b"two").unwrap());

        assert_eq!(backend.read().unwrap().unwrap(), b"two");
        assert_eq!(backend.write_count(), 2);
    }

    #[test]
    fn test_memory_backend_injected_failure_keeps_old_contents() {
        let backend = MemoryBackend::new();
        backend.write_durable(b"old").unwrap();
        backend.fail_next_writes(1);

        assert!(backend.write_durable(b"new").is_err());
        assert_eq!(backend.read().unwrap().unwrap(), b"old");
        backend.write_durable(b"new").unwrap();
        assert_eq!(backend.write_count(), 2);
    }
}
