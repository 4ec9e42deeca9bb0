//! Single-instance lock
//!
//! At most one scheduler may drive a given state document: two would run the
//! pipeline twice for the same cycle. The lock is a file created with
//! `create_new`, so acquisition is atomic on the filesystem, and it records
//! who holds it. The file is removed when the guard drops.
//!
//! A process that crashes leaves the file behind. Operators clear it with
//! [`InstanceLock::force_release`] after confirming the old process is gone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("State lock {path} is already held by {holder}")]
    AlreadyHeld { path: String, holder: String },

    #[error("Lock I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Contents of the lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub instance_id: Uuid,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

/// Held lock; released on drop
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    info: LockInfo,
}

impl InstanceLock {
    /// Take the lock at `path`, failing if another instance holds it
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();
        let io_err = |source| LockError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(LockError::AlreadyHeld {
                    path: path.display().to_string(),
                    holder: describe_holder(&path),
                });
            }
            Err(e) => return Err(io_err(e)),
        };

        let info = LockInfo {
            instance_id: Uuid::new_v4(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&info).unwrap_or_default();
        file.write_all(&bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;

        info!(path = %path.display(), instance = %info.instance_id, "instance lock acquired");
        Ok(Self { path, info })
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove a lock left behind by a crashed instance
    pub fn force_release(path: impl AsRef<Path>) -> Result<bool, LockError> {
        let path = path.as_ref();
        match fs::remove_file(path) {
            Ok(()) => {
                warn!(path = %path.display(), "instance lock force-released");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(LockError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Read the holder of a lock file, if any
    pub fn holder(path: impl AsRef<Path>) -> Option<LockInfo> {
        let bytes = fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // Only remove the file if it is still ours (not force-released and
        // re-acquired by someone else).
        let ours = Self::holder(&self.path)
            .map(|h| h.instance_id == self.info.instance_id)
            .unwrap_or(false);
        if ours {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to release instance lock");
            }
        }
    }
}

fn describe_holder(path: &Path) -> String {
    match InstanceLock::holder(path) {
        Some(h) => format!("instance {} (pid {}) since {}", h.instance_id, h.pid, h.acquired_at),
        None => "an unknown instance".to_string(),
    }
}
