//! Consumer-side change detection cursor
//!
//! A downstream consumer (a notifier, say) polls the distribution
//! fingerprint and must not announce the same distribution twice, even when
//! it restarts on its own schedule. It keeps the last fingerprint it acted
//! on in its own file, written durably before `observe` reports a change.

use crate::store::backend::{write_file_durable, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorRecord {
    fingerprint: String,
    seen_at: DateTime<Utc>,
}

/// Durable "last seen fingerprint" owned by one consumer
#[derive(Debug)]
pub struct ConsumerCursor {
    path: PathBuf,
    last: Option<String>,
}

impl ConsumerCursor {
    /// Open (or start) the cursor stored at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let last = match fs::read(&path) {
            Ok(bytes) => Some(serde_json::from_slice::<CursorRecord>(&bytes)?.fingerprint),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        Ok(Self { path, last })
    }

    pub fn last_seen(&self) -> Option<&str> {
        self.last.as_deref()
    }

    /// Compare `fingerprint` with the stored one
    ///
    /// Returns `true` when it differs; the new value is persisted before
    /// returning so a crash right after cannot replay the notification.
    pub fn observe(&mut self, fingerprint: &str) -> Result<bool, StoreError> {
        if self.last.as_deref() == Some(fingerprint) {
            return Ok(false);
        }

        let record = CursorRecord {
            fingerprint: fingerprint.to_string(),
            seen_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&record)?;
        let tmp = self.path.with_extension("tmp");
        write_file_durable(&self.path, &tmp, &bytes)?;

        self.last = Some(record.fingerprint);
        Ok(true)
    }
}
