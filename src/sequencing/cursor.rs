//! # Durable Cursor Store
//!
//! Persisted position of the last acknowledged event per subscription. The
//! cursor is the only state shared between a producer and its own restarts, and
//! the only state requiring read-modify-write discipline: every advance is a
//! compare-and-set against the value the writer last observed.

use crate::error::SequencerError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("cursor I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cursor at {path} is unreadable: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl CursorError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<CursorError> for SequencerError {
    fn from(err: CursorError) -> Self {
        match err {
            // An unreadable cursor is indistinguishable from a lost one
            CursorError::Corrupt { path, reason } => SequencerError::SequenceGap {
                subscription: path.display().to_string(),
                reason,
            },
            CursorError::Io { .. } => SequencerError::CursorStore(err.to_string()),
        }
    }
}

/// Storage contract for subscription cursors.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn CursorStore>`.
/// Calls may block on I/O; the producer never holds its state lock across
/// `compare_and_set` on the acknowledgment path.
pub trait CursorStore: Send + Sync {
    /// Read the last acknowledged sequence. `Ok(None)` when nothing was ever acknowledged.
    fn load(&self, subscription: &str) -> Result<Option<u64>, CursorError>;

    /// Atomically set the cursor to `new_value` only if it currently equals `expected`.
    ///
    /// When `expected` is `None`, succeeds only if no cursor exists yet. Returns
    /// `false` when the stored value did not match.
    fn compare_and_set(
        &self,
        subscription: &str,
        expected: Option<u64>,
        new_value: u64,
    ) -> Result<bool, CursorError>;
}

/// Process-local store. Survives producer restarts within one process only.
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: Mutex<HashMap<String, u64>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a subscription's cursor, as if its storage were lost
    pub fn forget(&self, subscription: &str) {
        self.cursors.lock().remove(subscription);
    }
}

impl CursorStore for InMemoryCursorStore {
    fn load(&self, subscription: &str) -> Result<Option<u64>, CursorError> {
        Ok(self.cursors.lock().get(subscription).copied())
    }

    fn compare_and_set(
        &self,
        subscription: &str,
        expected: Option<u64>,
        new_value: u64,
    ) -> Result<bool, CursorError> {
        let mut cursors = self.cursors.lock();
        if cursors.get(subscription).copied() != expected {
            return Ok(false);
        }
        cursors.insert(subscription.to_string(), new_value);
        Ok(true)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorRecord {
    subscription: String,
    sequence: u64,
    updated_at: DateTime<Utc>,
}

/// One JSON file per subscription under a directory.
///
/// Writes go to a temporary file first and are renamed into place, so a crash
/// mid-write leaves the previous cursor intact.
#[derive(Debug)]
pub struct FileCursorStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCursorStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CursorError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| CursorError::io(&dir, e))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path_for(&self, subscription: &str) -> PathBuf {
        let file_name: String = subscription
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.cursor.json"))
    }

    fn read(&self, subscription: &str) -> Result<Option<u64>, CursorError> {
        let path = self.path_for(subscription);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CursorError::io(&path, e)),
        };

        let record: CursorRecord =
            serde_json::from_str(&contents).map_err(|e| CursorError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if record.subscription != subscription {
            return Err(CursorError::Corrupt {
                path,
                reason: format!(
                    "file belongs to subscription '{}', not '{subscription}'",
                    record.subscription
                ),
            });
        }
        Ok(Some(record.sequence))
    }

    fn write(&self, subscription: &str, sequence: u64) -> Result<(), CursorError> {
        let path = self.path_for(subscription);
        let tmp = path.with_extension("json.tmp");
        let record = CursorRecord {
            subscription: subscription.to_string(),
            sequence,
            updated_at: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&record).map_err(|e| CursorError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        fs::write(&tmp, body).map_err(|e| CursorError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| CursorError::io(&path, e))
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self, subscription: &str) -> Result<Option<u64>, CursorError> {
        self.read(subscription)
    }

    fn compare_and_set(
        &self,
        subscription: &str,
        expected: Option<u64>,
        new_value: u64,
    ) -> Result<bool, CursorError> {
        let _guard = self.write_lock.lock();
        if self.read(subscription)? != expected {
            return Ok(false);
        }
        self.write(subscription, new_value)?;
        Ok(true)
    }
}
