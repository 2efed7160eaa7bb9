//! File system boundary
//!
//! The check only ever asks two questions of the file system: does a file
//! exist, and when was it last written. Everything else is derived from the
//! project state.

use crate::error::{FutdError, FutdResult};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Read-only view of the file system used by the check.
pub trait FileSystem: Send + Sync {
    /// Last write time of `path` in UTC, or `None` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns `FutdError::Io` when the file exists but its metadata cannot be read.
    fn last_write_time_utc(&self, path: &Path) -> FutdResult<Option<DateTime<Utc>>>;

    /// Whether `path` exists.
    ///
    /// # Errors
    ///
    /// Returns `FutdError::Io` when existence cannot be determined.
    fn exists(&self, path: &Path) -> FutdResult<bool> {
        Ok(self.last_write_time_utc(path)?.is_some())
    }
}

/// File system backed by `std::fs` metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn last_write_time_utc(&self, path: &Path) -> FutdResult<Option<DateTime<Utc>>> {
        match std::fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => {
                let modified = metadata.modified().map_err(|e| FutdError::io(path, e))?;
                Ok(Some(DateTime::<Utc>::from(modified)))
            }
            // Directories are not build inputs or outputs
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FutdError::io(path, e)),
        }
    }
}

/// In-memory file system with explicitly assigned timestamps.
///
/// Used by tests, and by hosts that track timestamps themselves, where real
/// modification times would be awkward to arrange. Paths can also be marked as faulty to exercise the
/// error path of the check.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: RwLock<HashMap<PathBuf, DateTime<Utc>>>,
    faulty: RwLock<HashSet<PathBuf>>,
}

impl MemoryFileSystem {
    /// Create an empty file system.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or touch a file with the given write time.
    pub fn set(&self, path: impl Into<PathBuf>, written_at: DateTime<Utc>) {
        if let Ok(mut files) = self.files.write() {
            let _ = files.insert(path.into(), written_at);
        }
    }

    /// Delete a file.
    pub fn remove(&self, path: impl AsRef<Path>) {
        if let Ok(mut files) = self.files.write() {
            let _ = files.remove(path.as_ref());
        }
    }

    /// Make every metadata query for `path` fail.
    pub fn fail_on(&self, path: impl Into<PathBuf>) {
        if let Ok(mut faulty) = self.faulty.write() {
            let _ = faulty.insert(path.into());
        }
    }

    /// Number of files currently present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.read().map_or(0, |files| files.len())
    }

    /// Whether the file system holds no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FileSystem for MemoryFileSystem {
    fn last_write_time_utc(&self, path: &Path) -> FutdResult<Option<DateTime<Utc>>> {
        let faulty = self
            .faulty
            .read()
            .map(|faulty| faulty.contains(path))
            .unwrap_or(true);
        if faulty {
            return Err(FutdError::io(
                path,
                std::io::Error::new(ErrorKind::PermissionDenied, "metadata unavailable"),
            ));
        }

        Ok(self
            .files
            .read()
            .ok()
            .and_then(|files| files.get(path).copied()))
    }
}
