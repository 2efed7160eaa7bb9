//! Per-check memoization of file timestamps
//!
//! A cache lives for exactly one check. Reusing it across checks would hand
//! out stale write times and hide files touched while a build was running.

use crate::error::FutdResult;
use crate::fs::FileSystem;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Memoized existence and write-time lookups.
pub struct TimestampCache<'a> {
    fs: &'a dyn FileSystem,
    timestamps: HashMap<PathBuf, DateTime<Utc>>,
}

impl<'a> TimestampCache<'a> {
    /// Create an empty cache over `fs`.
    #[must_use]
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        Self {
            fs,
            timestamps: HashMap::new(),
        }
    }

    /// Last write time of `path`, or `None` when it does not exist.
    ///
    /// Only existing files are memoized, so a file that appears during the
    /// check is still observed.
    ///
    /// # Errors
    ///
    /// Propagates file system faults.
    pub fn get_timestamp_utc(&mut self, path: &Path) -> FutdResult<Option<DateTime<Utc>>> {
        if let Some(time) = self.timestamps.get(path) {
            return Ok(Some(*time));
        }

        let time = self.fs.last_write_time_utc(path)?;
        if let Some(time) = time {
            let _ = self.timestamps.insert(path.to_path_buf(), time);
        }
        Ok(time)
    }

    /// The latest write time among `paths`, together with the path that has it.
    ///
    /// Ties keep the first path seen. Returns `None` when none of the paths exist.
    ///
    /// # Errors
    ///
    /// Propagates file system faults.
    pub fn try_get_latest_input<'p, I>(
        &mut self,
        paths: I,
    ) -> FutdResult<Option<(&'p Path, DateTime<Utc>)>>
    where
        I: IntoIterator<Item = &'p Path>,
    {
        let mut latest: Option<(&'p Path, DateTime<Utc>)> = None;

        for path in paths {
            let Some(time) = self.get_timestamp_utc(path)? else {
                continue;
            };
            if latest.is_none_or(|(_, latest_time)| time > latest_time) {
                latest = Some((path, time));
            }
        }

        Ok(latest)
    }

    /// Number of memoized entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether nothing has been memoized yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
