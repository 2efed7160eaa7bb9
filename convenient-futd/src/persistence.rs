//! Check history persisted between sessions
//!
//! Without history the first check after opening a project has to answer
//! "not up to date". Persisting the item hash and the two race-protection
//! instants lets a reopened project be checked immediately, as long as its
//! tracked items are the same as when the history was written.

use crate::error::{FutdError, FutdResult};
use crate::state::ProjectState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// History of one project configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCheckState {
    /// Hash of the tracked items when the history was written
    pub item_hash: String,
    /// When the tracked items last changed
    pub last_items_changed_at_utc: Option<DateTime<Utc>>,
    /// Start of the last completed check
    pub last_checked_at_utc: Option<DateTime<Utc>>,
}

impl PersistedCheckState {
    /// Capture the history of `state`.
    #[must_use]
    pub fn capture(state: &ProjectState) -> Self {
        Self {
            item_hash: state.item_hash(),
            last_items_changed_at_utc: state.last_items_changed_at_utc,
            last_checked_at_utc: state.last_checked_at_utc,
        }
    }
}

/// Storage for check history.
pub trait StatePersistence: Send + Sync {
    /// History for `configuration` of `project`, if any was stored.
    ///
    /// # Errors
    ///
    /// Fails when the backing store cannot be read.
    fn restore(&self, project: &Path, configuration: &str) -> FutdResult<Option<PersistedCheckState>>;

    /// Replace the history for `configuration` of `project`.
    ///
    /// # Errors
    ///
    /// Fails when the backing store cannot be written.
    fn store(&self, project: &Path, configuration: &str, state: &PersistedCheckState) -> FutdResult<()>;
}

/// History kept in a single JSON file, rewritten atomically on every store.
#[derive(Debug)]
pub struct JsonStatePersistence {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, PersistedCheckState>>,
}

impl JsonStatePersistence {
    /// Open the store at `path`, loading existing history if the file exists.
    ///
    /// # Errors
    ///
    /// Fails when an existing file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> FutdResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let json = fs::read_to_string(&path).map_err(|e| FutdError::io(&path, e))?;
            let entries: BTreeMap<String, PersistedCheckState> =
                serde_json::from_str(&json).map_err(|e| FutdError::json(&path, e))?;
            info!("Loaded check history for {} configurations from {}", entries.len(), path.display());
            entries
        } else {
            debug!("No check history at {}", path.display());
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn key(project: &Path, configuration: &str) -> String {
        format!("{}|{configuration}", project.display())
    }

    fn save(&self, entries: &BTreeMap<String, PersistedCheckState>) -> FutdResult<()> {
        let json = serde_json::to_vec_pretty(entries).map_err(|e| FutdError::json(&self.path, e))?;
        atomic_write(&self.path, &json)
    }
}

impl StatePersistence for JsonStatePersistence {
    fn restore(&self, project: &Path, configuration: &str) -> FutdResult<Option<PersistedCheckState>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(&Self::key(project, configuration)).cloned())
    }

    fn store(&self, project: &Path, configuration: &str, state: &PersistedCheckState) -> FutdResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let key = Self::key(project, configuration);
        if entries.get(&key) == Some(state) {
            return Ok(());
        }
        let _ = entries.insert(key, state.clone());
        self.save(&entries)
    }
}

/// Write to a temporary sibling, flush, then rename over the destination.
fn atomic_write(path: &Path, data: &[u8]) -> FutdResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| FutdError::io(parent, e))?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path).map_err(|e| FutdError::io(&temp_path, e))?;
    file.write_all(data).map_err(|e| FutdError::io(&temp_path, e))?;
    file.sync_all().map_err(|e| FutdError::io(&temp_path, e))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| FutdError::io(path, e))
}
