//! Options source and configuration file

use crate::error::{FutdError, FutdResult};
use crate::log::LogLevel;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project-system options consulted before every check.
#[async_trait]
pub trait ProjectSystemOptions: Send + Sync {
    /// Whether the fast up-to-date check may run at all.
    async fn is_fast_up_to_date_check_enabled(&self) -> bool;

    /// Verbosity of the diagnostic log.
    async fn logging_level(&self) -> LogLevel;
}

/// Check configuration, loadable from a JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FutdConfig {
    /// Whether the check runs; when false every check answers "not up to date"
    pub enabled: bool,

    /// Verbosity of the diagnostic log
    pub logging_level: LogLevel,

    /// Where check history is persisted between sessions
    pub state_file: Option<PathBuf>,
}

impl Default for FutdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            logging_level: LogLevel::Info,
            state_file: None,
        }
    }
}

impl FutdConfig {
    /// Load configuration from `path`.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> FutdResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| FutdError::io(path, e))?;
        serde_json::from_str(&json).map_err(|e| FutdError::json(path, e))
    }
}

#[async_trait]
impl ProjectSystemOptions for FutdConfig {
    async fn is_fast_up_to_date_check_enabled(&self) -> bool {
        self.enabled
    }

    async fn logging_level(&self) -> LogLevel {
        self.logging_level
    }
}
