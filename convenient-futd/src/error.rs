//! Error types for the up-to-date check.
//!
//! These errors never cross the public check boundary: `is_up_to_date` and
//! `validate_up_to_date` map any of them to a negative answer with the
//! `Exception` failure reason. They are surfaced directly only by the
//! non-check APIs (change intake, persistence, snapshot loading).

use std::path::PathBuf;

/// Errors raised while maintaining or evaluating up-to-date check state.
#[derive(Debug, thiserror::Error)]
pub enum FutdError {
    /// File system access failed for a reason other than the file being absent
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A JSON document could not be parsed or written
    #[error("Failed to process JSON in {}: {source}", .path.display())]
    Json {
        /// Path of the document
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// The subscription was disposed before the operation could apply
    #[error("Subscription has been disposed")]
    Disposed,

    /// A change bundle or snapshot did not describe a usable project
    #[error("Invalid project change: {0}")]
    InvalidChange(String),
}

impl FutdError {
    /// Wrap an I/O error with the path that produced it.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a JSON error with the path of the document.
    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

/// Result type for up-to-date check operations.
pub type FutdResult<T> = Result<T, FutdError>;
