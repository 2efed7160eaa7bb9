//! Failure reasons and check outcomes

use crate::error::FutdError;
use crate::log::LogEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Why a project is not up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    /// No configuration has been loaded yet
    NoProjectState,
    /// Build-critical background work is still queued
    CriticalTasks,
    /// The check is turned off by the project or by options
    Disabled,
    /// No previous check exists and no history was restored
    FirstRun,
    /// A tracked item is copied to the output directory on every build
    CopyAlwaysItemExists,
    /// A declared output does not exist
    OutputNotFound,
    /// The tracked items changed after the earliest output was written
    ProjectItemsChangedSinceEarliestOutput,
    /// A required input does not exist
    InputNotFound,
    /// An input was written after the earliest output
    InputNewerThanEarliestOutput,
    /// An input was written after the previous check started
    InputModifiedSinceLastCheck,
    /// A referenced project's copy marker is newer than this project's
    InputMarkerNewerThanOutputMarker,
    /// The source of a copy-to-output item does not exist
    CopyToOutputDirectorySourceNotFound,
    /// The copy of a copy-to-output item does not exist
    CopyToOutputDirectoryDestinationNotFound,
    /// The source of a copy-to-output item is newer than its copy
    CopyToOutputDirectorySourceNewer,
    /// The source of a copied output does not exist
    CopySourceNotFound,
    /// A copied output does not exist
    CopyDestinationNotFound,
    /// The source of a copied output is newer than the copy
    CopySourceNewer,
    /// The check was cancelled
    Cancelled,
    /// The check faulted
    Exception,
}

impl FailureReason {
    /// Stable code used in logs and telemetry.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoProjectState => "NoProjectState",
            Self::CriticalTasks => "CriticalTasks",
            Self::Disabled => "Disabled",
            Self::FirstRun => "FirstRun",
            Self::CopyAlwaysItemExists => "CopyAlwaysItemExists",
            Self::OutputNotFound => "OutputNotFound",
            Self::ProjectItemsChangedSinceEarliestOutput => "ProjectItemsChangedSinceEarliestOutput",
            Self::InputNotFound => "InputNotFound",
            Self::InputNewerThanEarliestOutput => "InputNewerThanEarliestOutput",
            Self::InputModifiedSinceLastCheck => "InputModifiedSinceLastCheck",
            Self::InputMarkerNewerThanOutputMarker => "InputMarkerNewerThanOutputMarker",
            Self::CopyToOutputDirectorySourceNotFound => "CopyToOutputDirectorySourceNotFound",
            Self::CopyToOutputDirectoryDestinationNotFound => "CopyToOutputDirectoryDestinationNotFound",
            Self::CopyToOutputDirectorySourceNewer => "CopyToOutputDirectorySourceNewer",
            Self::CopySourceNotFound => "CopySourceNotFound",
            Self::CopyDestinationNotFound => "CopyDestinationNotFound",
            Self::CopySourceNewer => "CopySourceNewer",
            Self::Cancelled => "Cancelled",
            Self::Exception => "Exception",
        }
    }

    /// Whether the check ran to a definitive answer.
    ///
    /// Faulted and cancelled checks say nothing about the project and must
    /// not advance the last-checked instant.
    #[must_use]
    pub fn is_conclusive(self) -> bool {
        !matches!(self, Self::Cancelled | Self::Exception)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed check: the reason code plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFailure {
    /// Reason code
    pub reason: FailureReason,
    /// Message describing the failing decision
    pub message: String,
}

impl CheckFailure {
    /// Create a failure.
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    /// The check was cancelled.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(FailureReason::Cancelled, "Up-to-date check was cancelled")
    }
}

impl From<FutdError> for CheckFailure {
    fn from(error: FutdError) -> Self {
        Self::new(FailureReason::Exception, error.to_string())
    }
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

/// Result of one evaluation across all configurations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    /// Every configuration passed
    pub up_to_date: bool,
    /// First failure, if any
    pub failure: Option<CheckFailure>,
    /// Configuration that failed, if the failure is configuration specific
    pub configuration: Option<String>,
    /// Diagnostic log of the evaluation
    pub log: Vec<LogEntry>,
    /// Configurations whose files were examined; only these may have their
    /// last-checked instant advanced
    pub checked_configurations: BTreeSet<String>,
    /// Last-checked instant committed by this evaluation
    pub committed_at: Option<DateTime<Utc>>,
}

impl CheckOutcome {
    /// A passing outcome.
    #[must_use]
    pub fn up_to_date(log: Vec<LogEntry>) -> Self {
        Self {
            up_to_date: true,
            failure: None,
            configuration: None,
            log,
            checked_configurations: BTreeSet::new(),
            committed_at: None,
        }
    }

    /// A failing outcome.
    #[must_use]
    pub fn failed(failure: CheckFailure, configuration: Option<String>, log: Vec<LogEntry>) -> Self {
        Self {
            up_to_date: false,
            failure: Some(failure),
            configuration,
            log,
            checked_configurations: BTreeSet::new(),
            committed_at: None,
        }
    }

    /// Record `checked` as the configurations this evaluation examined.
    #[must_use]
    pub fn with_checked_configurations(mut self, checked: BTreeSet<String>) -> Self {
        self.checked_configurations = checked;
        self
    }

    /// Reason of the failure, if any.
    #[must_use]
    pub fn reason(&self) -> Option<FailureReason> {
        self.failure.as_ref().map(|f| f.reason)
    }

    /// Whether the evaluation reached a definitive answer.
    #[must_use]
    pub fn is_conclusive(&self) -> bool {
        self.reason().is_none_or(FailureReason::is_conclusive)
    }
}

/// Answer of `validate_up_to_date`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// Whether the project is up to date now
    pub up_to_date: bool,
    /// Failure reason when it is not
    pub reason: Option<FailureReason>,
    /// Failure message when it is not
    pub message: Option<String>,
}

impl From<&CheckOutcome> for ValidationResult {
    fn from(outcome: &CheckOutcome) -> Self {
        Self {
            up_to_date: outcome.up_to_date,
            reason: outcome.reason(),
            message: outcome.failure.as_ref().map(|f| f.message.clone()),
        }
    }
}
