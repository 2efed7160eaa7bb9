//! Diagnostic log of a check
//!
//! The pipeline reports what it decided at each decision point; `CheckLog`
//! decides what to keep based on the configured level and mirrors every
//! kept entry to `tracing`. Each entry carries a stable key so front ends
//! can localize or filter messages without parsing them.

use crate::reason::CheckFailure;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Verbosity of the diagnostic log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Nothing is logged
    #[default]
    Quiet,
    /// Failures and summary lines
    Info,
    /// Every decision point
    Verbose,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quiet => write!(f, "quiet"),
            Self::Info => write!(f, "info"),
            Self::Verbose => write!(f, "verbose"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quiet" | "none" => Ok(Self::Quiet),
            "info" | "minimal" => Ok(Self::Info),
            "verbose" | "debug" => Ok(Self::Verbose),
            other => Err(format!("unknown log level '{other}' (expected quiet, info or verbose)")),
        }
    }
}

/// One diagnostic line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Level the entry was written at
    pub level: LogLevel,
    /// Nesting depth
    pub indent: usize,
    /// Stable message key
    pub key: String,
    /// Rendered message
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:width$}{}", "", self.message, width = self.indent * 4)
    }
}

/// Recorder for one check.
#[derive(Debug)]
pub struct CheckLog {
    level: LogLevel,
    project: String,
    indent: usize,
    entries: Vec<LogEntry>,
}

impl CheckLog {
    /// Create a recorder for `project` at `level`.
    pub fn new(level: LogLevel, project: impl Into<String>) -> Self {
        Self {
            level,
            project: project.into(),
            indent: 0,
            entries: Vec::new(),
        }
    }

    /// Configured level.
    #[must_use]
    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Record an informational entry.
    pub fn info(&mut self, key: &'static str, args: fmt::Arguments<'_>) {
        self.write(LogLevel::Info, key, args);
    }

    /// Record a verbose entry.
    pub fn verbose(&mut self, key: &'static str, args: fmt::Arguments<'_>) {
        self.write(LogLevel::Verbose, key, args);
    }

    /// Record the failure that ended the check.
    pub fn fail(&mut self, failure: &CheckFailure) {
        self.write(
            LogLevel::Info,
            failure.reason.as_str(),
            format_args!("{}, not up-to-date.", failure.message),
        );
    }

    /// Nest following entries one level deeper.
    pub fn indent(&mut self) {
        self.indent += 1;
    }

    /// Undo one `indent`.
    pub fn unindent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    /// Entries recorded so far.
    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Consume the recorder, returning its entries.
    #[must_use]
    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }

    fn write(&mut self, level: LogLevel, key: &'static str, args: fmt::Arguments<'_>) {
        if self.level == LogLevel::Quiet || level > self.level {
            return;
        }

        let entry = LogEntry {
            level,
            indent: self.indent,
            key: key.to_string(),
            message: args.to_string(),
        };

        match level {
            LogLevel::Verbose => debug!(project = %self.project, key, "{entry}"),
            _ => info!(project = %self.project, key, "{entry}"),
        }

        self.entries.push(entry);
    }
}
