//! futd command-line interface
//!
//! - `check`: answer whether the build can be skipped and record the check
//! - `validate`: re-check without recording anything
//! - `inspect`: print the state folded from a project snapshot

use clap::{Parser, Subcommand};
use convenient_futd::{
    BuildUpToDateCheck, FutdConfig, JsonStatePersistence, LogLevel, ProjectSnapshot,
    RealFileSystem,
};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub mod check;
pub mod inspect;

/// Fast up-to-date check for project snapshots
#[derive(Debug, Parser)]
#[command(name = "futd")]
#[command(about = "Decide whether a build can be skipped from timestamps and declared inputs/outputs")]
#[command(version)]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, env = "FUTD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Diagnostic log verbosity (quiet, info, verbose)
    #[arg(short, long, global = true)]
    pub verbosity: Option<LogLevel>,

    /// Check history file (default: next to the snapshot)
    #[arg(long, global = true, env = "FUTD_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check whether the project is up to date; exits 1 when it is not
    Check {
        /// Project snapshot (JSON)
        snapshot: PathBuf,

        /// Item kinds to ignore, semicolon separated
        #[arg(long)]
        ignore_kinds: Option<String>,

        /// Only check these configurations
        #[arg(short, long)]
        configuration: Vec<String>,
    },

    /// Re-check without recording the check; exits 1 when not up to date
    Validate {
        /// Project snapshot (JSON)
        snapshot: PathBuf,

        /// Only check these configurations
        #[arg(short, long)]
        configuration: Vec<String>,
    },

    /// Print the state folded from a snapshot
    Inspect {
        /// Project snapshot (JSON)
        snapshot: PathBuf,

        /// Only show these configurations
        #[arg(short, long)]
        configuration: Vec<String>,
    },
}

/// Settings shared by every command.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub config: Option<PathBuf>,
    pub verbosity: Option<LogLevel>,
    pub state_file: Option<PathBuf>,
}

impl From<&Cli> for Settings {
    fn from(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            verbosity: cli.verbosity,
            state_file: cli.state_file.clone(),
        }
    }
}

impl Settings {
    /// Configuration file overridden by command-line flags.
    pub fn resolve_config(&self) -> Result<FutdConfig, Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => FutdConfig::from_file(path)?,
            None => FutdConfig::default(),
        };
        if let Some(level) = self.verbosity {
            config.logging_level = level;
        }
        if let Some(state_file) = &self.state_file {
            config.state_file = Some(state_file.clone());
        }
        Ok(config)
    }
}

/// History file used when none is configured.
pub fn default_state_file(snapshot: &Path) -> PathBuf {
    snapshot.with_extension("futd-state.json")
}

/// Configurations of `snapshot` selected by `filter` (all when empty).
pub fn select_configurations<'a>(
    snapshot: &'a ProjectSnapshot,
    filter: &[String],
) -> Result<Vec<&'a str>, Box<dyn Error>> {
    if filter.is_empty() {
        return Ok(snapshot.configurations.keys().map(String::as_str).collect());
    }

    filter
        .iter()
        .map(|name| {
            snapshot
                .configurations
                .get_key_value(name)
                .map(|(key, _)| key.as_str())
                .ok_or_else(|| -> Box<dyn Error> {
                    format!("configuration '{name}' is not defined in the snapshot").into()
                })
        })
        .collect()
}

/// Engine loaded with every selected configuration of a snapshot.
pub async fn open_engine(
    settings: &Settings,
    snapshot_path: &Path,
    filter: &[String],
) -> Result<BuildUpToDateCheck, Box<dyn Error>> {
    let config = settings.resolve_config()?;
    let snapshot = ProjectSnapshot::load(snapshot_path)?;
    let configurations = select_configurations(&snapshot, filter)?;

    let state_file = config
        .state_file
        .clone()
        .unwrap_or_else(|| default_state_file(snapshot_path));
    let persistence = Arc::new(JsonStatePersistence::open(&state_file)?);
    debug!("Using check history at {}", state_file.display());

    let project = if snapshot.project.is_empty() {
        snapshot_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        snapshot.project.clone()
    };

    let engine = BuildUpToDateCheck::new(project, Arc::new(RealFileSystem))
        .with_options(Arc::new(config))
        .with_persistence(persistence);
    let _ = engine.set_configurations(configurations.iter().copied());

    for configuration in configurations {
        if let Some(bundle) = snapshot.configurations.get(configuration) {
            engine.apply_project_change(configuration, bundle).await?;
        }
    }

    info!(
        "Loaded {} from {}",
        engine.project(),
        snapshot_path.display()
    );
    Ok(engine)
}
