//! The decision pipeline for one project configuration
//!
//! Stages run in a fixed order and the first failing stage ends the check:
//!
//! 1. Global conditions (critical tasks, disabled, first run, copy-always items)
//! 2. Inputs against outputs, per set
//! 3. Copy markers of referenced projects
//! 4. Copy-to-output-directory items
//! 5. Copied output files
//!
//! The pipeline only decides. It reports what it looked at through
//! `CheckLog` and returns the failure as a value; it never stamps state.
//! Whether a run may advance the last-checked instant is reported in
//! `PipelineRun::checked`: only runs that reached the input comparison, or
//! that found no baseline at all, qualify.

use crate::cancel::CancellationSignal;
use crate::fs::FileSystem;
use crate::items::{make_rooted, paths_in_set, CopyType, DEFAULT_SET_NAME};
use crate::log::CheckLog;
use crate::reason::{CheckFailure, FailureReason};
use crate::state::ProjectState;
use crate::timestamp::TimestampCache;
use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

type StageResult = Result<(), CheckFailure>;

/// An input with where it came from and whether it must exist.
struct Input<'a> {
    path: Cow<'a, Path>,
    origin: &'a str,
    required: bool,
}

impl<'a> Input<'a> {
    fn required(path: impl Into<Cow<'a, Path>>, origin: &'a str) -> Self {
        Self {
            path: path.into(),
            origin,
            required: true,
        }
    }

    fn optional(path: impl Into<Cow<'a, Path>>, origin: &'a str) -> Self {
        Self {
            path: path.into(),
            origin,
            required: false,
        }
    }
}

struct Time(DateTime<Utc>);

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

struct SetName<'a>(&'a str);

impl fmt::Display for SetName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == DEFAULT_SET_NAME {
            f.write_str("(default)")
        } else {
            write!(f, "'{}'", self.0)
        }
    }
}

/// What one run of the pipeline found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    /// First failure, if any
    pub result: Result<(), CheckFailure>,
    /// The run compared inputs with outputs, or found the configuration was
    /// never checked before
    pub checked: bool,
}

/// Runs the pipeline against one `ProjectState`.
///
/// Owns the `TimestampCache` for the duration of the check.
pub struct UpToDateChecker<'a> {
    state: &'a ProjectState,
    timestamps: TimestampCache<'a>,
    log: &'a mut CheckLog,
    ignore_kinds: &'a BTreeSet<String>,
    cancel: &'a CancellationSignal,
    checked: bool,
}

impl<'a> UpToDateChecker<'a> {
    /// Prepare a check of `state`.
    pub fn new(
        state: &'a ProjectState,
        fs: &'a dyn FileSystem,
        log: &'a mut CheckLog,
        ignore_kinds: &'a BTreeSet<String>,
        cancel: &'a CancellationSignal,
    ) -> Self {
        Self {
            state,
            timestamps: TimestampCache::new(fs),
            log,
            ignore_kinds,
            cancel,
            checked: false,
        }
    }

    /// Run every stage.
    ///
    /// The result holds the first failure; faults surface as
    /// `FailureReason::Exception` and cancellation as `FailureReason::Cancelled`.
    #[must_use]
    pub fn run(mut self, critical_tasks_pending: bool) -> PipelineRun {
        let result = self.run_stages(critical_tasks_pending);
        PipelineRun {
            result,
            checked: self.checked,
        }
    }

    fn run_stages(&mut self, critical_tasks_pending: bool) -> StageResult {
        self.check_global_conditions(critical_tasks_pending)?;
        self.check_inputs_and_outputs()?;
        self.check_marker()?;
        self.check_copy_to_output_directory()?;
        self.check_copied_output_files()
    }

    fn ensure_not_cancelled(&self) -> StageResult {
        if self.cancel.is_cancelled() {
            Err(CheckFailure::cancelled())
        } else {
            Ok(())
        }
    }

    fn timestamp(&mut self, path: &Path) -> Result<Option<DateTime<Utc>>, CheckFailure> {
        Ok(self.timestamps.get_timestamp_utc(path)?)
    }

    fn check_global_conditions(&mut self, critical_tasks_pending: bool) -> StageResult {
        let state = self.state;

        if critical_tasks_pending {
            return Err(CheckFailure::new(
                FailureReason::CriticalTasks,
                "Critical build tasks are running",
            ));
        }

        if state.is_disabled {
            return Err(CheckFailure::new(
                FailureReason::Disabled,
                "The 'DisableFastUpToDateCheck' property is 'true'",
            ));
        }

        if state.is_first_run() {
            // No earlier instant to protect; this check becomes the baseline
            self.checked = true;
            return Err(CheckFailure::new(
                FailureReason::FirstRun,
                "The up-to-date check has not yet run for this project",
            ));
        }

        if let Some((item_type, item)) = state
            .all_items()
            .find(|(_, item)| item.copy_type == CopyType::Always)
        {
            return Err(CheckFailure::new(
                FailureReason::CopyAlwaysItemExists,
                format!(
                    "Item '{}' of type '{item_type}' has 'CopyToOutputDirectory' set to 'Always'",
                    item.path
                ),
            ));
        }

        Ok(())
    }

    fn check_inputs_and_outputs(&mut self) -> StageResult {
        self.checked = true;
        let state = self.state;
        let sets = std::iter::once(DEFAULT_SET_NAME).chain(state.named_sets());

        let mut first_failure = None;
        for set in sets {
            self.log
                .verbose("FUTD_CheckingSet", format_args!("Checking set {}:", SetName(set)));
            self.log.indent();
            let result = self.check_set(set);
            self.log.unindent();

            let Err(failure) = result else { continue };
            if !failure.reason.is_conclusive() {
                return Err(failure);
            }
            match first_failure {
                None => first_failure = Some(failure),
                Some(_) => self.log.info(
                    "FUTD_AdditionalSetFailure",
                    format_args!("Set {} is also not up-to-date: {}", SetName(set), failure.message),
                ),
            }
        }

        first_failure.map_or(Ok(()), Err)
    }

    fn check_set(&mut self, set: &str) -> StageResult {
        let state = self.state;
        let ignore_kinds = self.ignore_kinds;

        let outputs: Vec<&Path> = paths_in_set(&state.custom_outputs_by_set, set, ignore_kinds)
            .chain(paths_in_set(&state.built_outputs_by_set, set, ignore_kinds))
            .map(|(_, path)| path)
            .collect();

        if outputs.is_empty() {
            self.log
                .verbose("FUTD_NoBuildOutputDefined", format_args!("No build outputs defined."));
            return Ok(());
        }

        let mut earliest: Option<(&Path, DateTime<Utc>)> = None;
        for output in outputs {
            self.ensure_not_cancelled()?;
            let Some(time) = self.timestamp(output)? else {
                return Err(CheckFailure::new(
                    FailureReason::OutputNotFound,
                    format!("Output '{}' does not exist", output.display()),
                ));
            };
            if earliest.is_none_or(|(_, earliest_time)| time < earliest_time) {
                earliest = Some((output, time));
            }
        }
        let Some((earliest_path, earliest_time)) = earliest else {
            return Ok(());
        };

        self.log.verbose(
            "FUTD_EarliestOutput",
            format_args!(
                "Earliest output is '{}' ({}).",
                earliest_path.display(),
                Time(earliest_time)
            ),
        );

        if let Some(changed_at) = state.last_items_changed_at_utc
            && changed_at > earliest_time
        {
            return Err(CheckFailure::new(
                FailureReason::ProjectItemsChangedSinceEarliestOutput,
                format!(
                    "The set of project items was changed more recently ({}) than the earliest output '{}' ({})",
                    Time(changed_at),
                    earliest_path.display(),
                    Time(earliest_time)
                ),
            ));
        }

        let inputs = self.collect_inputs(set);
        for input in &inputs {
            self.ensure_not_cancelled()?;

            let Some(time) = self.timestamp(&input.path)? else {
                if input.required {
                    return Err(CheckFailure::new(
                        FailureReason::InputNotFound,
                        format!("Input {} '{}' does not exist", input.origin, input.path.display()),
                    ));
                }
                self.log.verbose(
                    "FUTD_OptionalInputNotFound",
                    format_args!("Optional input {} '{}' does not exist, skipping.", input.origin, input.path.display()),
                );
                continue;
            };

            if time > earliest_time {
                return Err(CheckFailure::new(
                    FailureReason::InputNewerThanEarliestOutput,
                    format!(
                        "Input {} '{}' is newer ({}) than earliest output '{}' ({})",
                        input.origin,
                        input.path.display(),
                        Time(time),
                        earliest_path.display(),
                        Time(earliest_time)
                    ),
                ));
            }

            if let Some(last_checked) = state.last_checked_at_utc
                && time > last_checked
            {
                return Err(CheckFailure::new(
                    FailureReason::InputModifiedSinceLastCheck,
                    format!(
                        "Input {} '{}' ({}) has been modified since the last up-to-date check ({})",
                        input.origin,
                        input.path.display(),
                        Time(time),
                        Time(last_checked)
                    ),
                ));
            }
        }

        self.log.verbose(
            "FUTD_NoInputsNewer",
            format_args!(
                "No inputs are newer than earliest output '{}' ({}).",
                earliest_path.display(),
                Time(earliest_time)
            ),
        );
        Ok(())
    }

    fn collect_inputs(&self, set: &str) -> Vec<Input<'a>> {
        let state = self.state;
        let mut inputs = Vec::new();

        if let Some(project) = state.project_full_path.as_deref() {
            inputs.push(Input::required(project, "project file"));
        }
        if let Some(import) = state.newest_import_input.as_deref() {
            inputs.push(Input::optional(import, "import"));
        }

        if set == DEFAULT_SET_NAME {
            inputs.extend(
                state
                    .analyzer_reference_paths
                    .iter()
                    .map(|p| Input::required(p.as_path(), "analyzer reference")),
            );
            inputs.extend(
                state
                    .compilation_reference_paths
                    .iter()
                    .map(|p| Input::required(p.as_path(), "compilation reference")),
            );
            inputs.extend(state.input_items().map(|(item_type, item)| {
                let rooted: PathBuf = make_rooted(&state.project_directory, &item.path);
                Input::required(rooted, item_type)
            }));
        }

        inputs.extend(
            paths_in_set(&state.custom_inputs_by_set, set, self.ignore_kinds)
                .map(|(_, path)| Input::required(path, "UpToDateCheckInput")),
        );

        inputs
    }

    fn check_marker(&mut self) -> StageResult {
        let state = self.state;
        let Some(output_marker) = state.copy_up_to_date_marker.as_deref() else {
            return Ok(());
        };
        if state.copy_reference_input_paths.is_empty() {
            return Ok(());
        }

        self.log.verbose(
            "FUTD_AdditionalInputsToMarker",
            format_args!("Comparing reference copy markers against '{}':", output_marker.display()),
        );
        self.log.indent();
        for marker in state.copy_reference_input_paths.iter() {
            self.log
                .verbose("FUTD_InputMarker", format_args!("{}", marker.display()));
        }
        self.log.unindent();

        self.ensure_not_cancelled()?;
        let latest = self
            .timestamps
            .try_get_latest_input(state.copy_reference_input_paths.iter().map(PathBuf::as_path))?;
        let Some((latest_path, latest_time)) = latest else {
            self.log.verbose(
                "FUTD_NoInputMarkersExist",
                format_args!("No input markers exist, skipping marker check."),
            );
            return Ok(());
        };

        let Some(output_time) = self.timestamp(output_marker)? else {
            self.log.verbose(
                "FUTD_NoOutputMarkerExists",
                format_args!("Output marker '{}' does not exist, skipping marker check.", output_marker.display()),
            );
            return Ok(());
        };

        if output_time < latest_time {
            return Err(CheckFailure::new(
                FailureReason::InputMarkerNewerThanOutputMarker,
                format!(
                    "Input marker '{}' ({}) is newer than output marker '{}' ({})",
                    latest_path.display(),
                    Time(latest_time),
                    output_marker.display(),
                    Time(output_time)
                ),
            ));
        }

        Ok(())
    }

    fn check_copy_to_output_directory(&mut self) -> StageResult {
        let state = self.state;
        let output_directory = state.output_directory();

        let items = state
            .all_items()
            .filter(|(_, item)| item.copy_type == CopyType::PreserveNewest);

        for (_, item) in items {
            self.ensure_not_cancelled()?;

            let source = make_rooted(&state.project_directory, &item.path);
            let destination =
                output_directory.join(item.destination_relative_path(&state.project_directory));

            self.log.verbose(
                "FUTD_CheckingPreserveNewestFile",
                format_args!("Checking PreserveNewest item '{}':", source.display()),
            );

            let Some(source_time) = self.timestamp(&source)? else {
                return Err(CheckFailure::new(
                    FailureReason::CopyToOutputDirectorySourceNotFound,
                    format!("Source '{}' does not exist", source.display()),
                ));
            };
            let Some(destination_time) = self.timestamp(&destination)? else {
                return Err(CheckFailure::new(
                    FailureReason::CopyToOutputDirectoryDestinationNotFound,
                    format!("Destination '{}' does not exist", destination.display()),
                ));
            };
            if destination_time < source_time {
                return Err(CheckFailure::new(
                    FailureReason::CopyToOutputDirectorySourceNewer,
                    format!(
                        "PreserveNewest source '{}' ({}) is newer than destination '{}' ({})",
                        source.display(),
                        Time(source_time),
                        destination.display(),
                        Time(destination_time)
                    ),
                ));
            }
        }

        Ok(())
    }

    fn check_copied_output_files(&mut self) -> StageResult {
        let state = self.state;

        for (destination, source) in state.copied_output_files.iter() {
            self.ensure_not_cancelled()?;

            let Some(source_time) = self.timestamp(source)? else {
                return Err(CheckFailure::new(
                    FailureReason::CopySourceNotFound,
                    format!("Source '{}' of copied output does not exist", source.display()),
                ));
            };
            let Some(destination_time) = self.timestamp(destination)? else {
                return Err(CheckFailure::new(
                    FailureReason::CopyDestinationNotFound,
                    format!("Copied output '{}' does not exist", destination.display()),
                ));
            };
            if destination_time < source_time {
                return Err(CheckFailure::new(
                    FailureReason::CopySourceNewer,
                    format!(
                        "Source '{}' ({}) is newer than copied output '{}' ({})",
                        source.display(),
                        Time(source_time),
                        destination.display(),
                        Time(destination_time)
                    ),
                ));
            }
        }

        Ok(())
    }
}
